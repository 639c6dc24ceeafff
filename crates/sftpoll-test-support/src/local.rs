//! Session backend over a local directory tree.
//!
//! Remote paths are resolved beneath a root directory, which makes real
//! filesystem rename semantics available to integration tests.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use sftpoll_core::{
    ConnectTarget, EntryKind, RemoteEntry, SessionConnector, SessionError, SessionResult,
    SftpSession,
};
use tempfile::TempDir;

/// Connector whose sessions operate under `root`.
#[derive(Debug, Clone)]
pub struct LocalDirConnector {
    root: PathBuf,
}

impl LocalDirConnector {
    /// Serve the tree under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory served by this connector.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path backing a remote directory.
    #[must_use]
    pub fn resolve(&self, remote: &str) -> PathBuf {
        resolve_under(&self.root, remote)
    }
}

/// Temporary root containing an `inbox` directory, plus a connector serving it.
///
/// # Errors
///
/// Returns an error when the temporary directory cannot be created.
pub fn local_sandbox() -> io::Result<(TempDir, LocalDirConnector)> {
    let temp = tempfile::tempdir()?;
    fs::create_dir_all(temp.path().join("inbox"))?;
    let connector = LocalDirConnector::new(temp.path());
    Ok((temp, connector))
}

fn resolve_under(root: &Path, remote: &str) -> PathBuf {
    let mut resolved = root.to_path_buf();
    for component in Path::new(remote).components() {
        if let Component::Normal(part) = component {
            resolved.push(part);
        }
    }
    resolved
}

impl SessionConnector for LocalDirConnector {
    fn connect(&self, _target: &ConnectTarget) -> SessionResult<Box<dyn SftpSession>> {
        if !self.root.is_dir() {
            return Err(SessionError::io(
                "connect",
                self.root.display().to_string(),
                io::Error::new(io::ErrorKind::NotFound, "root directory missing"),
            ));
        }
        Ok(Box::new(LocalSession {
            root: self.root.clone(),
            cwd: None,
            open: true,
        }))
    }
}

struct LocalSession {
    root: PathBuf,
    cwd: Option<PathBuf>,
    open: bool,
}

impl LocalSession {
    fn path(&self, operation: &'static str, name: &str) -> SessionResult<PathBuf> {
        if !self.open {
            return Err(SessionError::NotConnected { operation });
        }
        let cwd = self.cwd.as_ref().ok_or_else(|| SessionError::Protocol {
            operation,
            detail: "no working directory".to_string(),
        })?;
        Ok(resolve_under(cwd, name))
    }
}

fn map_io(operation: &'static str, path: &str, source: io::Error) -> SessionError {
    if source.kind() == io::ErrorKind::NotFound {
        SessionError::not_found(operation, path)
    } else {
        SessionError::io(operation, path, source)
    }
}

impl SftpSession for LocalSession {
    fn change_dir(&mut self, directory: &str) -> SessionResult<()> {
        if !self.open {
            return Err(SessionError::NotConnected {
                operation: "change_dir",
            });
        }
        let resolved = resolve_under(&self.root, directory);
        if !resolved.is_dir() {
            return Err(SessionError::not_found("change_dir", directory));
        }
        self.cwd = Some(resolved);
        Ok(())
    }

    fn list_dir(&mut self) -> SessionResult<Vec<RemoteEntry>> {
        let dir = self.path("list_dir", "")?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|source| map_io("list_dir", ".", source))? {
            let entry = entry.map_err(|source| map_io("list_dir", ".", source))?;
            let metadata = entry
                .metadata()
                .map_err(|source| map_io("list_dir", ".", source))?;
            let kind = if metadata.is_file() {
                EntryKind::File
            } else if metadata.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::Other
            };
            entries.push(RemoteEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                size: metadata.is_file().then(|| metadata.len()),
            });
        }
        entries.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(entries)
    }

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        let source = self.path("rename", from)?;
        let target = self.path("rename", to)?;
        fs::rename(source, target).map_err(|err| map_io("rename", from, err))
    }

    fn remove(&mut self, path: &str) -> SessionResult<()> {
        let target = self.path("remove", path)?;
        fs::remove_file(target).map_err(|err| map_io("remove", path, err))
    }

    fn file_size(&mut self, path: &str) -> SessionResult<u64> {
        let target = self.path("file_size", path)?;
        fs::metadata(target)
            .map(|metadata| metadata.len())
            .map_err(|err| map_io("file_size", path, err))
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
        let target = self.path("download", path)?;
        let mut file = fs::File::open(target).map_err(|err| map_io("download", path, err))?;
        let copied = io::copy(&mut file, sink).map_err(|err| map_io("download", path, err))?;
        sink.flush().map_err(|err| map_io("download", path, err))?;
        Ok(copied)
    }

    fn upload(&mut self, path: &str, content: &[u8]) -> SessionResult<()> {
        let target = self.path("upload", path)?;
        fs::write(target, content).map_err(|err| map_io("upload", path, err))
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    fn disconnect(&mut self) -> SessionResult<()> {
        self.open = false;
        Ok(())
    }
}
