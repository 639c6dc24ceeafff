//! In-memory SFTP server with fault injection.
//!
//! A single [`MemorySftp`] acts as both the remote filesystem and the
//! connector; every session it hands out shares the same state, so concurrent
//! renames observe each other exactly like clients of one real server.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use sftpoll_config::Credential;
use sftpoll_core::{
    ConnectTarget, RemoteEntry, SessionConnector, SessionError, SessionResult, SftpSession,
};

type Directory = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct MemoryState {
    directories: BTreeMap<String, Directory>,
    generation: u64,
    connects: usize,
    disconnects: usize,
    failing_connects: usize,
    negotiation_failure: bool,
    required_password: Option<String>,
    failing_lists: usize,
    failing_renames: HashSet<String>,
    offline_after_rename: HashSet<String>,
    vanishing_on_rename: HashSet<String>,
    failing_removes: bool,
    failing_uploads: bool,
    download_delay: Option<Duration>,
    targets: Vec<ConnectTarget>,
}

/// Shared in-memory SFTP server.
#[derive(Clone, Default)]
pub struct MemorySftp {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySftp {
    /// Server with one empty directory.
    #[must_use]
    pub fn with_directory(path: &str) -> Self {
        let server = Self::default();
        server.create_dir(path);
        server
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an empty directory.
    pub fn create_dir(&self, path: &str) {
        self.lock().directories.entry(path.to_string()).or_default();
    }

    /// Remove a directory and its files.
    pub fn remove_dir(&self, path: &str) {
        self.lock().directories.remove(path);
    }

    /// Write a file, creating the directory if needed.
    pub fn put(&self, directory: &str, name: &str, content: impl Into<Vec<u8>>) {
        self.lock()
            .directories
            .entry(directory.to_string())
            .or_default()
            .insert(name.to_string(), content.into());
    }

    /// Read a file.
    #[must_use]
    pub fn get(&self, directory: &str, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .directories
            .get(directory)
            .and_then(|files| files.get(name).cloned())
    }

    /// File names in `directory`, sorted.
    #[must_use]
    pub fn names(&self, directory: &str) -> Vec<String> {
        self.lock()
            .directories
            .get(directory)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful connects.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// Number of explicit disconnects.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    /// Targets passed to every connect attempt, in order.
    #[must_use]
    pub fn connect_targets(&self) -> Vec<ConnectTarget> {
        self.lock().targets.clone()
    }

    /// Refuse the next `count` connects with an I/O error.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().failing_connects = count;
    }

    /// Refuse connects with an algorithm negotiation failure until cleared.
    pub fn fail_negotiation(&self, enabled: bool) {
        self.lock().negotiation_failure = enabled;
    }

    /// Require password authentication with `password`.
    pub fn require_password(&self, password: &str) {
        self.lock().required_password = Some(password.to_string());
    }

    /// Fail the next `count` directory listings.
    pub fn fail_next_lists(&self, count: usize) {
        self.lock().failing_lists = count;
    }

    /// Fail renames whose source is `name`, leaving the file in place.
    pub fn fail_rename_of(&self, name: &str) {
        self.lock().failing_renames.insert(name.to_string());
    }

    /// After `name` is renamed, drop every session and refuse connects until
    /// [`MemorySftp::fail_next_connects`] resets the count.
    pub fn go_offline_after_rename(&self, name: &str) {
        self.lock().offline_after_rename.insert(name.to_string());
    }

    /// Make `name` disappear just before it is renamed, as if another client won the race.
    pub fn vanish_on_rename(&self, name: &str) {
        self.lock().vanishing_on_rename.insert(name.to_string());
    }

    /// Fail every remove.
    pub fn fail_removes(&self, enabled: bool) {
        self.lock().failing_removes = enabled;
    }

    /// Fail every upload.
    pub fn fail_uploads(&self, enabled: bool) {
        self.lock().failing_uploads = enabled;
    }

    /// Sleep before streaming each download.
    pub fn delay_downloads(&self, delay: Option<Duration>) {
        self.lock().download_delay = delay;
    }

    /// Invalidate every open session, as if the server dropped them.
    pub fn drop_connections(&self) {
        self.lock().generation += 1;
    }
}

impl SessionConnector for MemorySftp {
    fn connect(&self, target: &ConnectTarget) -> SessionResult<Box<dyn SftpSession>> {
        let mut state = self.lock();
        state.targets.push(target.clone());
        if state.negotiation_failure {
            return Err(SessionError::AlgorithmNegotiation {
                detail: "no matching key exchange method found".to_string(),
            });
        }
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(SessionError::Io {
                operation: "connect",
                path: None,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ),
            });
        }
        if let Some(required) = &state.required_password {
            let accepted = matches!(
                &target.credential,
                Credential::Password(secret) if secret.expose() == required
            );
            if !accepted {
                return Err(SessionError::Authentication {
                    username: target.username.clone(),
                });
            }
        }
        state.connects += 1;
        Ok(Box::new(MemorySession {
            server: self.clone(),
            generation: state.generation,
            cwd: None,
            open: true,
        }))
    }
}

struct MemorySession {
    server: MemorySftp,
    generation: u64,
    cwd: Option<String>,
    open: bool,
}

impl MemorySession {
    fn ready(&self, operation: &'static str) -> SessionResult<(MutexGuard<'_, MemoryState>, String)> {
        let state = self.server.lock();
        if !self.open || state.generation != self.generation {
            return Err(SessionError::NotConnected { operation });
        }
        let cwd = self
            .cwd
            .clone()
            .ok_or(SessionError::Protocol {
                operation,
                detail: "no working directory".to_string(),
            })?;
        if !state.directories.contains_key(&cwd) {
            return Err(SessionError::not_found(operation, cwd));
        }
        Ok((state, cwd))
    }
}

impl SftpSession for MemorySession {
    fn change_dir(&mut self, directory: &str) -> SessionResult<()> {
        let state = self.server.lock();
        if !self.open || state.generation != self.generation {
            return Err(SessionError::NotConnected {
                operation: "change_dir",
            });
        }
        if !state.directories.contains_key(directory) {
            return Err(SessionError::not_found("change_dir", directory));
        }
        drop(state);
        self.cwd = Some(directory.to_string());
        Ok(())
    }

    fn list_dir(&mut self) -> SessionResult<Vec<RemoteEntry>> {
        let (mut state, cwd) = self.ready("list_dir")?;
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(SessionError::Protocol {
                operation: "list_dir",
                detail: "injected listing failure".to_string(),
            });
        }
        let files = state.directories.get(&cwd).cloned().unwrap_or_default();
        let mut entries: Vec<RemoteEntry> = files
            .iter()
            .map(|(name, content)| RemoteEntry::file(name.clone(), content.len() as u64))
            .collect();
        let prefix = format!("{}/", cwd.trim_end_matches('/'));
        entries.extend(
            state
                .directories
                .keys()
                .filter_map(|path| path.strip_prefix(&prefix))
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(RemoteEntry::directory),
        );
        Ok(entries)
    }

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        let (mut state, cwd) = self.ready("rename")?;
        if state.failing_renames.contains(from) {
            return Err(SessionError::Protocol {
                operation: "rename",
                detail: format!("injected rename failure for {from}"),
            });
        }
        let vanish = state.vanishing_on_rename.remove(from);
        let files = state.directories.entry(cwd).or_default();
        if vanish {
            files.remove(from);
        }
        let content = files
            .remove(from)
            .ok_or_else(|| SessionError::not_found("rename", from))?;
        files.insert(to.to_string(), content);
        if state.offline_after_rename.remove(from) {
            state.generation += 1;
            state.failing_connects = usize::MAX;
        }
        Ok(())
    }

    fn remove(&mut self, path: &str) -> SessionResult<()> {
        let (mut state, cwd) = self.ready("remove")?;
        if state.failing_removes {
            return Err(SessionError::Protocol {
                operation: "remove",
                detail: "injected remove failure".to_string(),
            });
        }
        state
            .directories
            .entry(cwd)
            .or_default()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SessionError::not_found("remove", path))
    }

    fn file_size(&mut self, path: &str) -> SessionResult<u64> {
        let (state, cwd) = self.ready("file_size")?;
        state
            .directories
            .get(&cwd)
            .and_then(|files| files.get(path))
            .map(|content| content.len() as u64)
            .ok_or_else(|| SessionError::not_found("file_size", path))
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
        let (content, delay) = {
            let (state, cwd) = self.ready("download")?;
            let content = state
                .directories
                .get(&cwd)
                .and_then(|files| files.get(path))
                .cloned()
                .ok_or_else(|| SessionError::not_found("download", path))?;
            (content, state.download_delay)
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }
        for chunk in content.chunks(1_024) {
            sink.write_all(chunk)
                .map_err(|source| SessionError::io("download", path, source))?;
        }
        sink.flush()
            .map_err(|source| SessionError::io("download", path, source))?;
        Ok(content.len() as u64)
    }

    fn upload(&mut self, path: &str, content: &[u8]) -> SessionResult<()> {
        let (mut state, cwd) = self.ready("upload")?;
        if state.failing_uploads {
            return Err(SessionError::Protocol {
                operation: "upload",
                detail: "injected upload failure".to_string(),
            });
        }
        state
            .directories
            .entry(cwd)
            .or_default()
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open && self.server.lock().generation == self.generation
    }

    fn disconnect(&mut self) -> SessionResult<()> {
        if self.open {
            self.open = false;
            self.server.lock().disconnects += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpoll_core::DEFAULT_CONNECT_TIMEOUT;

    fn target() -> ConnectTarget {
        ConnectTarget {
            host: "sftp.test".to_string(),
            port: 22,
            username: "gateway".to_string(),
            credential: Credential::None,
            host_key_fingerprint: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[test]
    fn session_sees_shared_state() -> SessionResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        server.put("/inbox", "a.xml", "<a/>");
        server.create_dir("/inbox/archive");

        let mut session = server.connect(&target())?;
        session.change_dir("/inbox")?;
        let entries = session.list_dir()?;
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|entry| entry.name == "archive" && !entry.is_file()));

        session.rename("a.xml", "a.xml.processing")?;
        assert_eq!(server.names("/inbox"), vec!["a.xml.processing"]);
        assert!(session.rename("a.xml", "a.xml.processing").is_err());
        Ok(())
    }

    #[test]
    fn missing_directory_is_not_found() -> SessionResult<()> {
        let server = MemorySftp::default();
        let mut session = server.connect(&target())?;
        let err = session.change_dir("/missing").expect_err("missing dir");
        assert!(err.is_not_found());
        Ok(())
    }

    #[test]
    fn dropped_connections_invalidate_sessions() -> SessionResult<()> {
        let server = MemorySftp::with_directory("/inbox");
        let mut session = server.connect(&target())?;
        session.change_dir("/inbox")?;
        server.drop_connections();
        assert!(!session.is_connected());
        assert!(matches!(
            session.list_dir(),
            Err(SessionError::NotConnected { .. })
        ));
        Ok(())
    }

    #[test]
    fn connect_faults_are_injected() {
        let server = MemorySftp::default();
        server.fail_next_connects(1);
        assert!(server.connect(&target()).is_err());
        assert!(server.connect(&target()).is_ok());

        server.fail_negotiation(true);
        let Err(err) = server.connect(&target()) else {
            panic!("negotiation should fail");
        };
        assert_eq!(err.kind(), "algorithm_negotiation");
        assert_eq!(server.connect_targets().len(), 3);
    }
}
