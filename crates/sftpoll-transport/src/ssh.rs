//! `libssh2` session backend.
//!
//! Sessions authenticate with a password or an in-memory private key, verify
//! the host key against the configured MD5 or SHA-256 fingerprint, and map
//! libssh2 status codes onto [`SessionError`] kinds.

use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sftpoll_config::Credential;
use sftpoll_core::{
    ConnectTarget, EntryKind, RemoteEntry, SessionConnector, SessionError, SessionResult,
    SftpSession,
};
use ssh2::{ErrorCode, HashType, Session, Sftp};
use tracing::debug;

const SFTP_NO_SUCH_FILE: i32 = 2;
const SESSION_KEX_FAILURE: i32 = -5;

/// Connector backed by `libssh2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ssh2Connector;

impl SessionConnector for Ssh2Connector {
    fn connect(&self, target: &ConnectTarget) -> SessionResult<Box<dyn SftpSession>> {
        let address = target
            .address()
            .to_socket_addrs()
            .map_err(|source| SessionError::io("resolve", target.address(), source))?
            .next()
            .ok_or_else(|| SessionError::Protocol {
                operation: "resolve",
                detail: format!("{} resolved to no addresses", target.address()),
            })?;
        let tcp = TcpStream::connect_timeout(&address, target.connect_timeout)
            .map_err(|source| SessionError::io("connect", target.address(), source))?;

        let mut session = Session::new().map_err(|err| map_ssh("session", None, &err))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(target.connect_timeout.as_millis()).unwrap_or(u32::MAX));
        session
            .handshake()
            .map_err(|err| map_ssh("handshake", None, &err))?;

        if let Some(expected) = &target.host_key_fingerprint {
            verify_host_key(&session, expected)?;
        }

        match &target.credential {
            Credential::Password(secret) => session
                .userauth_password(&target.username, secret.expose())
                .map_err(|err| auth_failure(target, &err))?,
            Credential::PrivateKey(secret) => session
                .userauth_pubkey_memory(&target.username, None, secret.expose(), None)
                .map_err(|err| auth_failure(target, &err))?,
            Credential::None => {}
        }
        if !session.authenticated() {
            return Err(SessionError::Authentication {
                username: target.username.clone(),
            });
        }

        let sftp = session.sftp().map_err(|err| map_ssh("sftp", None, &err))?;
        debug!(address = %target.address(), "libssh2 sftp channel opened");
        Ok(Box::new(Ssh2Session {
            session,
            sftp,
            cwd: PathBuf::from("."),
            open: true,
        }))
    }
}

fn auth_failure(target: &ConnectTarget, err: &ssh2::Error) -> SessionError {
    debug!(error = %err, username = %target.username, "ssh authentication rejected");
    SessionError::Authentication {
        username: target.username.clone(),
    }
}

fn verify_host_key(session: &Session, expected: &str) -> SessionResult<()> {
    let actual = if expected.starts_with("SHA256:") {
        session
            .host_key_hash(HashType::Sha256)
            .map(|digest| format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
    } else {
        session.host_key_hash(HashType::Md5).map(|digest| {
            digest
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect::<Vec<_>>()
                .join(":")
        })
    };
    let actual = actual.ok_or_else(|| SessionError::Protocol {
        operation: "host_key",
        detail: "server did not present a host key".to_string(),
    })?;
    let matches = if expected.starts_with("SHA256:") {
        actual == expected.trim_end_matches('=')
    } else {
        actual.eq_ignore_ascii_case(expected)
    };
    if matches {
        Ok(())
    } else {
        Err(SessionError::HostKeyMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

fn map_ssh(operation: &'static str, path: Option<&Path>, err: &ssh2::Error) -> SessionError {
    match err.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => SessionError::NotFound {
            operation,
            path: path.map(|p| p.display().to_string()).unwrap_or_default(),
        },
        ErrorCode::Session(SESSION_KEX_FAILURE) => SessionError::AlgorithmNegotiation {
            detail: err.message().to_string(),
        },
        _ => SessionError::Protocol {
            operation,
            detail: err.message().to_string(),
        },
    }
}

struct Ssh2Session {
    session: Session,
    sftp: Sftp,
    cwd: PathBuf,
    open: bool,
}

impl Ssh2Session {
    fn guard(&self, operation: &'static str) -> SessionResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(SessionError::NotConnected { operation })
        }
    }
}

impl SftpSession for Ssh2Session {
    fn change_dir(&mut self, directory: &str) -> SessionResult<()> {
        self.guard("change_dir")?;
        let path = Path::new(directory);
        let stat = self
            .sftp
            .stat(path)
            .map_err(|err| map_ssh("change_dir", Some(path), &err))?;
        if !stat.is_dir() {
            return Err(SessionError::not_found("change_dir", directory));
        }
        self.cwd = path.to_path_buf();
        Ok(())
    }

    fn list_dir(&mut self) -> SessionResult<Vec<RemoteEntry>> {
        self.guard("list_dir")?;
        let entries = self
            .sftp
            .readdir(&self.cwd)
            .map_err(|err| map_ssh("list_dir", Some(&self.cwd), &err))?;
        Ok(entries
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                if name == "." || name == ".." {
                    return None;
                }
                let kind = if stat.is_file() {
                    EntryKind::File
                } else if stat.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::Other
                };
                Some(RemoteEntry {
                    name,
                    kind,
                    size: stat.size,
                })
            })
            .collect())
    }

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
        self.guard("rename")?;
        let source = self.cwd.join(from);
        self.sftp
            .rename(&source, &self.cwd.join(to), None)
            .map_err(|err| map_ssh("rename", Some(&source), &err))
    }

    fn remove(&mut self, path: &str) -> SessionResult<()> {
        self.guard("remove")?;
        let target = self.cwd.join(path);
        self.sftp
            .unlink(&target)
            .map_err(|err| map_ssh("remove", Some(&target), &err))
    }

    fn file_size(&mut self, path: &str) -> SessionResult<u64> {
        self.guard("file_size")?;
        let target = self.cwd.join(path);
        let stat = self
            .sftp
            .stat(&target)
            .map_err(|err| map_ssh("file_size", Some(&target), &err))?;
        Ok(stat.size.unwrap_or_default())
    }

    fn download(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
        self.guard("download")?;
        let target = self.cwd.join(path);
        let mut file = self
            .sftp
            .open(&target)
            .map_err(|err| map_ssh("download", Some(&target), &err))?;
        let copied =
            io::copy(&mut file, sink).map_err(|source| SessionError::io("download", path, source))?;
        sink.flush()
            .map_err(|source| SessionError::io("download", path, source))?;
        Ok(copied)
    }

    fn upload(&mut self, path: &str, content: &[u8]) -> SessionResult<()> {
        self.guard("upload")?;
        let target = self.cwd.join(path);
        let mut file = self
            .sftp
            .create(&target)
            .map_err(|err| map_ssh("upload", Some(&target), &err))?;
        file.write_all(content)
            .map_err(|source| SessionError::io("upload", path, source))
    }

    fn is_connected(&self) -> bool {
        self.open && self.session.authenticated()
    }

    fn disconnect(&mut self) -> SessionResult<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.session
            .disconnect(None, "closing", None)
            .map_err(|err| map_ssh("disconnect", None, &err))
    }
}
