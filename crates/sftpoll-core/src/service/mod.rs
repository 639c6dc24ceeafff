//! Collaborator traits implemented by SFTP backends and message processors.
//!
//! All traits are blocking: polling engines run on dedicated threads and the
//! file tasks run on the blocking worker pool.

use std::io::Write;

use crate::error::{SessionError, SessionResult};
use crate::model::{ConnectTarget, ProcessingOutcome, ProcessingRequest, RemoteEntry};

/// One authenticated SFTP session. Paths are relative to the directory set by
/// [`SftpSession::change_dir`].
pub trait SftpSession: Send {
    /// Change the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] when the directory does not exist.
    fn change_dir(&mut self, directory: &str) -> SessionResult<()>;

    /// List the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the listing fails.
    fn list_dir(&mut self) -> SessionResult<Vec<RemoteEntry>>;

    /// Rename `from` to `to`; fails if `from` is missing.
    ///
    /// # Errors
    ///
    /// Returns an error when the rename is refused.
    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()>;

    /// Remove a file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be removed.
    fn remove(&mut self, path: &str) -> SessionResult<()>;

    /// Size of a file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be stat'ed.
    fn file_size(&mut self, path: &str) -> SessionResult<u64>;

    /// Stream a file into `sink`, returning the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error when reading the file or writing the sink fails.
    fn download(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64>;

    /// Create or replace a file with `content`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    fn upload(&mut self, path: &str, content: &[u8]) -> SessionResult<()>;

    /// Whether the session can still be used.
    fn is_connected(&self) -> bool;

    /// Close the session.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails to shut down cleanly.
    fn disconnect(&mut self) -> SessionResult<()> {
        Ok(())
    }
}

/// Opens sessions for a connection target.
pub trait SessionConnector: Send + Sync {
    /// Establish and authenticate a session.
    ///
    /// # Errors
    ///
    /// Returns an error when the host is unreachable, authentication fails
    /// or the host key does not match.
    fn connect(&self, target: &ConnectTarget) -> SessionResult<Box<dyn SftpSession>>;
}

/// Message processing pipeline that turns a request body into a reply.
pub trait MessageProcessor: Send + Sync {
    /// Process one request.
    ///
    /// # Errors
    ///
    /// Any error is converted into a generic server fault by the caller.
    fn process(&self, request: ProcessingRequest) -> anyhow::Result<ProcessingOutcome>;
}

/// Connector that always refuses, used when no backend is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

impl SessionConnector for UnavailableConnector {
    fn connect(&self, _target: &ConnectTarget) -> SessionResult<Box<dyn SftpSession>> {
        Err(SessionError::Protocol {
            operation: "connect",
            detail: "no sftp backend is available".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpoll_config::Credential;
    use std::time::Duration;

    #[test]
    fn unavailable_connector_refuses() {
        let target = ConnectTarget {
            host: "localhost".to_string(),
            port: 22,
            username: "svc".to_string(),
            credential: Credential::None,
            host_key_fingerprint: None,
            connect_timeout: Duration::from_secs(1),
        };
        let Err(err) = UnavailableConnector.connect(&target) else {
            panic!("connector should refuse");
        };
        assert_eq!(err.kind(), "protocol");
    }
}
