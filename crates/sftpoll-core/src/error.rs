//! Error types raised by SFTP session backends.

use std::io;

use thiserror::Error;

/// Failure reported by an [`SftpSession`](crate::SftpSession) or
/// [`SessionConnector`](crate::SessionConnector).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Remote path does not exist.
    #[error("remote path not found")]
    NotFound {
        /// Operation that failed.
        operation: &'static str,
        /// Remote path involved.
        path: String,
    },
    /// Client and server share no acceptable cipher, MAC or key exchange.
    #[error("ssh algorithm negotiation failed")]
    AlgorithmNegotiation {
        /// Backend diagnostic.
        detail: String,
    },
    /// The server refused the supplied credential.
    #[error("ssh authentication failed")]
    Authentication {
        /// Login name used.
        username: String,
    },
    /// The server host key did not match the configured fingerprint.
    #[error("ssh host key mismatch")]
    HostKeyMismatch {
        /// Configured fingerprint.
        expected: String,
        /// Fingerprint presented by the server.
        actual: String,
    },
    /// The session was used after it disconnected.
    #[error("sftp session is not connected")]
    NotConnected {
        /// Operation that was attempted.
        operation: &'static str,
    },
    /// Transport or local stream I/O failed.
    #[error("sftp i/o failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Remote path involved, when known.
        path: Option<String>,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The server answered with an unexpected status.
    #[error("sftp protocol failure")]
    Protocol {
        /// Operation that failed.
        operation: &'static str,
        /// Backend diagnostic.
        detail: String,
    },
}

impl SessionError {
    /// Convenience constructor for I/O failures on a known path.
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }

    /// Convenience constructor for missing remote paths.
    #[must_use]
    pub fn not_found(operation: &'static str, path: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            path: path.into(),
        }
    }

    /// Whether the failure means the remote path does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlgorithmNegotiation { .. } => "algorithm_negotiation",
            Self::Authentication { .. } => "authentication",
            Self::HostKeyMismatch { .. } => "host_key_mismatch",
            Self::NotConnected { .. } => "not_connected",
            Self::Io { .. } => "io",
            Self::Protocol { .. } => "protocol",
        }
    }

    /// Human-readable description including structured context.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::NotFound { operation, path } => format!("{operation}: {path} not found"),
            Self::AlgorithmNegotiation { detail } => {
                format!("algorithm negotiation failed: {detail}")
            }
            Self::Authentication { username } => {
                format!("authentication failed for user {username}")
            }
            Self::HostKeyMismatch { expected, actual } => {
                format!("host key {actual} does not match expected {expected}")
            }
            Self::NotConnected { operation } => format!("{operation}: not connected"),
            Self::Io {
                operation,
                path,
                source,
            } => match path {
                Some(path) => format!("{operation} {path}: {source}"),
                None => format!("{operation}: {source}"),
            },
            Self::Protocol { operation, detail } => format!("{operation}: {detail}"),
        }
    }
}

/// Convenience alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_descriptions() {
        let err = SessionError::not_found("change_dir", "/inbox");
        assert!(err.is_not_found());
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.describe(), "change_dir: /inbox not found");
        assert_eq!(err.to_string(), "remote path not found");

        let io_err = SessionError::io("upload", "a.response", io::Error::other("disk full"));
        assert!(!io_err.is_not_found());
        assert_eq!(io_err.describe(), "upload a.response: disk full");
        assert!(std::error::Error::source(&io_err).is_some());
    }
}
