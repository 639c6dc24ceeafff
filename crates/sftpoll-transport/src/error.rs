//! # Design
//!
//! - Connection establishment failures are classified once, into a closed set
//!   of kinds, so callers match on variants instead of messages.
//! - Keep error messages constant; store operational context in fields.

use sftpoll_core::SessionError;
use thiserror::Error;

/// Classification of a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectErrorKind {
    /// The configured remote directory does not exist; retrying will not help.
    DirectoryNotFound,
    /// Client and server share no acceptable algorithms.
    AlgorithmNegotiation,
    /// Network, authentication or any other failure.
    Other,
}

impl ConnectErrorKind {
    /// Short label used in logs, metrics and events.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DirectoryNotFound => "directory_not_found",
            Self::AlgorithmNegotiation => "algorithm_negotiation",
            Self::Other => "other",
        }
    }
}

/// Failure to establish a usable session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("sftp connection failed")]
pub struct ConnectError {
    /// Failure classification.
    pub kind: ConnectErrorKind,
    /// Human-readable diagnostic.
    pub message: String,
}

impl ConnectError {
    /// Classify a failure raised while connecting or authenticating.
    #[must_use]
    pub fn from_connect(err: &SessionError) -> Self {
        let kind = match err {
            SessionError::AlgorithmNegotiation { .. } => ConnectErrorKind::AlgorithmNegotiation,
            _ => ConnectErrorKind::Other,
        };
        Self {
            kind,
            message: err.describe(),
        }
    }

    /// Classify a failure raised while entering the configured directory.
    #[must_use]
    pub fn from_change_dir(directory: &str, err: &SessionError) -> Self {
        if err.is_not_found() {
            Self {
                kind: ConnectErrorKind::DirectoryNotFound,
                message: format!("remote directory {directory} does not exist"),
            }
        } else {
            Self {
                kind: ConnectErrorKind::Other,
                message: err.describe(),
            }
        }
    }

    /// Whether the failure is a configuration problem rather than a transient one.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ConnectErrorKind::DirectoryNotFound)
    }
}

/// Errors surfaced by [`ConnectionClient`](crate::ConnectionClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No session could be established.
    #[error("sftp connection unavailable")]
    Connect(#[from] ConnectError),
    /// The session was established but the operation failed.
    #[error("sftp operation failed")]
    Operation {
        /// Operation that failed.
        operation: &'static str,
        /// Underlying session failure.
        #[source]
        source: SessionError,
    },
    /// The listener configuration cannot describe a connection target.
    #[error("invalid connection target")]
    InvalidTarget {
        /// Offending field.
        field: &'static str,
    },
}

impl ClientError {
    /// The connect failure, if this error came from session establishment.
    #[must_use]
    pub const fn as_connect(&self) -> Option<&ConnectError> {
        match self {
            Self::Connect(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the failure was a missing remote path during an operation.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Operation { source, .. } if source.is_not_found())
    }

    /// Human-readable description including structured context.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Connect(err) => err.message.clone(),
            Self::Operation { source, .. } => source.describe(),
            Self::InvalidTarget { field } => format!("invalid connection target field {field}"),
        }
    }
}

/// Convenience alias for client results.
pub type ClientResult<T> = Result<T, ClientError>;
