//! Error types for listener configuration.

use thiserror::Error;
use uuid::Uuid;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A listener field held a value the engine cannot run with.
    #[error("invalid listener configuration")]
    InvalidField {
        /// Listener that failed validation.
        listener: Uuid,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// The serialized listener blob could not be decoded.
    #[error("listener definitions could not be decoded")]
    ListenerBlob {
        /// Property key holding the blob.
        key: &'static str,
        /// Source JSON error.
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        listener: Uuid,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            listener,
            field,
            reason,
            value,
        }
    }

    /// Field name for validation failures.
    #[must_use]
    pub const fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidField { field, .. } => Some(field),
            Self::ListenerBlob { .. } => None,
        }
    }

    /// Machine-readable reason for validation failures.
    #[must_use]
    pub const fn reason(&self) -> Option<&'static str> {
        match self {
            Self::InvalidField { reason, .. } => Some(reason),
            Self::ListenerBlob { .. } => None,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
