//! # Design
//!
//! - Structured, constant-message errors for engines and dispatch.
//! - Pool rejection is its own variant so the engine can retry without penalty.
//! - Fatal configuration is distinguishable from transient connect failures.

use std::io;

use sftpoll_config::ConfigError;
use sftpoll_transport::ClientError;
use thiserror::Error;

/// Result type for engine operations.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Why the worker pool refused a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every worker slot is busy.
    Full,
    /// The pool has been shut down.
    ShutDown,
}

impl RejectReason {
    /// Short label used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::ShutDown => "shut_down",
        }
    }
}

/// A claim pass that stopped early.
///
/// Files renamed before the failure are still owned by the caller.
#[derive(Debug, Error)]
#[error("claim pass interrupted")]
pub struct ClaimError {
    /// Original names of files already renamed to `.processing`.
    pub claimed: Vec<String>,
    /// Failure that ended the pass.
    #[source]
    pub source: ClientError,
}

impl ClaimError {
    pub(crate) const fn new(claimed: Vec<String>, source: ClientError) -> Self {
        Self { claimed, source }
    }
}

/// Errors produced while constructing or running a polling engine.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener configuration cannot be run.
    #[error("listener configuration is invalid")]
    InvalidConfig {
        /// Validation failure.
        #[source]
        source: ConfigError,
    },
    /// Talking to the remote server failed.
    #[error("sftp client failure")]
    Client(#[from] ClientError),
    /// The shared worker pool refused the task.
    #[error("worker pool rejected the task")]
    PoolRejected {
        /// File that could not be dispatched.
        file: String,
        /// Rejection cause.
        reason: RejectReason,
    },
    /// The engine thread could not be spawned.
    #[error("failed to spawn engine thread")]
    ThreadSpawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// `start` was called on an engine that already ran.
    #[error("engine already started")]
    AlreadyStarted,
}

impl ListenerError {
    /// Whether the failure is a pool rejection.
    #[must_use]
    pub const fn is_pool_rejected(&self) -> bool {
        matches!(self, Self::PoolRejected { .. })
    }

    /// Whether retrying cannot succeed without a configuration change.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidConfig { .. } => true,
            Self::Client(err) => err.as_connect().is_some_and(|connect| connect.is_fatal()),
            _ => false,
        }
    }

    /// Machine-readable reason recorded for stale listeners.
    #[must_use]
    pub fn stale_reason(&self) -> String {
        match self {
            Self::InvalidConfig { source } => format!(
                "invalid_{}",
                source.field().unwrap_or("configuration")
            ),
            Self::Client(err) => err
                .as_connect()
                .map_or("client_failure", |connect| connect.kind.label())
                .to_string(),
            Self::PoolRejected { .. } => "pool_rejected".to_string(),
            Self::ThreadSpawn { .. } => "thread_spawn_failed".to_string(),
            Self::AlreadyStarted => "already_started".to_string(),
        }
    }
}
