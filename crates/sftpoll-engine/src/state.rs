//! Polling loop bookkeeping and backoff policy.

use std::collections::VecDeque;
use std::time::Duration;

use sftpoll_config::ModuleSettings;

/// Short delay used after a pool rejection or a transient failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Consecutive failures that switch the engine to the long backoff.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// How long `ensure_stopped` waits, measured from the stop request.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(7);

/// Delays applied between polling iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after a rejection or a failure below the threshold.
    pub retry_delay: Duration,
    /// Failures in a row before switching to `long_backoff`.
    pub max_consecutive_errors: u32,
    /// Delay once the threshold is reached.
    pub long_backoff: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_settings(&ModuleSettings::default())
    }
}

impl BackoffPolicy {
    /// Policy using the module's configured long backoff.
    #[must_use]
    pub const fn from_settings(settings: &ModuleSettings) -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            long_backoff: settings.connect_error_sleep,
        }
    }

    /// Delay after the `consecutive_errors`-th failure in a row.
    #[must_use]
    pub const fn delay_after_failure(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors >= self.max_consecutive_errors {
            self.long_backoff
        } else {
            self.retry_delay
        }
    }
}

/// Timings an engine runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineTimings {
    /// Backoff policy.
    pub policy: BackoffPolicy,
    /// Stop deadline measured from the stop request.
    pub shutdown_timeout: Duration,
}

impl EngineTimings {
    /// Standard timings for `settings`.
    #[must_use]
    pub const fn from_settings(settings: &ModuleSettings) -> Self {
        Self {
            policy: BackoffPolicy::from_settings(settings),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Queue and error counters carried between iterations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineState {
    queue: VecDeque<String>,
    retry: Option<String>,
    consecutive_errors: u32,
}

impl EngineState {
    /// Whether the directory must be scanned before the next dispatch.
    #[must_use]
    pub fn needs_scan(&self) -> bool {
        self.retry.is_none() && self.queue.is_empty()
    }

    /// Append freshly claimed files.
    pub fn enqueue(&mut self, files: impl IntoIterator<Item = String>) {
        self.queue.extend(files);
    }

    /// Next file to dispatch; a pending retry always goes first.
    pub fn next_file(&mut self) -> Option<String> {
        self.retry.take().or_else(|| self.queue.pop_front())
    }

    /// A dispatch succeeded.
    pub const fn record_success(&mut self) {
        self.consecutive_errors = 0;
    }

    /// The pool refused `file`; it is retried before anything else.
    pub fn record_rejection(&mut self, file: String) {
        self.retry = Some(file);
    }

    /// An iteration failed; returns the new failure count.
    pub const fn record_failure(&mut self) -> u32 {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.consecutive_errors
    }

    /// Failures since the last successful dispatch.
    #[must_use]
    pub const fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// File waiting for a worker slot, if any.
    #[must_use]
    pub fn pending_retry(&self) -> Option<&str> {
        self.retry.as_deref()
    }

    /// Remove every claimed file not yet dispatched, pending retry first.
    pub fn drain(&mut self) -> Vec<String> {
        self.retry.take().into_iter().chain(self.queue.drain(..)).collect()
    }
}
