//! Property keys and default values for the polling listener module.
//!
//! # Design
//! - Centralize property keys so the registry and the host agree on names.
//! - Keep time-based defaults explicit for auditability.

use std::time::Duration;

/// Maximum accepted size of a claimed file in bytes (`0` disables the check).
pub const MESSAGE_MAX_BYTES_KEY: &str = "sftp.polling.messageMaxBytes";
/// Global cap on concurrently processed files across all listeners.
pub const WORKER_THREAD_LIMIT_KEY: &str = "sftp.polling.workerThreadLimit";
/// Long backoff applied once an engine hits the consecutive error ceiling.
pub const CONNECT_ERROR_SLEEP_KEY: &str = "sftp.polling.connectErrorSleepSeconds";
/// Seconds a file task waits for its download thread to finish.
pub const DOWNLOAD_WAIT_KEY: &str = "sftp.polling.downloadThreadWaitSeconds";
/// Serialized JSON array of listener definitions.
pub const LISTENERS_KEY: &str = "sftp.polling.listeners";

/// Default message size limit (5 MiB).
pub const DEFAULT_MESSAGE_MAX_BYTES: u64 = 5_242_880;
/// Default worker pool size.
pub const DEFAULT_WORKER_THREAD_LIMIT: usize = 25;
/// Smallest worker pool size the module will run with.
pub const MIN_WORKER_THREAD_LIMIT: usize = 5;
/// Default long backoff.
pub const DEFAULT_CONNECT_ERROR_SLEEP: Duration = Duration::from_secs(60);
/// Lower clamp for the long backoff.
pub const MIN_CONNECT_ERROR_SLEEP: Duration = Duration::from_secs(10);
/// Upper clamp for the long backoff (24 hours).
pub const MAX_CONNECT_ERROR_SLEEP: Duration = Duration::from_secs(86_400);
/// Default download thread wait.
pub const DEFAULT_DOWNLOAD_WAIT: Duration = Duration::from_secs(3);
/// Default polling interval when a definition omits one.
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 60;
/// Default content type applied to claimed files.
pub const DEFAULT_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
/// Default SSH port.
pub const DEFAULT_PORT: i32 = 22;
