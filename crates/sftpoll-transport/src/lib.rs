#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::redundant_pub_crate)]

//! Connection client shared by a polling engine and its file tasks.
//!
//! Layout: `client.rs` (lock-guarded session wrapper), `error.rs` (connect
//! classification), `throttle.rs` (process-wide notification rate limit),
//! `observer.rs` (notification sinks), `ssh.rs` (`libssh2` backend, behind the
//! `ssh2` feature).

pub mod client;
pub mod error;
pub mod observer;
#[cfg(feature = "ssh2")]
pub mod ssh;
pub mod throttle;

pub use client::ConnectionClient;
pub use error::{ClientError, ClientResult, ConnectError, ConnectErrorKind};
pub use observer::{ConnectionObserver, EventBusObserver};
#[cfg(feature = "ssh2")]
pub use ssh::Ssh2Connector;
pub use throttle::{DEFAULT_QUIET_WINDOW, NotificationKind, NotificationThrottle};
