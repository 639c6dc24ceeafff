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

//! sftpoll module wiring for a host runtime.
//!
//! Layout: `bootstrap.rs` (dependency wiring), `module.rs` (listener
//! lifecycle controller), `host.rs` (host lifecycle events).

/// Module bootstrap.
pub mod bootstrap;
/// Module-level errors.
pub mod error;
/// Host lifecycle events.
pub mod host;
/// Listener lifecycle controller.
pub mod module;

pub use bootstrap::{ModuleDependencies, build_module, run_module, run_module_with};
pub use error::{ModuleError, ModuleResult};
pub use host::{HostEvent, spawn_host_event_loop};
pub use module::{ListenerModule, ListenerStatus, ModuleStatus, StaleListener};
