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

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (listener fixtures, gates, polling waits), memory.rs
//! (in-memory SFTP server with fault injection), local.rs (session backed by
//! a local directory), processors.rs (recording message processors).

pub mod fixtures;
pub mod local;
pub mod memory;
pub mod processors;

pub use fixtures::{FIXTURE_DIRECTORY, Gate, listener_config, listener_definition, wait_until};
pub use local::{LocalDirConnector, local_sandbox};
pub use memory::MemorySftp;
pub use processors::{RecordedRequest, RecordingProcessor, Reply};
