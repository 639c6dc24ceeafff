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

//! Polling engines, the shared worker pool and per-file tasks.
//!
//! Layout: `engine.rs` (listener thread lifecycle), `claim.rs` (exclusive
//! rename claims), `state.rs` (queue and backoff), `pool.rs`/`dispatch.rs`
//! (bounded worker hand-off), `task.rs` (download, process, housekeeping,
//! reply), `pipe.rs` (streaming body), `fault.rs` (fault replies).

pub mod claim;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fault;
pub mod pipe;
pub mod pool;
pub mod state;
pub mod task;

pub use claim::claim_files;
pub use dispatch::Dispatcher;
pub use engine::{EngineDeps, EnginePhase, PollingEngine};
pub use error::{ClaimError, ListenerError, ListenerResult, RejectReason};
pub use fault::{CLIENT_FAULT, SERVER_FAULT, fault_payload, size_limit_fault};
pub use pool::WorkerPool;
pub use state::{BackoffPolicy, EngineState, EngineTimings};
pub use task::{FileTask, ReplyKind, TaskContext, TaskReport};
