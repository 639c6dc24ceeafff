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

//! Backend-agnostic SFTP session and message processing contracts.

pub mod error;
pub mod model;
pub mod service;

pub use error::{SessionError, SessionResult};
pub use model::{
    ConnectTarget, DEFAULT_CONNECT_TIMEOUT, EntryKind, PROCESSED_SUFFIX, PROCESSING_SUFFIX,
    PayloadKind, ProcessingOutcome, ProcessingRequest, ProcessingStatus, RESPONSE_SUFFIX,
    RemoteEntry, ResponsePayload, has_marker_suffix,
};
pub use service::{MessageProcessor, SessionConnector, SftpSession, UnavailableConnector};
