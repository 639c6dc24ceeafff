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

//! Listener configuration facade backed by cluster properties.
//!
//! Layout: `model.rs` (definitions, resolved listeners, module settings),
//! `validate.rs` (fatal-configuration checks and property parsing),
//! `store.rs` (property store and secret resolver seams), `registry.rs`
//! (`ListenerRegistry` and change diffs).

pub mod defaults;
pub mod error;
pub mod model;
pub mod registry;
pub mod store;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{
    ChangeKind, ChangeRecord, Credential, ListenerConfig, ListenerDefinition, ModuleSettings,
    Secret, SharedSettings,
};
pub use registry::{ListenerRegistry, diff_listeners};
pub use store::{MemoryPropertyStore, PropertyStore, SecretResolver, StaticSecretResolver};
pub use validate::validate_listener;
