//! Resource manager: the authoritative set of listener configurations.
//!
//! # Design
//! - Listener definitions live in a single JSON property; every refresh
//!   rebuilds the full set and diffs it against the current one.
//! - A refresh that fails to decode leaves the current set untouched.
//! - Reads hand out `Arc<ListenerConfig>` snapshots so engines never observe
//!   a half-applied refresh.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::defaults::LISTENERS_KEY;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{ChangeKind, ChangeRecord, ListenerConfig, ListenerDefinition, ModuleSettings};
use crate::store::{PropertyStore, SecretResolver};

type ListenerMap = BTreeMap<Uuid, Arc<ListenerConfig>>;

#[derive(Default)]
struct RegistryState {
    init_attempted: bool,
    listeners: ListenerMap,
}

/// Thread-safe registry of resolved listener configurations.
pub struct ListenerRegistry {
    store: Arc<dyn PropertyStore>,
    secrets: Arc<dyn SecretResolver>,
    state: RwLock<RegistryState>,
}

impl ListenerRegistry {
    /// Create an empty registry over the given property store and secret resolver.
    #[must_use]
    pub fn new(store: Arc<dyn PropertyStore>, secrets: Arc<dyn SecretResolver>) -> Self {
        Self {
            store,
            secrets,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Load the listener set once. Later calls are no-ops, including after a
    /// failed first attempt.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener blob cannot be decoded on the first call.
    pub fn init(&self) -> ConfigResult<()> {
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.init_attempted {
                return Ok(());
            }
            state.init_attempted = true;
        }

        let loaded = self.load()?;
        let count = loaded.len();
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners = loaded;
        info!(listeners = count, "listener registry initialised");
        Ok(())
    }

    /// Snapshot of every configured listener, active or not.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ListenerConfig>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .values()
            .cloned()
            .collect()
    }

    /// Look up a listener by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Arc<ListenerConfig>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .get(&id)
            .cloned()
    }

    /// Module-wide settings read fresh from the property store.
    #[must_use]
    pub fn settings(&self) -> ModuleSettings {
        ModuleSettings::from_store(self.store.as_ref())
    }

    /// Reload the listener set after a configuration invalidation.
    ///
    /// The current set is replaced only when the diff is non-empty.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener blob cannot be decoded; the
    /// current set is kept in that case.
    pub fn on_update(&self) -> ConfigResult<Vec<ChangeRecord>> {
        let fresh = self.load()?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let changes = diff_listeners(&state.listeners, &fresh);
        if changes.is_empty() {
            debug!("listener refresh produced no changes");
        } else {
            info!(changes = changes.len(), "listener set changed");
            state.listeners = fresh;
        }
        Ok(changes)
    }

    fn load(&self) -> ConfigResult<ListenerMap> {
        let Some(raw) = self.store.get(LISTENERS_KEY) else {
            return Ok(ListenerMap::new());
        };
        if raw.trim().is_empty() {
            return Ok(ListenerMap::new());
        }

        let definitions: Vec<ListenerDefinition> =
            serde_json::from_str(&raw).map_err(|source| ConfigError::ListenerBlob {
                key: LISTENERS_KEY,
                source,
            })?;

        let mut listeners = ListenerMap::new();
        for definition in definitions {
            let config = ListenerConfig::resolve(definition, self.secrets.as_ref());
            if let Some(previous) = listeners.insert(config.id, Arc::new(config)) {
                warn!(
                    listener_id = %previous.id,
                    "duplicate listener definition; keeping the later entry"
                );
            }
        }
        Ok(listeners)
    }
}

/// Compare two listener sets and classify every difference.
///
/// Deletions are reported first, then updates, then additions; within each
/// group ids appear in ascending order.
#[must_use]
pub fn diff_listeners(old: &ListenerMap, new: &ListenerMap) -> Vec<ChangeRecord> {
    let deleted = old
        .keys()
        .filter(|id| !new.contains_key(id))
        .map(|id| ChangeRecord {
            id: *id,
            kind: ChangeKind::Deleted,
        });
    let updated = old
        .iter()
        .filter(|(id, config)| new.get(id).is_some_and(|fresh| fresh != *config))
        .map(|(id, _)| ChangeRecord {
            id: *id,
            kind: ChangeKind::Updated,
        });
    let added = new
        .keys()
        .filter(|id| !old.contains_key(id))
        .map(|id| ChangeRecord {
            id: *id,
            kind: ChangeKind::Added,
        });
    deleted.chain(updated).chain(added).collect()
}
