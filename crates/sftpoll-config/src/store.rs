//! Property store and secret resolver seams.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::{Result, anyhow};
use uuid::Uuid;

/// Read-only view of the cluster property table.
pub trait PropertyStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;
}

/// Decrypts stored credentials by id.
pub trait SecretResolver: Send + Sync {
    /// Resolve the plaintext for `secret_id`.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret is unknown or cannot be decrypted.
    fn resolve(&self, secret_id: Uuid) -> Result<String>;
}

/// In-memory property table used by embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPropertyStore {
    /// Insert or replace a property.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Remove a property.
    pub fn remove(&self, key: &str) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

/// Fixed secret table.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretResolver {
    secrets: HashMap<Uuid, String>,
}

impl StaticSecretResolver {
    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, secret_id: Uuid, plaintext: impl Into<String>) -> Self {
        self.secrets.insert(secret_id, plaintext.into());
        self
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve(&self, secret_id: Uuid) -> Result<String> {
        self.secrets
            .get(&secret_id)
            .cloned()
            .ok_or_else(|| anyhow!("secret {secret_id} is not stored"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_values() {
        let store = MemoryPropertyStore::default();
        assert!(store.get("a").is_none());
        store.set("a", "1");
        assert_eq!(store.get("a").as_deref(), Some("1"));
        store.remove("a");
        assert!(store.get("a").is_none());
    }

    #[test]
    fn static_resolver_reports_unknown_ids() {
        let id = Uuid::from_u128(1);
        let resolver = StaticSecretResolver::default().with(id, "pw");
        assert_eq!(resolver.resolve(id).expect("known secret"), "pw");
        assert!(resolver.resolve(Uuid::from_u128(2)).is_err());
    }
}
