//! Typed listener models and module settings.
//!
//! # Design
//! - `ListenerDefinition` is the persisted form; credentials are secret references.
//! - `ListenerConfig` is the resolved form handed to engines and is never mutated;
//!   a changed listener arrives as a new instance with a bumped version.
//! - Two resolved listeners are equal iff their id and version match.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::defaults::{
    CONNECT_ERROR_SLEEP_KEY, DEFAULT_CONNECT_ERROR_SLEEP, DEFAULT_CONTENT_TYPE,
    DEFAULT_DOWNLOAD_WAIT, DEFAULT_MESSAGE_MAX_BYTES, DEFAULT_POLLING_INTERVAL_SECS, DEFAULT_PORT,
    DEFAULT_WORKER_THREAD_LIMIT, DOWNLOAD_WAIT_KEY, MESSAGE_MAX_BYTES_KEY,
    WORKER_THREAD_LIMIT_KEY,
};
use crate::store::{PropertyStore, SecretResolver};
use crate::validate::{clamp_connect_error_sleep, clamp_worker_limit, parse_u64_property};

/// Persisted listener definition as stored in the cluster property blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListenerDefinition {
    /// Stable listener identifier.
    pub id: Uuid,
    /// Monotonic version bumped on every edit.
    pub version: i64,
    /// Display name used in logs and events.
    pub name: String,
    /// Whether the listener should be polled.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Remote SFTP host.
    #[serde(default)]
    pub hostname: String,
    /// Remote SSH port.
    #[serde(default = "default_port")]
    pub port: i32,
    /// Login name on the remote host.
    #[serde(default)]
    pub username: String,
    /// Stored password reference.
    #[serde(default)]
    pub password_secret: Option<Uuid>,
    /// Stored private key reference; takes precedence over the password.
    #[serde(default)]
    pub private_key_secret: Option<Uuid>,
    /// Expected host key fingerprint.
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
    /// Remote directory scanned for candidate files.
    #[serde(default)]
    pub directory: String,
    /// Pause between scans that found nothing, in seconds.
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: u64,
    /// Content type attached to claimed files.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Delete claimed files instead of renaming them to `.processed`.
    #[serde(default)]
    pub delete_on_receive: bool,
    /// Upload reply payloads as `.response` files.
    #[serde(default)]
    pub enable_responses: bool,
    /// Destination service the processor should route to.
    #[serde(default)]
    pub hardwired_service: Option<Uuid>,
    /// File extensions the claim scan never touches.
    #[serde(default)]
    pub ignored_extensions: Vec<String>,
}

const fn default_active() -> bool {
    true
}

const fn default_port() -> i32 {
    DEFAULT_PORT
}

const fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// Secret material resolved from the credential store.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap plaintext secret material.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("Secret(***)")
    }
}

/// Credential used to authenticate against the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// No credential could be resolved; connecting will fail authentication.
    None,
    /// Password authentication.
    Password(Secret),
    /// Public key authentication with a PEM-encoded private key.
    PrivateKey(Secret),
}

impl Credential {
    /// Whether a usable credential is present.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Resolved, immutable listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Stable listener identifier.
    pub id: Uuid,
    /// Version of the definition this config was resolved from.
    pub version: i64,
    /// Display name.
    pub name: String,
    /// Whether an engine should run for this listener.
    pub active: bool,
    /// Remote SFTP host.
    pub hostname: String,
    /// Remote SSH port as configured (validated before use).
    pub port: i32,
    /// Login name.
    pub username: String,
    /// Resolved credential.
    pub credential: Credential,
    /// Expected host key fingerprint.
    pub host_key_fingerprint: Option<String>,
    /// Remote directory.
    pub directory: String,
    /// Pause between empty scans.
    pub polling_interval: Duration,
    /// Content type attached to claimed files.
    pub content_type: String,
    /// Delete claimed files instead of renaming them.
    pub delete_on_receive: bool,
    /// Upload reply payloads.
    pub enable_responses: bool,
    /// Destination service passed to the processor.
    pub hardwired_service: Option<Uuid>,
    /// Extensions skipped by the claim scan, without leading dots.
    pub ignored_extensions: Vec<String>,
}

impl ListenerConfig {
    /// Resolve a persisted definition, decrypting referenced secrets.
    ///
    /// Resolution failures are logged and leave the listener without a credential.
    #[must_use]
    pub fn resolve(definition: ListenerDefinition, secrets: &dyn SecretResolver) -> Self {
        let credential = resolve_credential(&definition, secrets);
        let ignored_extensions = definition
            .ignored_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            id: definition.id,
            version: definition.version,
            name: definition.name,
            active: definition.active,
            hostname: definition.hostname.trim().to_string(),
            port: definition.port,
            username: definition.username,
            credential,
            host_key_fingerprint: definition
                .host_key_fingerprint
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            directory: definition.directory.trim().to_string(),
            polling_interval: Duration::from_secs(definition.polling_interval_secs),
            content_type: definition.content_type,
            delete_on_receive: definition.delete_on_receive,
            enable_responses: definition.enable_responses,
            hardwired_service: definition.hardwired_service,
            ignored_extensions,
        }
    }

    /// Whether claimed files are treated as XML documents.
    #[must_use]
    pub fn is_xml(&self) -> bool {
        let essence = self
            .content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "text/xml" || essence == "application/xml" || essence.ends_with("+xml")
    }

    /// Port as an unsigned value, if it lies within the valid range.
    #[must_use]
    pub fn port_u16(&self) -> Option<u16> {
        u16::try_from(self.port).ok().filter(|port| *port != 0)
    }

    /// Whether `file_name` ends with one of the ignored extensions.
    #[must_use]
    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.ignored_extensions.iter().any(|ext| {
            file_name.len() > ext.len() + 1
                && file_name.ends_with(ext.as_str())
                && file_name.as_bytes()[file_name.len() - ext.len() - 1] == b'.'
        })
    }
}

impl PartialEq for ListenerConfig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

impl Eq for ListenerConfig {}

fn resolve_credential(definition: &ListenerDefinition, secrets: &dyn SecretResolver) -> Credential {
    if let Some(secret_id) = definition.private_key_secret {
        return lookup(definition, secrets, secret_id, "private_key")
            .map_or(Credential::None, Credential::PrivateKey);
    }
    if let Some(secret_id) = definition.password_secret {
        return lookup(definition, secrets, secret_id, "password")
            .map_or(Credential::None, Credential::Password);
    }
    Credential::None
}

fn lookup(
    definition: &ListenerDefinition,
    secrets: &dyn SecretResolver,
    secret_id: Uuid,
    kind: &'static str,
) -> Option<Secret> {
    match secrets.resolve(secret_id) {
        Ok(value) => Some(Secret::new(value)),
        Err(err) => {
            warn!(
                error = %err,
                listener_id = %definition.id,
                secret_id = %secret_id,
                kind,
                "failed to resolve stored credential; continuing without it"
            );
            None
        }
    }
}

/// Module-wide tuning resolved from cluster properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSettings {
    /// Largest claimed file accepted for processing (`0` = unlimited).
    pub max_message_bytes: u64,
    /// Global worker pool size.
    pub worker_thread_limit: usize,
    /// Long backoff applied after repeated engine failures.
    pub connect_error_sleep: Duration,
    /// How long a task waits for its download thread.
    pub download_wait: Duration,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MESSAGE_MAX_BYTES,
            worker_thread_limit: DEFAULT_WORKER_THREAD_LIMIT,
            connect_error_sleep: DEFAULT_CONNECT_ERROR_SLEEP,
            download_wait: DEFAULT_DOWNLOAD_WAIT,
        }
    }
}

impl ModuleSettings {
    /// Read settings from the property store, falling back to defaults for
    /// missing or unparsable values.
    #[must_use]
    pub fn from_store(store: &dyn PropertyStore) -> Self {
        let defaults = Self::default();
        let max_message_bytes = parse_u64_property(store, MESSAGE_MAX_BYTES_KEY)
            .unwrap_or(defaults.max_message_bytes);
        let worker_thread_limit = parse_u64_property(store, WORKER_THREAD_LIMIT_KEY)
            .map_or(defaults.worker_thread_limit, |value| {
                clamp_worker_limit(usize::try_from(value).unwrap_or(usize::MAX))
            });
        let connect_error_sleep = parse_u64_property(store, CONNECT_ERROR_SLEEP_KEY)
            .map_or(defaults.connect_error_sleep, |secs| {
                clamp_connect_error_sleep(Duration::from_secs(secs))
            });
        let download_wait = parse_u64_property(store, DOWNLOAD_WAIT_KEY)
            .map_or(defaults.download_wait, Duration::from_secs);

        Self {
            max_message_bytes,
            worker_thread_limit,
            connect_error_sleep,
            download_wait,
        }
    }
}

/// Module settings shared between the controller and running engines.
///
/// Readers take a copy per use, so a replacement applies to the next task
/// or engine that reads it.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<ModuleSettings>>,
}

impl SharedSettings {
    /// Handle starting with `settings`.
    #[must_use]
    pub fn new(settings: ModuleSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Settings as of now.
    #[must_use]
    pub fn current(&self) -> ModuleSettings {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in `settings`, returning the previous value.
    pub fn replace(&self, settings: ModuleSettings) -> ModuleSettings {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, settings)
    }
}

/// Kind of difference between two listener sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Listener appeared in the new set.
    Added,
    /// Listener exists in both sets with a different configuration.
    Updated,
    /// Listener disappeared from the new set.
    Deleted,
}

/// One listener-level change produced by a registry refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Listener identifier.
    pub id: Uuid,
    /// Change classification.
    pub kind: ChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryPropertyStore, StaticSecretResolver};

    fn definition() -> ListenerDefinition {
        ListenerDefinition {
            id: Uuid::from_u128(7),
            version: 1,
            name: "inbound".to_string(),
            active: true,
            hostname: " sftp.example.com ".to_string(),
            port: 22,
            username: "gateway".to_string(),
            password_secret: Some(Uuid::from_u128(100)),
            private_key_secret: None,
            host_key_fingerprint: Some(String::new()),
            directory: "/inbox".to_string(),
            polling_interval_secs: 30,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            delete_on_receive: false,
            enable_responses: true,
            hardwired_service: None,
            ignored_extensions: vec![".tmp".to_string(), "part".to_string(), " ".to_string()],
        }
    }

    #[test]
    fn resolve_decrypts_password_and_normalises_fields() {
        let secrets = StaticSecretResolver::default().with(Uuid::from_u128(100), "hunter2");
        let config = ListenerConfig::resolve(definition(), &secrets);
        assert_eq!(config.hostname, "sftp.example.com");
        assert_eq!(config.credential, Credential::Password(Secret::new("hunter2")));
        assert!(config.host_key_fingerprint.is_none());
        assert_eq!(config.ignored_extensions, vec!["tmp", "part"]);
        assert_eq!(config.polling_interval, Duration::from_secs(30));
    }

    #[test]
    fn resolve_treats_missing_secret_as_no_credential() {
        let config = ListenerConfig::resolve(definition(), &StaticSecretResolver::default());
        assert_eq!(config.credential, Credential::None);
        assert!(!config.credential.is_present());
    }

    #[test]
    fn private_key_takes_precedence() {
        let mut def = definition();
        def.private_key_secret = Some(Uuid::from_u128(200));
        let secrets = StaticSecretResolver::default()
            .with(Uuid::from_u128(100), "hunter2")
            .with(Uuid::from_u128(200), "-----BEGIN KEY-----");
        let config = ListenerConfig::resolve(def, &secrets);
        assert!(matches!(config.credential, Credential::PrivateKey(_)));
    }

    #[test]
    fn equality_is_identity_and_version() {
        let secrets = StaticSecretResolver::default();
        let first = ListenerConfig::resolve(definition(), &secrets);
        let mut renamed = definition();
        renamed.name = "renamed".to_string();
        let same_version = ListenerConfig::resolve(renamed.clone(), &secrets);
        assert_eq!(first, same_version);

        renamed.version = 2;
        let bumped = ListenerConfig::resolve(renamed, &secrets);
        assert_ne!(first, bumped);
    }

    #[test]
    fn xml_detection_and_ignored_extensions() {
        let mut config = ListenerConfig::resolve(definition(), &StaticSecretResolver::default());
        assert!(config.is_xml());
        assert!(config.is_ignored("batch.tmp"));
        assert!(config.is_ignored("batch.xml.part"));
        assert!(!config.is_ignored("batchtmp"));
        assert!(!config.is_ignored(".tmp"));

        config.content_type = "application/octet-stream".to_string();
        assert!(!config.is_xml());
        config.content_type = "application/soap+xml; charset=utf-8".to_string();
        assert!(config.is_xml());
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "Secret(***)");
    }

    #[test]
    fn module_settings_apply_defaults_and_clamps() {
        let store = MemoryPropertyStore::default();
        assert_eq!(ModuleSettings::from_store(&store), ModuleSettings::default());

        store.set(WORKER_THREAD_LIMIT_KEY, "2");
        store.set(CONNECT_ERROR_SLEEP_KEY, "1");
        store.set(MESSAGE_MAX_BYTES_KEY, "not-a-number");
        store.set(DOWNLOAD_WAIT_KEY, "7");
        let settings = ModuleSettings::from_store(&store);
        assert_eq!(settings.worker_thread_limit, 5);
        assert_eq!(settings.connect_error_sleep, Duration::from_secs(10));
        assert_eq!(settings.max_message_bytes, DEFAULT_MESSAGE_MAX_BYTES);
        assert_eq!(settings.download_wait, Duration::from_secs(7));

        store.set(CONNECT_ERROR_SLEEP_KEY, "999999");
        let settings = ModuleSettings::from_store(&store);
        assert_eq!(settings.connect_error_sleep, Duration::from_secs(86_400));
    }

    #[test]
    fn shared_settings_are_visible_through_every_clone() {
        let shared = SharedSettings::new(ModuleSettings::default());
        let reader = shared.clone();
        let updated = ModuleSettings {
            max_message_bytes: 16,
            ..ModuleSettings::default()
        };
        assert_eq!(shared.replace(updated), ModuleSettings::default());
        assert_eq!(reader.current().max_message_bytes, 16);
    }
}
