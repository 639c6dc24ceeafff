//! Validation helpers and property parsing utilities.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use tracing::warn;

use crate::defaults::{MAX_CONNECT_ERROR_SLEEP, MIN_CONNECT_ERROR_SLEEP, MIN_WORKER_THREAD_LIMIT};
use crate::error::{ConfigError, ConfigResult};
use crate::model::ListenerConfig;
use crate::store::PropertyStore;

const SHA256_PREFIX: &str = "SHA256:";

/// Check that a resolved listener can be run.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending field.
pub fn validate_listener(config: &ListenerConfig) -> ConfigResult<()> {
    let id = config.id;
    if config.hostname.is_empty() {
        return Err(ConfigError::invalid(id, "hostname", "empty", None));
    }
    if config.port_u16().is_none() {
        return Err(ConfigError::invalid(
            id,
            "port",
            "out_of_range",
            Some(config.port.to_string()),
        ));
    }
    if config.directory.is_empty() {
        return Err(ConfigError::invalid(id, "directory", "empty", None));
    }
    if config.username.trim().is_empty() {
        return Err(ConfigError::invalid(id, "username", "empty", None));
    }
    if config.polling_interval < Duration::from_secs(1) {
        return Err(ConfigError::invalid(
            id,
            "polling_interval_secs",
            "below_minimum",
            Some(config.polling_interval.as_secs().to_string()),
        ));
    }
    if let Some(fingerprint) = &config.host_key_fingerprint
        && !is_valid_fingerprint(fingerprint)
    {
        return Err(ConfigError::invalid(
            id,
            "host_key_fingerprint",
            "malformed",
            Some(fingerprint.clone()),
        ));
    }
    if !config.is_xml() && config.hardwired_service.is_none() {
        return Err(ConfigError::invalid(
            id,
            "hardwired_service",
            "required_for_non_xml_content",
            Some(config.content_type.clone()),
        ));
    }
    Ok(())
}

/// Accepts `aa:bb:..` MD5 fingerprints (16 octets) and `SHA256:<base64>` digests.
#[must_use]
pub fn is_valid_fingerprint(value: &str) -> bool {
    if let Some(encoded) = value.strip_prefix(SHA256_PREFIX) {
        return STANDARD_NO_PAD
            .decode(encoded.trim_end_matches('='))
            .is_ok_and(|digest| digest.len() == 32);
    }
    let octets: Vec<&str> = value.split(':').collect();
    octets.len() == 16
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse an unsigned integer property, warning when the stored value is not numeric.
pub fn parse_u64_property(store: &dyn PropertyStore, key: &'static str) -> Option<u64> {
    let raw = store.get(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = %raw, error = %err, "ignoring unparsable property; using default");
            None
        }
    }
}

/// Raise a configured pool size to the supported minimum.
#[must_use]
pub fn clamp_worker_limit(limit: usize) -> usize {
    limit.max(MIN_WORKER_THREAD_LIMIT)
}

/// Keep the long backoff within its supported window.
#[must_use]
pub fn clamp_connect_error_sleep(value: Duration) -> Duration {
    value.clamp(MIN_CONNECT_ERROR_SLEEP, MAX_CONNECT_ERROR_SLEEP)
}
