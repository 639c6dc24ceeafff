//! # Design
//!
//! - Centralize module-level errors for bootstrap and lifecycle handling.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for module operations.
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Module-level error type.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: sftpoll_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: sftpoll_telemetry::TelemetryError,
    },
    /// The host event loop task failed.
    #[error("host event loop failed")]
    EventLoop {
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl ModuleError {
    pub(crate) const fn config(
        operation: &'static str,
        source: sftpoll_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: sftpoll_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_variants() {
        let Err(json_error) = serde_json::from_str::<serde_json::Value>("invalid") else {
            panic!("expected invalid json");
        };
        let config = ModuleError::config(
            "registry.on_update",
            sftpoll_config::ConfigError::ListenerBlob {
                key: sftpoll_config::defaults::LISTENERS_KEY,
                source: json_error,
            },
        );
        assert!(matches!(
            config,
            ModuleError::Config {
                operation: "registry.on_update",
                ..
            }
        ));

        let Err(utf8_error) = String::from_utf8(vec![0xff]) else {
            panic!("expected invalid utf-8");
        };
        let telemetry = ModuleError::telemetry(
            "telemetry.render",
            sftpoll_telemetry::TelemetryError::MetricsUtf8 { source: utf8_error },
        );
        assert_eq!(telemetry.to_string(), "telemetry operation failed");
    }
}
