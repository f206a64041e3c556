#![warn(missing_docs)]

//! Application configuration with typed validation. Every field has a
//! bounded range or an allowed pattern; construction fails with a
//! `Validation` error on any violation, and unknown keys are rejected when
//! deserializing from external sources.

use crate::error::HttpError;
use serde::Deserialize;
use std::time::Duration;

const MIN_BODY_SIZE: usize = 1024;
const MAX_BODY_SIZE: usize = 100 * 1024 * 1024;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 5 * 60 * 1_000;
const MIN_KEEP_ALIVE_MS: u64 = 1_000;
const MAX_KEEP_ALIVE_MS: u64 = 60 * 1_000;

/// Validated application configuration.
///
/// Build one with [`AppConfig::default`] and adjust fields, or merge partial
/// [`AppOptions`] over the defaults with [`AppConfig::from_options`]. The
/// application validates the result at construction.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port to bind; 0 lets the OS assign one. Default 3000.
    pub port: u16,
    /// Host to bind, limited to letters, digits, dots, and dashes.
    /// Default `localhost`.
    pub host: String,
    /// Maximum request body size in bytes, 1 KiB to 100 MiB. Default 1 MiB.
    pub max_body_size: usize,
    /// Per-request timeout, 1 s to 5 min. Default 30 s.
    pub timeout: Duration,
    /// Connection keep-alive window, 1 s to 1 min. Default 10 s.
    pub keep_alive: Duration,
    /// Whether to honor `X-Forwarded-*` headers. Default false.
    pub trust_proxy: bool,
    /// Debug mode: error responses keep internal messages and stacks.
    /// Default false.
    pub debug: bool,
    /// How long `shutdown()` waits for in-flight requests. Default 3 s.
    pub graceful_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "localhost".to_string(),
            max_body_size: 1024 * 1024,
            timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(10),
            trust_proxy: false,
            debug: false,
            graceful_timeout: Duration::from_secs(3),
        }
    }
}

/// Partial configuration, as read from an external source. Unknown keys fail
/// deserialization, so typos surface as `Validation` errors instead of being
/// silently ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppOptions {
    /// See [`AppConfig::port`].
    pub port: Option<u16>,
    /// See [`AppConfig::host`].
    pub host: Option<String>,
    /// See [`AppConfig::max_body_size`].
    pub max_body_size: Option<usize>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Keep-alive window in milliseconds.
    pub keep_alive_ms: Option<u64>,
    /// See [`AppConfig::trust_proxy`].
    pub trust_proxy: Option<bool>,
    /// See [`AppConfig::debug`].
    pub debug: Option<bool>,
    /// Graceful-shutdown window in milliseconds.
    pub graceful_timeout_ms: Option<u64>,
}

impl AppConfig {
    /// Merges partial options over the defaults and validates the result.
    /// Validation is idempotent: re-validating an already-valid config
    /// changes nothing.
    pub fn from_options(options: AppOptions) -> Result<Self, HttpError> {
        let defaults = Self::default();
        let config = Self {
            port: options.port.unwrap_or(defaults.port),
            host: options.host.unwrap_or(defaults.host),
            max_body_size: options.max_body_size.unwrap_or(defaults.max_body_size),
            timeout: options
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            keep_alive: options
                .keep_alive_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.keep_alive),
            trust_proxy: options.trust_proxy.unwrap_or(defaults.trust_proxy),
            debug: options.debug.unwrap_or(defaults.debug),
            graceful_timeout: options
                .graceful_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.graceful_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses options from a JSON document and validates the merged config.
    pub fn from_json(json: &str) -> Result<Self, HttpError> {
        let options: AppOptions = serde_json::from_str(json)
            .map_err(|e| HttpError::validation(format!("Invalid configuration: {}", e)))?;
        Self::from_options(options)
    }

    /// Checks every field against its allowed range or pattern.
    pub fn validate(&self) -> Result<(), HttpError> {
        if self.host.is_empty()
            || !self
                .host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err(HttpError::validation(format!(
                "Invalid host '{}': only letters, digits, dots, and dashes are allowed",
                self.host
            )));
        }
        if !(MIN_BODY_SIZE..=MAX_BODY_SIZE).contains(&self.max_body_size) {
            return Err(HttpError::validation(format!(
                "max_body_size must be between {} and {} bytes, got {}",
                MIN_BODY_SIZE, MAX_BODY_SIZE, self.max_body_size
            )));
        }
        let timeout_ms = self.timeout.as_millis() as u64;
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(HttpError::validation(format!(
                "timeout must be between {} ms and {} ms, got {} ms",
                MIN_TIMEOUT_MS, MAX_TIMEOUT_MS, timeout_ms
            )));
        }
        let keep_alive_ms = self.keep_alive.as_millis() as u64;
        if !(MIN_KEEP_ALIVE_MS..=MAX_KEEP_ALIVE_MS).contains(&keep_alive_ms) {
            return Err(HttpError::validation(format!(
                "keep_alive must be between {} ms and {} ms, got {} ms",
                MIN_KEEP_ALIVE_MS, MAX_KEEP_ALIVE_MS, keep_alive_ms
            )));
        }
        if self.graceful_timeout > Duration::from_secs(60) {
            return Err(HttpError::validation(
                "graceful_timeout must not exceed 60 s",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn merge_then_validate_is_idempotent() {
        let config = AppConfig::from_options(AppOptions {
            port: Some(8080),
            timeout_ms: Some(5_000),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.host, "localhost");
        // Re-validation of a valid config is a no-op.
        config.validate().unwrap();
    }

    #[test]
    fn bad_host_is_rejected() {
        for host in ["", "with space", "under_score", "semi;colon"] {
            let err = AppConfig::from_options(AppOptions {
                host: Some(host.to_string()),
                ..Default::default()
            })
            .unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "host {:?}", host);
        }
    }

    #[test]
    fn body_size_bounds() {
        for size in [0, 1023, 101 * 1024 * 1024] {
            assert!(AppConfig::from_options(AppOptions {
                max_body_size: Some(size),
                ..Default::default()
            })
            .is_err());
        }
        assert!(AppConfig::from_options(AppOptions {
            max_body_size: Some(1024),
            ..Default::default()
        })
        .is_ok());
    }

    #[test]
    fn timeout_bounds() {
        assert!(AppConfig::from_options(AppOptions {
            timeout_ms: Some(999),
            ..Default::default()
        })
        .is_err());
        assert!(AppConfig::from_options(AppOptions {
            timeout_ms: Some(6 * 60 * 1_000),
            ..Default::default()
        })
        .is_err());
        assert!(AppConfig::from_options(AppOptions {
            keep_alive_ms: Some(90_000),
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn unknown_keys_fail_deserialization() {
        let err = AppConfig::from_json(r#"{"port": 8080, "warp_drive": true}"#).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.message().contains("warp_drive"));
    }

    #[test]
    fn valid_json_config_round_trips() {
        let config =
            AppConfig::from_json(r#"{"port": 0, "host": "0.0.0.0", "debug": true}"#).unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.debug);
    }
}
