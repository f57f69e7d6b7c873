//! Dispatch Controller configuration.
//!
//! Configuration is loaded from environment variables. The channel catalog
//! is supplied by deployment (`DC_CHANNEL_CATALOG`, JSON); the core never
//! creates channels at runtime.

use dispatch_protocol::types::{ChannelKind, ReconnectPolicy};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default bind address for the WebSocket endpoint and read API.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default idle-transmission timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 8;

/// Default reconnect grace window in seconds.
pub const DEFAULT_RECONNECT_GRACE_SECONDS: u64 = 30;

/// Default heartbeat staleness threshold in seconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 30;

/// Default reconnect backoff base in milliseconds.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Default reconnect backoff factor.
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

/// Default reconnect backoff cap in milliseconds.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 10_000;

/// Default instance ID prefix.
pub const DEFAULT_DC_ID_PREFIX: &str = "dc";

/// One channel in the configured catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelSpec {
    /// Channel id, e.g. `ops-1`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Channel kind.
    pub kind: ChannelKind,
}

/// Dispatch Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP/WebSocket server (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Unique identifier for this controller instance.
    pub dc_id: String,

    /// Seconds of transmitter silence before the idle sweep reclaims a token.
    pub idle_timeout_seconds: u64,

    /// Seconds a disconnected session stays resumable.
    pub reconnect_grace_seconds: u64,

    /// Seconds without a heartbeat before a session is treated as half-open.
    pub heartbeat_timeout_seconds: u64,

    /// Reconnect backoff base in milliseconds.
    pub backoff_base_ms: u64,

    /// Reconnect backoff factor.
    pub backoff_factor: u32,

    /// Reconnect backoff cap in milliseconds.
    pub backoff_cap_ms: u64,

    /// Channel catalog this instance serves.
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when `DC_CHANNEL_CATALOG` is present but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error when `DC_CHANNEL_CATALOG` is present but malformed.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("DC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let idle_timeout_seconds = vars
            .get("DC_IDLE_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECONDS);

        let reconnect_grace_seconds = vars
            .get("DC_RECONNECT_GRACE_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONNECT_GRACE_SECONDS);

        let heartbeat_timeout_seconds = vars
            .get("DC_HEARTBEAT_TIMEOUT_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECONDS);

        let backoff_base_ms = vars
            .get("DC_BACKOFF_BASE_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKOFF_BASE_MS);

        let backoff_factor = vars
            .get("DC_BACKOFF_FACTOR")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKOFF_FACTOR);

        let backoff_cap_ms = vars
            .get("DC_BACKOFF_CAP_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_BACKOFF_CAP_MS);

        let channels = match vars.get("DC_CHANNEL_CATALOG") {
            Some(json) => serde_json::from_str(json)
                .map_err(|e| ConfigError::InvalidValue(format!("DC_CHANNEL_CATALOG: {e}")))?,
            None => Self::default_catalog(),
        };

        if channels.is_empty() {
            return Err(ConfigError::InvalidValue(
                "DC_CHANNEL_CATALOG must list at least one channel".to_string(),
            ));
        }

        // Generate instance ID
        let dc_id = vars.get("DC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_DC_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            dc_id,
            idle_timeout_seconds,
            reconnect_grace_seconds,
            heartbeat_timeout_seconds,
            backoff_base_ms,
            backoff_factor,
            backoff_cap_ms,
            channels,
        })
    }

    /// Catalog used when deployment does not supply one.
    fn default_catalog() -> Vec<ChannelSpec> {
        vec![
            ChannelSpec {
                id: "dispatch".to_string(),
                name: "Dispatch".to_string(),
                kind: ChannelKind::DispatchPriority,
            },
            ChannelSpec {
                id: "ops-1".to_string(),
                name: "Operations 1".to_string(),
                kind: ChannelKind::Standard,
            },
            ChannelSpec {
                id: "ops-2".to_string(),
                name: "Operations 2".to_string(),
                kind: ChannelKind::Standard,
            },
            ChannelSpec {
                id: "emergency".to_string(),
                name: "Emergency".to_string(),
                kind: ChannelKind::Emergency,
            },
        ]
    }

    /// Idle-transmission timeout as a `Duration`.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// Reconnect grace window as a `Duration`.
    #[must_use]
    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_seconds)
    }

    /// Heartbeat staleness threshold as a `Duration`.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Reconnect schedule advertised to clients.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_ms: self.backoff_base_ms,
            factor: self.backoff_factor,
            cap_ms: self.backoff_cap_ms,
            grace_ms: self.reconnect_grace_seconds * 1000,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_success_with_defaults() {
        let vars = HashMap::new();

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECONDS);
        assert_eq!(
            config.reconnect_grace_seconds,
            DEFAULT_RECONNECT_GRACE_SECONDS
        );
        assert_eq!(
            config.heartbeat_timeout_seconds,
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS
        );
        assert_eq!(config.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
        assert_eq!(config.backoff_factor, DEFAULT_BACKOFF_FACTOR);
        assert_eq!(config.backoff_cap_ms, DEFAULT_BACKOFF_CAP_MS);
        // Default catalog ships a dispatch-priority channel
        assert!(config.channels.iter().any(|c| c.id == "dispatch"));
        // Instance ID should be auto-generated
        assert!(config.dc_id.starts_with("dc-"));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = HashMap::new();
        vars.insert("DC_BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string());
        vars.insert("DC_IDLE_TIMEOUT_SECONDS".to_string(), "5".to_string());
        vars.insert("DC_RECONNECT_GRACE_SECONDS".to_string(), "60".to_string());
        vars.insert("DC_HEARTBEAT_TIMEOUT_SECONDS".to_string(), "20".to_string());
        vars.insert("DC_BACKOFF_BASE_MS".to_string(), "250".to_string());
        vars.insert("DC_BACKOFF_FACTOR".to_string(), "3".to_string());
        vars.insert("DC_BACKOFF_CAP_MS".to_string(), "5000".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_grace(), Duration::from_secs(60));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(20));
        assert_eq!(config.backoff_base_ms, 250);
        assert_eq!(config.backoff_factor, 3);
        assert_eq!(config.backoff_cap_ms, 5000);
    }

    #[test]
    fn test_channel_catalog_from_json() {
        let mut vars = HashMap::new();
        vars.insert(
            "DC_CHANNEL_CATALOG".to_string(),
            r#"[{"id":"tac-1","name":"Tactical 1","kind":"standard"},
                {"id":"ems","name":"EMS","kind":"emergency"}]"#
                .to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.channels.len(), 2);
        assert_eq!(
            config.channels.first().map(|c| c.id.as_str()),
            Some("tac-1")
        );
        assert!(config
            .channels
            .iter()
            .any(|c| c.kind == ChannelKind::Emergency));
    }

    #[test]
    fn test_malformed_catalog_rejected() {
        let mut vars = HashMap::new();
        vars.insert("DC_CHANNEL_CATALOG".to_string(), "not json".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let mut vars = HashMap::new();
        vars.insert("DC_CHANNEL_CATALOG".to_string(), "[]".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_dc_id_custom_value() {
        let mut vars = HashMap::new();
        vars.insert("DC_ID".to_string(), "dc-custom-001".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert_eq!(config.dc_id, "dc-custom-001");
    }

    #[test]
    fn test_reconnect_policy_derivation() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let policy = config.reconnect_policy();
        assert_eq!(policy.base_ms, DEFAULT_BACKOFF_BASE_MS);
        assert_eq!(policy.grace_ms, DEFAULT_RECONNECT_GRACE_SECONDS * 1000);
    }
}
