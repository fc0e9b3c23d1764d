//! Relay configuration.
//!
//! Configuration is loaded from environment variables. The shared secret is
//! redacted in Debug output.

use crate::actors::ConnectionSettings;
use crate::auth::AuthMode;

use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default client listener port.
pub const DEFAULT_PORT: u16 = 9870;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Well-known development secret. A warning is logged when it is in use.
pub const DEFAULT_WS_SECRET: &str = "wss-changeme";

/// The one room served by default.
pub const DEFAULT_ROOM: &str = "domo-actors-counter";

/// Default global client ceiling.
pub const DEFAULT_MAX_CLIENTS: usize = 1000;

pub const DEFAULT_AUTH_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_IDLE_TIMEOUT_SECONDS: u64 = 5;

/// Per-connection frame ceiling. High enough that editor sync bursts never
/// hit it.
pub const DEFAULT_RATE_LIMIT_MESSAGES: usize = 100_000;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 1000;

/// Per-address upgrade request throttle.
pub const DEFAULT_THROTTLE_REQUESTS: u32 = 60;
pub const DEFAULT_THROTTLE_WINDOW_SECONDS: u64 = 60;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

pub const DEFAULT_INACTIVE_SWEEP_INTERVAL_SECONDS: u64 = 1;

/// Relay configuration.
#[derive(Clone)]
pub struct Config {
    /// Client listener (default: `0.0.0.0:$PORT`, else `0.0.0.0:9870`).
    pub bind_address: SocketAddr,

    /// Health/metrics listener (default: "0.0.0.0:8081").
    pub health_bind_address: SocketAddr,

    /// Pre-shared secret clients must present.
    pub ws_secret: SecretString,

    /// The room this relay serves; other names get 404.
    pub room: String,

    /// Global client ceiling across all rooms.
    pub max_clients: usize,

    pub auth_mode: AuthMode,
    pub auth_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,

    pub rate_limit_messages: usize,
    pub rate_limit_window_ms: u64,

    pub throttle_requests: u32,
    pub throttle_window_seconds: u64,

    /// Accepted `Origin` values. Empty means any origin.
    pub allowed_origins: Vec<String>,

    /// Largest WebSocket message accepted from a client.
    pub max_frame_bytes: usize,

    /// Period of the hub's inactivity sweep tick.
    pub inactive_sweep_interval_seconds: u64,
}

/// Custom Debug implementation that redacts the secret.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("ws_secret", &"[REDACTED]")
            .field("room", &self.room)
            .field("max_clients", &self.max_clients)
            .field("auth_mode", &self.auth_mode)
            .field("auth_timeout_seconds", &self.auth_timeout_seconds)
            .field("idle_timeout_seconds", &self.idle_timeout_seconds)
            .field("rate_limit_messages", &self.rate_limit_messages)
            .field("rate_limit_window_ms", &self.rate_limit_window_ms)
            .field("throttle_requests", &self.throttle_requests)
            .field("throttle_window_seconds", &self.throttle_window_seconds)
            .field("allowed_origins", &self.allowed_origins)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field(
                "inactive_sweep_interval_seconds",
                &self.inactive_sweep_interval_seconds,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse `key`, falling back to `default` when absent or unparseable.
fn parse_or<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    vars.get(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Like [`parse_or`], but zero also falls back.
fn parse_nonzero_or(vars: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    match parse_or(vars, key, default) {
        0 => default,
        value => value,
    }
}

fn parse_addr(value: &str, key: &str) -> Result<SocketAddr, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{key}='{value}': {e}")))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = match vars.get("RELAY_BIND_ADDRESS") {
            Some(addr) => parse_addr(addr, "RELAY_BIND_ADDRESS")?,
            None => {
                let port = parse_or(vars, "PORT", DEFAULT_PORT);
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let health_bind_address = parse_addr(
            vars.get("RELAY_HEALTH_BIND_ADDRESS")
                .map_or(DEFAULT_HEALTH_BIND_ADDRESS, String::as_str),
            "RELAY_HEALTH_BIND_ADDRESS",
        )?;

        let ws_secret = SecretString::from(
            vars.get("WS_SECRET")
                .filter(|s| !s.is_empty())
                .cloned()
                .unwrap_or_else(|| DEFAULT_WS_SECRET.to_string()),
        );

        let room = vars
            .get("RELAY_ROOM")
            .filter(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROOM.to_string());

        let auth_mode = match vars.get("RELAY_AUTH_MODE") {
            Some(mode) => mode.parse().map_err(ConfigError::InvalidValue)?,
            None => AuthMode::default(),
        };

        let allowed_origins = vars
            .get("RELAY_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            bind_address,
            health_bind_address,
            ws_secret,
            room,
            max_clients: parse_or(vars, "RELAY_MAX_CLIENTS", DEFAULT_MAX_CLIENTS),
            auth_mode,
            auth_timeout_seconds: parse_or(
                vars,
                "RELAY_AUTH_TIMEOUT_SECONDS",
                DEFAULT_AUTH_TIMEOUT_SECONDS,
            ),
            idle_timeout_seconds: parse_or(
                vars,
                "RELAY_IDLE_TIMEOUT_SECONDS",
                DEFAULT_IDLE_TIMEOUT_SECONDS,
            ),
            rate_limit_messages: parse_or(
                vars,
                "RELAY_RATE_LIMIT_MESSAGES",
                DEFAULT_RATE_LIMIT_MESSAGES,
            ),
            rate_limit_window_ms: parse_nonzero_or(
                vars,
                "RELAY_RATE_LIMIT_WINDOW_MS",
                DEFAULT_RATE_LIMIT_WINDOW_MS,
            ),
            throttle_requests: parse_or(vars, "RELAY_THROTTLE_REQUESTS", DEFAULT_THROTTLE_REQUESTS),
            throttle_window_seconds: parse_nonzero_or(
                vars,
                "RELAY_THROTTLE_WINDOW_SECONDS",
                DEFAULT_THROTTLE_WINDOW_SECONDS,
            ),
            allowed_origins,
            max_frame_bytes: parse_or(vars, "RELAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES),
            inactive_sweep_interval_seconds: parse_nonzero_or(
                vars,
                "RELAY_INACTIVE_SWEEP_INTERVAL_SECONDS",
                DEFAULT_INACTIVE_SWEEP_INTERVAL_SECONDS,
            ),
        })
    }

    /// Whether the well-known development secret is in use.
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.ws_secret.expose_secret() == DEFAULT_WS_SECRET
    }

    /// Timing and limits handed to every connection.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            auth_timeout: Duration::from_secs(self.auth_timeout_seconds),
            rate_limit_messages: self.rate_limit_messages,
            rate_limit_window: Duration::from_millis(self.rate_limit_window_ms),
        }
    }

    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_window_seconds)
    }

    #[must_use]
    pub fn inactive_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.inactive_sweep_interval_seconds)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.bind_address, "0.0.0.0:9870".parse().unwrap());
        assert_eq!(config.health_bind_address, "0.0.0.0:8081".parse().unwrap());
        assert_eq!(config.ws_secret.expose_secret(), DEFAULT_WS_SECRET);
        assert!(config.uses_default_secret());
        assert_eq!(config.room, DEFAULT_ROOM);
        assert_eq!(config.max_clients, 1000);
        assert_eq!(config.auth_mode, AuthMode::FirstFrame);
        assert_eq!(config.auth_timeout_seconds, 5);
        assert_eq!(config.idle_timeout_seconds, 5);
        assert_eq!(config.rate_limit_messages, 100_000);
        assert_eq!(config.rate_limit_window_ms, 1000);
        assert_eq!(config.throttle_requests, 60);
        assert_eq!(config.throttle_window_seconds, 60);
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.max_frame_bytes, 1_048_576);
        assert_eq!(config.inactive_sweep_interval_seconds, 1);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("RELAY_BIND_ADDRESS", "127.0.0.1:7000"),
            ("RELAY_HEALTH_BIND_ADDRESS", "127.0.0.1:7001"),
            ("WS_SECRET", "prod-secret"),
            ("RELAY_ROOM", "docs"),
            ("RELAY_MAX_CLIENTS", "2"),
            ("RELAY_AUTH_MODE", "query"),
            ("RELAY_AUTH_TIMEOUT_SECONDS", "10"),
            ("RELAY_IDLE_TIMEOUT_SECONDS", "30"),
            ("RELAY_RATE_LIMIT_MESSAGES", "50"),
            ("RELAY_RATE_LIMIT_WINDOW_MS", "250"),
            ("RELAY_THROTTLE_REQUESTS", "5"),
            ("RELAY_THROTTLE_WINDOW_SECONDS", "10"),
            (
                "RELAY_ALLOWED_ORIGINS",
                "https://a.example, https://b.example,",
            ),
            ("RELAY_MAX_FRAME_BYTES", "4096"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.health_bind_address, "127.0.0.1:7001".parse().unwrap());
        assert!(!config.uses_default_secret());
        assert_eq!(config.room, "docs");
        assert_eq!(config.max_clients, 2);
        assert_eq!(config.auth_mode, AuthMode::Query);
        assert_eq!(
            config.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.max_frame_bytes, 4096);

        let settings = config.connection_settings();
        assert_eq!(settings.auth_timeout, Duration::from_secs(10));
        assert_eq!(settings.idle_timeout, Duration::from_secs(30));
        assert_eq!(settings.rate_limit_messages, 50);
        assert_eq!(settings.rate_limit_window, Duration::from_millis(250));
        assert_eq!(config.throttle_window(), Duration::from_secs(10));
    }

    #[test]
    fn test_port_used_when_no_bind_address() {
        let config = Config::from_vars(&vars(&[("PORT", "8080")])).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    fn test_bad_numbers_fall_back_to_defaults() {
        let config = Config::from_vars(&vars(&[
            ("RELAY_MAX_CLIENTS", "lots"),
            ("RELAY_IDLE_TIMEOUT_SECONDS", "-1"),
            ("RELAY_THROTTLE_WINDOW_SECONDS", "0"),
            ("RELAY_INACTIVE_SWEEP_INTERVAL_SECONDS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.max_clients, DEFAULT_MAX_CLIENTS);
        assert_eq!(config.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECONDS);
        assert_eq!(config.throttle_window_seconds, DEFAULT_THROTTLE_WINDOW_SECONDS);
        assert_eq!(
            config.inactive_sweep_interval_seconds,
            DEFAULT_INACTIVE_SWEEP_INTERVAL_SECONDS
        );
    }

    #[test]
    fn test_empty_secret_falls_back_to_default() {
        let config = Config::from_vars(&vars(&[("WS_SECRET", "")])).unwrap();
        assert!(config.uses_default_secret());
    }

    #[test]
    fn test_invalid_auth_mode() {
        let result = Config::from_vars(&vars(&[("RELAY_AUTH_MODE", "cookie")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_invalid_bind_address() {
        let result = Config::from_vars(&vars(&[("RELAY_BIND_ADDRESS", "localhost")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v.contains("RELAY_BIND_ADDRESS")));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = Config::from_vars(&vars(&[("WS_SECRET", "hunter2-prod")])).unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("hunter2-prod"));
    }
}
