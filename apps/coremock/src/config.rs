use std::{
    env,
    net::{AddrParseError, SocketAddr},
    time::Duration,
};

use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_TOKEN_PREFIX: &str = "AIK_RUNTIME_1";
pub const DEFAULT_TIMEOUT_DELAY_MS: u64 = 3 * 60 * 1000;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10 * 60 * 1000;

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub bind_addr: SocketAddr,
    pub token_prefix: String,
    pub timeout_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub log_json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid COREMOCK_BIND_ADDR: {0}")]
    BindAddrParse(#[from] AddrParseError),
    #[error("invalid PORT: {0}")]
    InvalidPort(String),
    #[error("invalid COREMOCK_TOKEN_PREFIX: {0}")]
    InvalidTokenPrefix(String),
    #[error("invalid COREMOCK_TIMEOUT_DELAY_MS: {0}")]
    InvalidTimeoutDelayMs(String),
    #[error("invalid COREMOCK_HEARTBEAT_INTERVAL_MS: {0}")]
    InvalidHeartbeatIntervalMs(String),
    #[error("invalid COREMOCK_LOG_JSON: {0}")]
    InvalidLogJson(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "coremock".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            timeout_delay_ms: DEFAULT_TIMEOUT_DELAY_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            log_json: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = parse_with_lookup(&lookup, "PORT", DEFAULT_PORT, |raw| {
            raw.trim()
                .parse::<u16>()
                .map_err(|error| ConfigError::InvalidPort(error.to_string()))
        })?;
        let bind_addr = match non_empty(&lookup, "COREMOCK_BIND_ADDR") {
            Some(raw) => raw.parse()?,
            None => SocketAddr::from(([127, 0, 0, 1], port)),
        };
        let service_name =
            non_empty(&lookup, "COREMOCK_SERVICE_NAME").unwrap_or(defaults.service_name);
        let token_prefix = match non_empty(&lookup, "COREMOCK_TOKEN_PREFIX") {
            Some(prefix) => parse_token_prefix(&prefix)?,
            None => defaults.token_prefix,
        };
        let timeout_delay_ms = parse_with_lookup(
            &lookup,
            "COREMOCK_TIMEOUT_DELAY_MS",
            defaults.timeout_delay_ms,
            |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidTimeoutDelayMs(error.to_string()))
            },
        )?;
        let heartbeat_interval_ms = parse_with_lookup(
            &lookup,
            "COREMOCK_HEARTBEAT_INTERVAL_MS",
            defaults.heartbeat_interval_ms,
            |raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|error| ConfigError::InvalidHeartbeatIntervalMs(error.to_string()))
            },
        )?;
        let log_json = parse_with_lookup(&lookup, "COREMOCK_LOG_JSON", defaults.log_json, |raw| {
            parse_bool(&raw).map_err(ConfigError::InvalidLogJson)
        })?;

        Ok(Self {
            service_name,
            bind_addr,
            token_prefix,
            timeout_delay_ms,
            heartbeat_interval_ms,
            log_json,
        })
    }

    #[must_use]
    pub fn timeout_delay(&self) -> Duration {
        Duration::from_millis(self.timeout_delay_ms)
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match non_empty(lookup, key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}

// Tokens are `<prefix>_<id>_<suffix>`, so the prefix must stay a single
// header-safe segment.
fn parse_token_prefix(raw: &str) -> Result<String, ConfigError> {
    if raw
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
    {
        Ok(raw.to_string())
    } else {
        Err(ConfigError::InvalidTokenPrefix(raw.to_string()))
    }
}
