//! Auth service configuration.
//!
//! Configuration is loaded from environment variables. Numeric and boolean
//! values that are present but unparseable are rejected rather than silently
//! replaced by their defaults.

use common::jwt::MAX_CLOCK_SKEW;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default gRPC listen address.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:50053";

/// Default provider key endpoint (x509 certificates keyed by key ID).
pub const DEFAULT_KEYS_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

/// Default timeout for a provider key fetch.
pub const DEFAULT_KEYS_FETCH_TIMEOUT_SECONDS: u64 = 5;

/// Upper bound for the key fetch timeout.
pub const MAX_KEYS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Default clock skew leeway for `exp`/`nbf` checks.
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 5;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human readable output.
    Text,
}

/// Auth service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC listen address (default: "0.0.0.0:50053").
    pub listen_address: String,

    /// Provider key endpoint.
    pub keys_url: String,

    /// HTTP timeout for key fetches (default: 5s).
    pub keys_fetch_timeout: Duration,

    /// Force a refresh when a key ID misses on a fresh cache (default: false).
    pub refresh_on_miss: bool,

    /// Leeway for temporal claims (default: 5s).
    pub clock_skew: Duration,

    /// Required `aud` claim, if any.
    pub expected_audience: Option<String>,

    /// Required `iss` claim, if any.
    pub expected_issuer: Option<String>,

    /// Prometheus exporter listen address, if metrics are enabled.
    pub metrics_bind_address: Option<String>,

    /// Log output format (default: JSON).
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let listen_address = vars
            .get("AUTH_LISTEN_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string());

        let keys_url = vars
            .get("AUTH_KEYS_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_KEYS_URL.to_string());

        if !(keys_url.starts_with("https://") || keys_url.starts_with("http://")) {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_KEYS_URL must be an http(s) URL, got '{keys_url}'"
            )));
        }

        let keys_fetch_timeout_seconds = parse_u64(
            vars,
            "AUTH_KEYS_FETCH_TIMEOUT_SECONDS",
            DEFAULT_KEYS_FETCH_TIMEOUT_SECONDS,
        )?;
        if keys_fetch_timeout_seconds == 0
            || keys_fetch_timeout_seconds > MAX_KEYS_FETCH_TIMEOUT_SECONDS
        {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_KEYS_FETCH_TIMEOUT_SECONDS must be between 1 and {MAX_KEYS_FETCH_TIMEOUT_SECONDS}, got {keys_fetch_timeout_seconds}"
            )));
        }

        let refresh_on_miss = parse_bool(vars, "AUTH_REFRESH_ON_MISS", false)?;

        let clock_skew_seconds =
            parse_u64(vars, "AUTH_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW_SECONDS)?;
        if clock_skew_seconds > MAX_CLOCK_SKEW.as_secs() {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_CLOCK_SKEW_SECONDS must be at most {}, got {clock_skew_seconds}",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        let expected_audience = non_empty(vars, "AUTH_EXPECTED_AUDIENCE");
        let expected_issuer = non_empty(vars, "AUTH_EXPECTED_ISSUER");
        let metrics_bind_address = non_empty(vars, "AUTH_METRICS_BIND_ADDRESS");

        let log_format = match vars.get("AUTH_LOG_FORMAT").map(String::as_str) {
            None | Some("json") => LogFormat::Json,
            Some("text") => LogFormat::Text,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "AUTH_LOG_FORMAT must be 'json' or 'text', got '{other}'"
                )))
            }
        };

        Ok(Config {
            listen_address,
            keys_url,
            keys_fetch_timeout: Duration::from_secs(keys_fetch_timeout_seconds),
            refresh_on_miss,
            clock_skew: Duration::from_secs(clock_skew_seconds),
            expected_audience,
            expected_issuer,
            metrics_bind_address,
            log_format,
        })
    }
}

fn parse_u64(vars: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} must be an integer, got '{raw}'"))),
        None => Ok(default),
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!(
            "{name} must be true or false, got '{v}'"
        ))),
    }
}

fn non_empty(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name).filter(|v| !v.trim().is_empty()).cloned()
}
