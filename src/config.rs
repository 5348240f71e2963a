//! Configuration parsed from environment variables.
//!
//! The binary loads `.env` through `dotenvy` before calling these
//! constructors; the library itself only reads the process environment.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SESSION_FILE: &str = ".courtik/session.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_INIT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Connection settings for the hosted backend (auth + data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project base URL without trailing slash.
    pub url: String,
    /// Public anonymous API key, sent as `apikey` on every request.
    pub anon_key: String,
    /// Where the signed-in session is persisted between runs.
    pub session_file: PathBuf,
    pub timeouts: HttpTimeouts,
}

impl BackendConfig {
    /// Build from the process environment.
    ///
    /// Required:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// Optional:
    /// - `COURTIK_SESSION_FILE`: default `.courtik/session.json`
    /// - `COURTIK_REQUEST_TIMEOUT_SECS`: default 30
    /// - `COURTIK_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required key is missing or the URL is
    /// not http(s).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`BackendConfig::from_env`] with an injectable lookup.
    ///
    /// # Errors
    ///
    /// See [`BackendConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = required(&lookup, "SUPABASE_URL")?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid { var: "SUPABASE_URL", value: url });
        }
        let url = url.trim_end_matches('/').to_owned();
        let anon_key = required(&lookup, "SUPABASE_ANON_KEY")?;
        let session_file = lookup("COURTIK_SESSION_FILE")
            .filter(|v| !v.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE), PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: parse_or(&lookup, "COURTIK_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_or(&lookup, "COURTIK_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { url, anon_key, session_file, timeouts })
    }
}

/// Session store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on the initial session lookup. On expiry the store
    /// settles on "signed out".
    pub init_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { init_timeout: Duration::from_millis(DEFAULT_INIT_TIMEOUT_MS) }
    }
}

impl StoreConfig {
    /// Reads `COURTIK_INIT_TIMEOUT_MS` (default 10000).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self { init_timeout: Duration::from_millis(parse_or(&lookup, "COURTIK_INIT_TIMEOUT_MS", DEFAULT_INIT_TIMEOUT_MS)) }
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
