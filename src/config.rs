//! Remote service configuration parsed from environment variables.

use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project base URL without a trailing slash, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    /// Public (anon) API key sent with every request.
    pub api_key: String,
    pub timeouts: Timeouts,
    /// Where the live session is persisted between runs. `None` keeps it in memory only.
    pub session_file: Option<PathBuf>,
}

impl RemoteConfig {
    #[must_use]
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeouts: Timeouts::default(),
            session_file: None,
        }
    }

    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `TASKDECK_URL`
    /// - `TASKDECK_ANON_KEY`
    ///
    /// Optional:
    /// - `TASKDECK_REQUEST_TIMEOUT_SECS`: default 30
    /// - `TASKDECK_CONNECT_TIMEOUT_SECS`: default 10
    /// - `TASKDECK_SESSION_FILE`: session persistence path
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required variable is missing or a
    /// timeout is not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = required(&lookup, "TASKDECK_URL")?;
        let api_key = required(&lookup, "TASKDECK_ANON_KEY")?;
        let timeouts = Timeouts {
            request_secs: parse_u64(&lookup, "TASKDECK_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: parse_u64(&lookup, "TASKDECK_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        let session_file = lookup("TASKDECK_SESSION_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let mut config = Self::new(&base_url, api_key);
        config.timeouts = timeouts;
        config.session_file = session_file;
        Ok(config)
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
