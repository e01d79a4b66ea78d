//! Configuration resolved from environment-style key/value pairs.
//!
//! Every value goes through an explicit typed parser so "is this a valid
//! bounded integer" has exactly one answer. [`SearchConfig::validate`] is
//! called once at startup; a failure there is fatal.

use crate::error::{Result, SearchError};
use crate::scheduler::RateConfig;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_ENGINE_ID: &str = "GOOGLE_CSE_ID";
pub const ENV_OFFLINE: &str = "SEARCH_OFFLINE";
pub const ENV_CACHE_MAX_ENTRIES: &str = "SEARCH_CACHE_MAX_ENTRIES";
pub const ENV_REFERER: &str = "SEARCH_REFERER";
pub const ENV_DEBUG: &str = "SEARCH_DEBUG";
pub const ENV_LOG_LEVEL: &str = "SEARCH_LOG_LEVEL";
pub const ENV_ENDPOINT: &str = "SEARCH_ENDPOINT";
pub const ENV_TELEMETRY_URL: &str = "SEARCH_TELEMETRY_URL";

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const MAX_CACHE_ENTRIES: usize = 50_000;
/// Entry lifetime. Not configurable.
pub const CACHE_TTL: Duration = Duration::from_millis(300_000);
/// Per-request network timeout. Not configurable.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Verbosity of the local log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    #[default]
    Info,
    Warn,
    Error,
    Silent,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Silent => "off",
        }
    }
}

impl FromStr for LogLevel {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "silent" | "off" | "none" => Ok(LogLevel::Silent),
            other => Err(SearchError::Config(format!(
                "{ENV_LOG_LEVEL} must be one of info, warn, error, silent (got '{other}')"
            ))),
        }
    }
}

/// Resolved client configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Provider credential. Required unless `offline`.
    pub api_key: Option<String>,
    /// Provider search-engine id (`cx`). Required unless `offline`.
    pub search_engine_id: Option<String>,
    /// Bypass the network and return canned empty responses.
    pub offline: bool,
    /// Result cache capacity. 0 disables caching.
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    /// Optional `Referer` header added to outbound requests.
    pub referer: Option<String>,
    /// Enables trace logging for this crate.
    pub debug: bool,
    pub log_level: LogLevel,
    /// Provider base URL.
    pub endpoint: String,
    pub request_timeout: Duration,
    /// Optional collector URL for error reports.
    pub telemetry_url: Option<String>,
    pub rate: RateConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            search_engine_id: None,
            offline: false,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl: CACHE_TTL,
            referer: None,
            debug: false,
            log_level: LogLevel::Info,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: REQUEST_TIMEOUT,
            telemetry_url: None,
            rate: RateConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Offline configuration with all other values at their defaults.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    ///
    /// Parsing errors are returned immediately; presence of the credentials
    /// is checked separately by [`SearchConfig::validate`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let offline = parse_flag(ENV_OFFLINE, lookup(ENV_OFFLINE).as_deref())?;
        let debug = parse_flag(ENV_DEBUG, lookup(ENV_DEBUG).as_deref())?;
        let cache_max_entries = parse_bounded_usize(
            ENV_CACHE_MAX_ENTRIES,
            lookup(ENV_CACHE_MAX_ENTRIES).as_deref(),
            0,
            MAX_CACHE_ENTRIES,
            DEFAULT_CACHE_MAX_ENTRIES,
        )?;
        let log_level = match lookup(ENV_LOG_LEVEL) {
            Some(raw) => raw.parse()?,
            None => LogLevel::default(),
        };
        let endpoint = non_blank(lookup(ENV_ENDPOINT)).unwrap_or_else(|| DEFAULT_ENDPOINT.into());

        Ok(Self {
            api_key: non_blank(lookup(ENV_API_KEY)),
            search_engine_id: non_blank(lookup(ENV_ENGINE_ID)),
            offline,
            cache_max_entries,
            referer: non_blank(lookup(ENV_REFERER)),
            debug,
            log_level,
            endpoint,
            telemetry_url: non_blank(lookup(ENV_TELEMETRY_URL)),
            ..Default::default()
        })
    }

    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - credentials are present unless running offline
    /// - `cache_max_entries` is within 0..=50000
    /// - `endpoint` and `telemetry_url` are absolute http(s) URLs
    pub fn validate(&self) -> Result<()> {
        if !self.offline {
            if self.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(SearchError::Config(format!(
                    "{ENV_API_KEY} is required unless {ENV_OFFLINE} is set"
                )));
            }
            if self
                .search_engine_id
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
            {
                return Err(SearchError::Config(format!(
                    "{ENV_ENGINE_ID} is required unless {ENV_OFFLINE} is set"
                )));
            }
        }
        if self.cache_max_entries > MAX_CACHE_ENTRIES {
            return Err(SearchError::Config(format!(
                "{ENV_CACHE_MAX_ENTRIES} must be at most {MAX_CACHE_ENTRIES}"
            )));
        }
        check_http_url(ENV_ENDPOINT, &self.endpoint)?;
        if let Some(ref telemetry) = self.telemetry_url {
            check_http_url(ENV_TELEMETRY_URL, telemetry)?;
        }
        self.rate.validate()
    }
}

/// Parse an optional integer and bound it to `min..=max`.
///
/// A missing or blank value yields `default`. Anything else that is not an
/// integer inside the bounds is a configuration error.
pub fn parse_bounded_usize(
    key: &str,
    raw: Option<&str>,
    min: usize,
    max: usize,
    default: usize,
) -> Result<usize> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(default),
        Some(v) => v,
    };
    let value: usize = raw
        .parse()
        .map_err(|_| SearchError::Config(format!("{key} must be an integer (got '{raw}')")))?;
    if value < min || value > max {
        return Err(SearchError::Config(format!(
            "{key} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(value)
}

/// Parse an optional boolean flag. Missing or blank means `false`.
pub fn parse_flag(key: &str, raw: Option<&str>) -> Result<bool> {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(SearchError::Config(format!(
            "{key} must be a boolean flag (got '{other}')"
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_http_url(key: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| SearchError::Config(format!("{key} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(SearchError::Config(format!(
            "{key} must use http or https (got '{scheme}')"
        ))),
    }
}
