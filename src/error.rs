//! Error types for the cse-search crate.
//!
//! Only [`SearchError::Validation`] and [`SearchError::Config`] ever cross the
//! pipeline boundary. Everything else is absorbed where it happens, reported
//! through the [`crate::reporter::ErrorReporter`] and turned into an empty
//! result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Errors raised by the search client layer.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// Malformed caller input, raised before any network activity.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid configuration, fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// The provider request failed (network, timeout, status or decoding).
    #[error("api error: {0}")]
    Api(String),

    /// Internal cache fault.
    #[error("cache error: {0}")]
    Cache(String),

    /// Unexpected fault in a helper outside the core pipeline.
    #[error("utility error: {0}")]
    Utility(String),

    /// The scheduler could not admit a task.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl SearchError {
    /// Reporting category for this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SearchError::Validation(_) => ErrorCategory::ValidationError,
            SearchError::Config(_) => ErrorCategory::ConfigError,
            SearchError::Api(_) => ErrorCategory::ApiError,
            SearchError::Cache(_) => ErrorCategory::CacheError,
            SearchError::Utility(_) | SearchError::Scheduler(_) => ErrorCategory::UtilityError,
        }
    }

    /// Variant name, used as the `error_type` of a report.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Validation(_) => "ValidationError",
            SearchError::Config(_) => "ConfigError",
            SearchError::Api(_) => "ApiError",
            SearchError::Cache(_) => "CacheError",
            SearchError::Utility(_) => "UtilityError",
            SearchError::Scheduler(_) => "SchedulerError",
        }
    }
}

/// Category attached to every error report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ApiError,
    ConfigError,
    UtilityError,
    CacheError,
    ValidationError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ApiError => "api_error",
            ErrorCategory::ConfigError => "config_error",
            ErrorCategory::UtilityError => "utility_error",
            ErrorCategory::CacheError => "cache_error",
            ErrorCategory::ValidationError => "validation_error",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convenience type alias for cse-search results.
pub type Result<T> = std::result::Result<T, SearchError>;
