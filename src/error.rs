//! Error types for shuttle orchestration.
//!
//! [`ShuttleError`] covers failures that are fatal to the call that raised
//! them: configuration mistakes detected before any provider I/O, and
//! breakage in the scheduling/handoff machinery itself. Failures of a single
//! provider operation never surface here; they are collected into an
//! [`ErrorSummary`](crate::summary::ErrorSummary) instead.
//!
//! Messages follow the What/Why/Fix pattern used across the project.

use thiserror::Error;

/// Errors that abort an orchestration call.
#[derive(Debug, Clone, Error)]
pub enum ShuttleError {
    /// The requested provider identifier is not registered
    #[error("unknown provider '{id}' (available: {available})\n  Suggestion: {suggestion}")]
    UnknownProvider {
        /// The identifier that was requested
        id: String,
        /// Comma-separated list of registered identifiers
        available: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// A provider identifier was registered twice
    #[error("provider '{id}' is already registered\n  Suggestion: {suggestion}")]
    DuplicateProvider {
        /// The identifier that was already taken
        id: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The provider was named explicitly but is disabled in configuration
    #[error("provider '{id}' is disabled in configuration\n  Suggestion: {suggestion}")]
    ProviderDisabled {
        /// The disabled provider identifier
        id: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The process-wide registry was installed more than once
    #[error("the global plugin registry is already installed")]
    RegistryAlreadyInstalled,

    /// Configuration could not be read or is out of range
    #[error("invalid configuration: {reason}\n  Suggestion: {suggestion}")]
    Config {
        /// Why the configuration was rejected
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// Blocking consumption was requested from inside an async runtime
    #[error(
        "cannot consume results with the blocking interface inside an async runtime\n  Suggestion: iterate the stream with `.next().await` instead"
    )]
    BlockingInAsyncContext,

    /// The blocking bridge worker or its handoff channel failed
    #[error("blocking bridge failed: {reason}")]
    Bridge {
        /// What went wrong in the bridge
        reason: String,
    },

    /// Error-collection bookkeeping is unusable
    #[error("internal bookkeeping failure: {reason}")]
    Internal {
        /// What went wrong
        reason: String,
    },
}

impl ShuttleError {
    /// Creates an `UnknownProvider` error listing the registered identifiers.
    #[must_use]
    pub fn unknown_provider(id: &str, available: &[&str]) -> Self {
        Self::UnknownProvider {
            id: id.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            },
            suggestion: "Check the provider id or register the provider before the first call"
                .to_string(),
        }
    }

    /// Creates a `DuplicateProvider` error.
    #[must_use]
    pub fn duplicate_provider(id: &str) -> Self {
        Self::DuplicateProvider {
            id: id.to_string(),
            suggestion: "Register each provider once; pick a distinct id for a second backend"
                .to_string(),
        }
    }

    /// Creates a `ProviderDisabled` error.
    #[must_use]
    pub fn provider_disabled(id: &str) -> Self {
        Self::ProviderDisabled {
            id: id.to_string(),
            suggestion: format!("Set `data_hubs.{id}.enabled = true` or omit it from the request"),
        }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
            suggestion: "Fix the configuration value or remove it to use the default".to_string(),
        }
    }

    /// Creates a `Bridge` error.
    #[must_use]
    pub fn bridge(reason: impl Into<String>) -> Self {
        Self::Bridge {
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised before any provider I/O.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownProvider { .. }
                | Self::DuplicateProvider { .. }
                | Self::ProviderDisabled { .. }
                | Self::RegistryAlreadyInstalled
                | Self::Config { .. }
        )
    }
}

/// Validation failures for records supplied by backends.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Site identifier does not follow the `XX-YYYY` convention
    #[error("invalid site id '{site_id}': must follow format XX-YYYY where XX is country code")]
    InvalidSiteId {
        /// The rejected identifier
        site_id: String,
    },

    /// A required text field is empty or too long
    #[error("invalid {field}: length {length} outside 1..={max}")]
    FieldLength {
        /// Field name
        field: &'static str,
        /// Observed length in characters
        length: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Latitude or longitude outside the valid range
    #[error("{field} {value} outside {min}..={max}")]
    CoordinateOutOfRange {
        /// Field name
        field: &'static str,
        /// The rejected value
        value: f64,
        /// Lower bound
        min: f64,
        /// Upper bound
        max: f64,
    },

    /// Year outside the accepted coverage window
    #[error("{field} {value} outside 1900..=2100")]
    YearOutOfRange {
        /// Field name
        field: &'static str,
        /// The rejected year
        value: i32,
    },

    /// Coverage ends before it starts
    #[error("last_year {last_year} is before first_year {first_year}")]
    YearRangeInverted {
        /// First year of coverage
        first_year: i32,
        /// Last year of coverage
        last_year: i32,
    },

    /// Download link is not an absolute http(s) URL
    #[error("invalid download link '{link}': {reason}")]
    InvalidDownloadLink {
        /// The rejected link
        link: String,
        /// Why it was rejected
        reason: String,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_lists_available() {
        let err = ShuttleError::unknown_provider("x", &["ameriflux", "icos"]);
        let msg = err.to_string();
        assert!(msg.contains("'x'"), "should contain requested id");
        assert!(msg.contains("ameriflux, icos"), "should list available ids");
        assert!(msg.contains("Suggestion"), "should have suggestion");
    }

    #[test]
    fn test_unknown_provider_with_empty_registry() {
        let err = ShuttleError::unknown_provider("x", &[]);
        assert!(err.to_string().contains("available: none"));
    }

    #[test]
    fn test_duplicate_provider_message() {
        let err = ShuttleError::duplicate_provider("icos");
        let msg = err.to_string();
        assert!(msg.contains("'icos'"));
        assert!(msg.contains("already registered"));
    }

    #[test]
    fn test_provider_disabled_suggests_config_key() {
        let err = ShuttleError::provider_disabled("tern");
        assert!(err.to_string().contains("data_hubs.tern.enabled"));
    }

    #[test]
    fn test_configuration_classification() {
        assert!(ShuttleError::unknown_provider("x", &[]).is_configuration());
        assert!(ShuttleError::duplicate_provider("x").is_configuration());
        assert!(ShuttleError::config("bad").is_configuration());
        assert!(!ShuttleError::bridge("worker gone").is_configuration());
        assert!(!ShuttleError::internal("poisoned").is_configuration());
        assert!(!ShuttleError::BlockingInAsyncContext.is_configuration());
    }

    #[test]
    fn test_model_error_year_range_message() {
        let err = ModelError::YearRangeInverted {
            first_year: 2010,
            last_year: 2005,
        };
        assert_eq!(
            err.to_string(),
            "last_year 2005 is before first_year 2010"
        );
    }
}
