//! Structured provider errors and the per-call error summary.
//!
//! Every orchestration call owns one [`SummaryHandle`]. The error-collecting
//! stream records into it while it is consumed; readers take
//! [`ErrorSummary`] snapshots. A snapshot taken before the stream is
//! exhausted is partial and reports `is_final == false`: partial counts are
//! expected, not a contradiction.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ShuttleError;

/// One failed provider operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginErrorDetail {
    data_hub: String,
    operation: String,
    error: String,
    timestamp: String,
}

impl PluginErrorDetail {
    /// Creates a detail stamped with the current UTC time.
    #[must_use]
    pub fn new(
        data_hub: impl Into<String>,
        operation: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            data_hub: data_hub.into(),
            operation: operation.into(),
            error: error.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    /// Provider the failed operation targeted.
    #[must_use]
    pub fn data_hub(&self) -> &str {
        &self.data_hub
    }

    /// Operation name (e.g. `get_sites`).
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Error message.
    #[must_use]
    pub fn error(&self) -> &str {
        &self.error
    }

    /// ISO-8601 timestamp of the failure.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

/// Aggregate outcome of one orchestration call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Items successfully yielded to the caller.
    pub total_results: usize,
    /// Provider operation failures recorded.
    pub total_errors: usize,
    /// Failures in the order they were recorded.
    pub errors: Vec<PluginErrorDetail>,
    /// Items yielded per provider id.
    pub results_by_provider: BTreeMap<String, usize>,
    /// True once the underlying stream was consumed to exhaustion.
    pub is_final: bool,
}

impl ErrorSummary {
    /// Returns true if any provider operation failed.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Providers that recorded at least one failure, in first-failure order.
    #[must_use]
    pub fn failed_providers(&self) -> Vec<&str> {
        let mut providers: Vec<&str> = Vec::new();
        for detail in &self.errors {
            if !providers.contains(&detail.data_hub()) {
                providers.push(detail.data_hub());
            }
        }
        providers
    }
}

/// Shared, incrementally built [`ErrorSummary`].
///
/// Cloning yields another handle to the same summary.
#[derive(Debug, Clone, Default)]
pub struct SummaryHandle {
    inner: Arc<Mutex<ErrorSummary>>,
}

impl SummaryHandle {
    /// Creates an empty, non-final summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current state.
    ///
    /// Partial until [`Self::is_final`] returns true.
    #[must_use]
    pub fn snapshot(&self) -> ErrorSummary {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true once the producing stream has been exhausted.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_final
    }

    pub(crate) fn record_result(&self, provider_id: &str) -> Result<(), ShuttleError> {
        let mut summary = self.lock_for_update()?;
        summary.total_results += 1;
        *summary
            .results_by_provider
            .entry(provider_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    pub(crate) fn record_error(&self, detail: PluginErrorDetail) -> Result<(), ShuttleError> {
        let mut summary = self.lock_for_update()?;
        summary.total_errors += 1;
        summary.errors.push(detail);
        Ok(())
    }

    pub(crate) fn finalize(&self) -> Result<ErrorSummary, ShuttleError> {
        let mut summary = self.lock_for_update()?;
        summary.is_final = true;
        Ok(summary.clone())
    }

    // A poisoned lock means an update panicked halfway; counts can no longer be trusted.
    fn lock_for_update(&self) -> Result<MutexGuard<'_, ErrorSummary>, ShuttleError> {
        let summary = self
            .inner
            .lock()
            .map_err(|_| ShuttleError::internal("error summary lock poisoned"))?;
        if summary.is_final {
            return Err(ShuttleError::internal("error summary already finalized"));
        }
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_timestamp_is_iso8601() {
        let detail = PluginErrorDetail::new("icos", "get_sites", "connection refused");
        assert!(chrono::DateTime::parse_from_rfc3339(detail.timestamp()).is_ok());
        assert!(detail.timestamp().ends_with('Z'));
        assert_eq!(detail.data_hub(), "icos");
        assert_eq!(detail.operation(), "get_sites");
        assert_eq!(detail.error(), "connection refused");
    }

    #[test]
    fn test_new_handle_is_empty_and_partial() {
        let handle = SummaryHandle::new();
        let summary = handle.snapshot();
        assert_eq!(summary.total_results, 0);
        assert_eq!(summary.total_errors, 0);
        assert!(!summary.is_final);
        assert!(!handle.is_final());
    }

    #[test]
    fn test_record_and_finalize() {
        let handle = SummaryHandle::new();
        handle.record_result("a").unwrap();
        handle.record_result("a").unwrap();
        handle.record_result("b").unwrap();
        handle
            .record_error(PluginErrorDetail::new("b", "get_sites", "boom"))
            .unwrap();

        let partial = handle.snapshot();
        assert_eq!(partial.total_results, 3);
        assert!(!partial.is_final);

        let summary = handle.finalize().unwrap();
        assert!(summary.is_final);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.results_by_provider.get("a"), Some(&2));
        assert_eq!(summary.results_by_provider.get("b"), Some(&1));
        assert_eq!(summary.failed_providers(), vec!["b"]);
        assert!(summary.has_errors());
    }

    #[test]
    fn test_finalized_summary_rejects_updates() {
        let handle = SummaryHandle::new();
        handle.finalize().unwrap();
        let err = handle.record_result("a").unwrap_err();
        assert!(matches!(err, ShuttleError::Internal { .. }));
        assert_eq!(handle.snapshot().total_results, 0);
    }

    #[test]
    fn test_clones_share_state() {
        let handle = SummaryHandle::new();
        let other = handle.clone();
        handle.record_result("a").unwrap();
        assert_eq!(other.snapshot().total_results, 1);
    }

    #[test]
    fn test_failed_providers_deduplicates_in_order() {
        let handle = SummaryHandle::new();
        for (hub, op) in [("b", "get_metadata"), ("a", "get_sites"), ("b", "get_metadata")] {
            handle
                .record_error(PluginErrorDetail::new(hub, op, "x"))
                .unwrap();
        }
        assert_eq!(handle.snapshot().failed_providers(), vec!["b", "a"]);
    }

    #[test]
    fn test_summary_serializes_like_report() {
        let handle = SummaryHandle::new();
        handle
            .record_error(PluginErrorDetail::new("tern", "get_sites", "timeout"))
            .unwrap();
        let json = serde_json::to_value(handle.finalize().unwrap()).unwrap();
        assert_eq!(json["total_errors"], 1);
        assert_eq!(json["errors"][0]["data_hub"], "tern");
        assert_eq!(json["errors"][0]["operation"], "get_sites");
    }
}
