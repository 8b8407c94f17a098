//! Capability contract for data hub backends.
//!
//! Every provider is reached only through [`DataHubPlugin`]. Backends are
//! registered in a [`PluginRegistry`] under a stable identifier together
//! with a factory; each orchestration call creates fresh instances.
//!
//! # Architecture
//!
//! - [`DataHubPlugin`] - Async trait that individual backends implement
//! - [`PluginRegistry`] - Registration-ordered catalog of provider factories
//! - [`PluginError`] - Provider-scoped failure of one contract call
//! - [`PluginHttpClient`] - Shared HTTP helper mapping failures to [`PluginError`]
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use async_trait::async_trait;
//! use futures_util::StreamExt;
//! use futures_util::stream;
//! use shuttle_core::plugin::{DataHubPlugin, PluginError, PluginRegistry, SiteStream};
//! use shuttle_core::{DatasetMetadata, Site, UserInfo};
//!
//! struct StaticHub;
//!
//! #[async_trait]
//! impl DataHubPlugin for StaticHub {
//!     fn id(&self) -> &str {
//!         "static"
//!     }
//!
//!     fn display_name(&self) -> &str {
//!         "Static Hub"
//!     }
//!
//!     fn get_sites(&self) -> SiteStream {
//!         let site = Site::new("US-Ha1", "static", 42.5, -72.2, "DBF")
//!             .map_err(|e| PluginError::invalid_record("static", e));
//!         stream::iter(vec![site]).boxed()
//!     }
//!
//!     async fn get_metadata(&self, site: &Site) -> Result<DatasetMetadata, PluginError> {
//!         DatasetMetadata::new(&site.site_id, "archive.zip", 2000, 2010, "https://example.org/a.zip")
//!             .map_err(|e| PluginError::invalid_record("static", e))
//!     }
//!
//!     async fn initiate_download(
//!         &self,
//!         _site: &Site,
//!         _destination: &Path,
//!         _user_info: Option<&UserInfo>,
//!     ) -> Result<String, PluginError> {
//!         Err(PluginError::unsupported("static", "initiate_download"))
//!     }
//! }
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = PluginRegistry::new();
//! registry.register("static", "Static Hub", || Box::new(StaticHub))?;
//! # Ok(())
//! # }
//! ```

mod http;
mod registry;

pub use http::{PluginHttpClient, PluginHttpTimeouts};
pub use registry::{PluginFactory, PluginRegistry, ProviderDescriptor, global, install_global};

use std::path::Path;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::error::ModelError;
use crate::models::{DatasetMetadata, Site, UserInfo};

/// Lazy, one-pass sequence of sites from one backend.
///
/// The stream may end with an error after yielding items; items already
/// yielded stay valid.
pub type SiteStream = BoxStream<'static, Result<Site, PluginError>>;

/// Failure of one capability-contract call, always attributed to a provider.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// Transport-level failure (DNS, connection refused, TLS, ...)
    #[error("plugin '{provider}': HTTP request to {url} failed: {reason}")]
    Http {
        /// Provider identifier
        provider: String,
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Non-success HTTP status
    #[error("plugin '{provider}': HTTP {status} from {url}")]
    HttpStatus {
        /// Provider identifier
        provider: String,
        /// Requested URL
        url: String,
        /// Status code
        status: u16,
    },

    /// The provider did not answer in time
    #[error("plugin '{provider}': timed out after {elapsed_ms} ms")]
    Timeout {
        /// Provider identifier
        provider: String,
        /// Time waited before giving up
        elapsed_ms: u64,
    },

    /// The provider answered with something that could not be interpreted
    #[error("plugin '{provider}': invalid response: {reason}")]
    InvalidResponse {
        /// Provider identifier
        provider: String,
        /// What was wrong with the response
        reason: String,
    },

    /// The provider returned a record that fails validation
    #[error("plugin '{provider}': invalid record: {source}")]
    InvalidRecord {
        /// Provider identifier
        provider: String,
        /// Validation failure
        #[source]
        source: ModelError,
    },

    /// The backend does not implement this operation
    #[error("plugin '{provider}': {operation} is not supported")]
    Unsupported {
        /// Provider identifier
        provider: String,
        /// Operation name
        operation: String,
    },

    /// Any other provider failure
    #[error("plugin '{provider}': {message}")]
    Other {
        /// Provider identifier
        provider: String,
        /// Failure description
        message: String,
    },
}

impl PluginError {
    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(provider: &str, elapsed_ms: u64) -> Self {
        Self::Timeout {
            provider: provider.to_string(),
            elapsed_ms,
        }
    }

    /// Creates an `InvalidResponse` error.
    #[must_use]
    pub fn invalid_response(provider: &str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidRecord` error.
    #[must_use]
    pub fn invalid_record(provider: &str, source: ModelError) -> Self {
        Self::InvalidRecord {
            provider: provider.to_string(),
            source,
        }
    }

    /// Creates an `Unsupported` error.
    #[must_use]
    pub fn unsupported(provider: &str, operation: &str) -> Self {
        Self::Unsupported {
            provider: provider.to_string(),
            operation: operation.to_string(),
        }
    }

    /// Creates an `Other` error.
    #[must_use]
    pub fn other(provider: &str, message: impl Into<String>) -> Self {
        Self::Other {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Provider the failure is attributed to.
    #[must_use]
    pub fn provider(&self) -> &str {
        match self {
            Self::Http { provider, .. }
            | Self::HttpStatus { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::InvalidResponse { provider, .. }
            | Self::InvalidRecord { provider, .. }
            | Self::Unsupported { provider, .. }
            | Self::Other { provider, .. } => provider,
        }
    }
}

/// Trait that all data hub backends must implement.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Box<dyn DataHubPlugin>`. Rust 2024 native async traits are not
/// object-safe, so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait DataHubPlugin: Send + Sync {
    /// Stable identifier used as registry key and for error attribution.
    fn id(&self) -> &str;

    /// Human-readable provider name (e.g. "AmeriFlux").
    fn display_name(&self) -> &str;

    /// Lists the provider's sites.
    ///
    /// The returned stream must be lazy: no I/O may happen before it is
    /// first polled. It must own everything it needs (clone the HTTP client
    /// into it) so it can outlive `&self`.
    fn get_sites(&self) -> SiteStream;

    /// Retrieves dataset metadata for one site.
    async fn get_metadata(&self, site: &Site) -> Result<DatasetMetadata, PluginError>;

    /// Starts retrieval of the site's data archive into `destination`.
    ///
    /// Returns an identifier of the retrieved artifact (typically a file name).
    async fn initiate_download(
        &self,
        site: &Site,
        destination: &Path,
        user_info: Option<&UserInfo>,
    ) -> Result<String, PluginError>;
}
