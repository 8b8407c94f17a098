//! FLUXNET Shuttle Core Library
//!
//! This library discovers and catalogs datasets exposed by several
//! independent data hubs (AmeriFlux, ICOS, TERN, ...), presenting them
//! through one uniform interface while tolerating the failure of any
//! individual hub.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`plugin`] - Capability contract, plugin registry, shared HTTP helper
//! - [`models`] - Site and dataset records supplied by backends
//! - [`summary`] - Structured per-operation errors and the aggregate summary
//! - [`collector`] - Error-collecting stream over many provider sources
//! - [`bridge`] - Blocking consumption of cooperative streams
//! - [`discovery`] - Result handle returned by every orchestration call
//! - [`shuttle`] - Orchestrator fanning requests out across providers
//! - [`config`] - TOML-backed shuttle configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use shuttle_core::{PluginRegistry, Shuttle, ShuttleConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(PluginRegistry::new());
//! let shuttle = Shuttle::new(registry, ShuttleConfig::default());
//!
//! let mut sites = shuttle.get_all_sites(None)?.into_blocking()?;
//! for site in sites.by_ref() {
//!     let site = site?;
//!     println!("{} from {}", site.site_id, site.data_hub);
//! }
//! let summary = sites.summary().snapshot();
//! println!("{} sites, {} errors", summary.total_results, summary.total_errors);
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bridge;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod models;
pub mod plugin;
pub mod shuttle;
pub mod summary;

// Re-export commonly used types
pub use bridge::BlockingIter;
pub use collector::{
    Collected, ErrorCollector, FailureScope, MergedSources, SourceFailure, SourceStream,
};
pub use config::{DataHubConfig, ShuttleConfig};
pub use discovery::{BlockingDiscovery, Discovery};
pub use error::{ModelError, ShuttleError};
pub use models::{DatasetMetadata, DownloadedArtifact, Site, SiteContact, SiteDataset, UserInfo};
pub use plugin::{
    DataHubPlugin, PluginError, PluginFactory, PluginHttpClient, PluginRegistry,
    ProviderDescriptor, SiteStream,
};
pub use shuttle::Shuttle;
pub use summary::{ErrorSummary, PluginErrorDetail, SummaryHandle};
