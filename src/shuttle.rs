//! Orchestrator fanning requests out across data hub providers.
//!
//! [`Shuttle`] resolves the providers a call targets, creates fresh backend
//! instances for them, and merges their results through an
//! [`ErrorCollector`]. Every call validates its targets before any provider
//! I/O happens: an unknown or disabled provider fails the call up front,
//! while failures during provider I/O only ever reach the call's summary.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::{StreamExt, stream};
use tracing::{debug, info};

use crate::collector::{
    ErrorCollector, SourceFailure, SourceStream, call_with_timeout, with_step_timeout,
};
use crate::config::ShuttleConfig;
use crate::discovery::Discovery;
use crate::error::ShuttleError;
use crate::models::{DownloadedArtifact, Site, SiteDataset, UserInfo};
use crate::plugin::{self, DataHubPlugin, PluginRegistry};
use crate::summary::{ErrorSummary, SummaryHandle};

const GET_SITES: &str = "get_sites";
const GET_METADATA: &str = "get_metadata";
const INITIATE_DOWNLOAD: &str = "initiate_download";

type Target = (String, Arc<dyn DataHubPlugin>);

/// Entry point for multi-provider discovery and download.
pub struct Shuttle {
    registry: Arc<PluginRegistry>,
    config: ShuttleConfig,
    last_summary: Mutex<Option<SummaryHandle>>,
}

impl Shuttle {
    /// Creates an orchestrator over `registry`.
    #[must_use]
    pub fn new(registry: Arc<PluginRegistry>, config: ShuttleConfig) -> Self {
        Self {
            registry,
            config,
            last_summary: Mutex::new(None),
        }
    }

    /// Creates an orchestrator over the process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] if no global registry is installed.
    pub fn from_global(config: ShuttleConfig) -> Result<Self, ShuttleError> {
        let registry = plugin::global().ok_or_else(|| {
            ShuttleError::config("no global plugin registry installed; call install_global first")
        })?;
        Ok(Self::new(registry, config))
    }

    /// The registry providers are resolved against.
    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ShuttleConfig {
        &self.config
    }

    /// All registered provider ids, in registration order.
    #[must_use]
    pub fn list_available_data_hubs(&self) -> Vec<&str> {
        self.registry.list_plugins()
    }

    /// Provider ids targeted when a call names none, in registration order.
    #[must_use]
    pub fn enabled_data_hubs(&self) -> Vec<&str> {
        self.registry
            .list_plugins()
            .into_iter()
            .filter(|id| self.config.is_enabled(id))
            .collect()
    }

    /// Streams the sites of every targeted provider.
    ///
    /// `provider_ids` of `None` targets every enabled provider. A provider
    /// whose listing fails is recorded under `get_sites` and skipped; sites
    /// it yielded before failing are kept.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::UnknownProvider`] or
    /// [`ShuttleError::ProviderDisabled`] before any provider is contacted.
    #[tracing::instrument(skip(self))]
    pub fn get_all_sites(
        &self,
        provider_ids: Option<&[&str]>,
    ) -> Result<Discovery<Site>, ShuttleError> {
        let targets = self.resolve_targets(provider_ids)?;
        let mut collector = ErrorCollector::new("get_all_sites", self.begin_call());
        for (provider_id, backend) in targets {
            let source = self.site_source(&provider_id, backend);
            collector.push_source(provider_id, source);
        }
        Ok(self.discovery(collector))
    }

    /// Streams every targeted provider's sites paired with dataset metadata.
    ///
    /// Up to `parallel_requests` metadata calls per provider run at once;
    /// results keep the provider's site order. A failed metadata call is
    /// recorded under `get_metadata` and only that site is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::UnknownProvider`] or
    /// [`ShuttleError::ProviderDisabled`] before any provider is contacted.
    #[tracing::instrument(skip(self))]
    pub fn get_all_datasets(
        &self,
        provider_ids: Option<&[&str]>,
    ) -> Result<Discovery<SiteDataset>, ShuttleError> {
        let targets = self.resolve_targets(provider_ids)?;
        let mut collector = ErrorCollector::new("get_all_datasets", self.begin_call());
        let limit = self.config.provider_timeout();
        for (provider_id, backend) in targets {
            let sites = self.site_source(&provider_id, Arc::clone(&backend));
            let id = provider_id.clone();
            let source = sites
                .map(move |site| {
                    let backend = Arc::clone(&backend);
                    let provider_id = id.clone();
                    async move {
                        let site = site?;
                        let metadata =
                            call_with_timeout(&provider_id, limit, backend.get_metadata(&site))
                                .await
                                .map_err(|error| SourceFailure::item(GET_METADATA, error))?;
                        Ok::<_, SourceFailure>(SiteDataset { site, metadata })
                    }
                })
                .buffered(self.parallel_requests())
                .boxed();
            collector.push_source(provider_id, source);
        }
        Ok(self.discovery(collector))
    }

    /// Starts downloads for `sites` into `destination`.
    ///
    /// Sites are grouped by their owning provider (`Site::data_hub`); each
    /// provider handles up to `parallel_requests` downloads at once. A failed
    /// download is recorded under `initiate_download` and the rest continue.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] if `destination` is not a directory,
    /// and [`ShuttleError::UnknownProvider`] or
    /// [`ShuttleError::ProviderDisabled`] for a site owned by an unusable
    /// provider. Nothing is downloaded in that case.
    #[tracing::instrument(skip(self, sites, user_info), fields(site_count = sites.len()))]
    pub fn download_sites(
        &self,
        sites: Vec<Site>,
        destination: &Path,
        user_info: Option<UserInfo>,
    ) -> Result<Discovery<DownloadedArtifact>, ShuttleError> {
        if !destination.is_dir() {
            return Err(ShuttleError::config(format!(
                "download destination '{}' is not a directory",
                destination.display()
            )));
        }
        let groups = self.group_by_provider(sites)?;
        let mut collector = ErrorCollector::new("download_sites", self.begin_call());
        let limit = self.config.provider_timeout();
        let destination = Arc::new(destination.to_path_buf());
        let user_info = Arc::new(user_info);

        for (provider_id, sites) in groups {
            let backend: Arc<dyn DataHubPlugin> =
                Arc::from(self.registry.create_instance(&provider_id)?);
            let source = download_source(
                provider_id.clone(),
                backend,
                sites,
                Arc::clone(&destination),
                Arc::clone(&user_info),
                limit,
                self.parallel_requests(),
            );
            collector.push_source(provider_id, source);
        }
        Ok(self.discovery(collector))
    }

    /// Summary of the most recent call, partial while it is still being consumed.
    #[must_use]
    pub fn last_errors(&self) -> ErrorSummary {
        self.last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(SummaryHandle::snapshot)
            .unwrap_or_default()
    }

    fn begin_call(&self) -> SummaryHandle {
        let summary = SummaryHandle::new();
        *self
            .last_summary
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        summary
    }

    // Literal configs skip `validate`; `buffered(0)` would never poll.
    fn parallel_requests(&self) -> usize {
        self.config.parallel_requests.max(1)
    }

    fn discovery<T>(&self, collector: ErrorCollector<T>) -> Discovery<T> {
        Discovery::new(collector, self.config.handoff_capacity)
    }

    /// Validates the requested ids, then instantiates them in registry order.
    fn resolve_targets(
        &self,
        provider_ids: Option<&[&str]>,
    ) -> Result<Vec<Target>, ShuttleError> {
        let ids = match provider_ids {
            None => self.enabled_data_hubs(),
            Some(requested) => {
                let mut ids: Vec<&str> = Vec::with_capacity(requested.len());
                for &id in requested {
                    self.check_usable(id)?;
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                ids.sort_by_key(|id| self.registry.position(id));
                ids
            }
        };
        info!(providers = ?ids, "Resolved target providers");

        ids.into_iter()
            .map(|id| -> Result<Target, ShuttleError> {
                let backend = self.registry.create_instance(id)?;
                Ok((id.to_string(), Arc::from(backend)))
            })
            .collect()
    }

    fn check_usable(&self, id: &str) -> Result<(), ShuttleError> {
        if !self.registry.contains(id) {
            return Err(ShuttleError::unknown_provider(
                id,
                &self.registry.list_plugins(),
            ));
        }
        if !self.config.is_enabled(id) {
            return Err(ShuttleError::provider_disabled(id));
        }
        Ok(())
    }

    fn group_by_provider(
        &self,
        sites: Vec<Site>,
    ) -> Result<Vec<(String, Vec<Site>)>, ShuttleError> {
        let mut groups: Vec<(String, Vec<Site>)> = Vec::new();
        for site in sites {
            match groups.iter_mut().find(|(id, _)| *id == site.data_hub) {
                Some((_, group)) => group.push(site),
                None => {
                    self.check_usable(&site.data_hub)?;
                    groups.push((site.data_hub.clone(), vec![site]));
                }
            }
        }
        groups.sort_by_key(|(id, _)| self.registry.position(id));
        debug!(providers = groups.len(), "Grouped download requests");
        Ok(groups)
    }

    /// Lazily lists one provider's sites; nothing runs before the first poll.
    fn site_source(
        &self,
        provider_id: &str,
        backend: Arc<dyn DataHubPlugin>,
    ) -> SourceStream<Site> {
        let source = stream::once(async move { backend.get_sites() })
            .flatten()
            .map(|site| site.map_err(|error| SourceFailure::provider(GET_SITES, error)))
            .boxed();
        match self.config.provider_timeout() {
            Some(limit) => with_step_timeout(provider_id, GET_SITES, source, limit),
            None => source,
        }
    }
}

impl std::fmt::Debug for Shuttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shuttle")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn download_source(
    provider_id: String,
    backend: Arc<dyn DataHubPlugin>,
    sites: Vec<Site>,
    destination: Arc<PathBuf>,
    user_info: Arc<Option<UserInfo>>,
    limit: Option<Duration>,
    parallel_requests: usize,
) -> SourceStream<DownloadedArtifact> {
    stream::iter(sites)
        .map(move |site| {
            let backend = Arc::clone(&backend);
            let provider_id = provider_id.clone();
            let destination = Arc::clone(&destination);
            let user_info = Arc::clone(&user_info);
            async move {
                let call =
                    backend.initiate_download(&site, &destination, Option::as_ref(&user_info));
                let artifact = call_with_timeout(&provider_id, limit, call)
                    .await
                    .map_err(|error| SourceFailure::item(INITIATE_DOWNLOAD, error))?;
                debug!(data_hub = %provider_id, site_id = %site.site_id, %artifact, "Download initiated");
                Ok::<_, SourceFailure>(DownloadedArtifact {
                    site_id: site.site_id,
                    data_hub: provider_id,
                    artifact,
                })
            }
        })
        .buffered(parallel_requests)
        .boxed()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::DatasetMetadata;
    use crate::plugin::{PluginError, SiteStream};

    struct ListingPlugin {
        id: &'static str,
        sites: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl DataHubPlugin for ListingPlugin {
        fn id(&self) -> &str {
            self.id
        }

        fn display_name(&self) -> &str {
            self.id
        }

        fn get_sites(&self) -> SiteStream {
            let id = self.id;
            let sites: Vec<_> = self
                .sites
                .iter()
                .map(|site_id| {
                    Site::new(*site_id, id, 10.0, 20.0, "GRA")
                        .map_err(|error| PluginError::invalid_record(id, error))
                })
                .collect();
            stream::iter(sites).boxed()
        }

        async fn get_metadata(&self, site: &Site) -> Result<DatasetMetadata, PluginError> {
            DatasetMetadata::new(
                &site.site_id,
                format!("{}.zip", site.site_id),
                2001,
                2020,
                "https://data.example.org/archive.zip",
            )
            .map_err(|error| PluginError::invalid_record(self.id, error))
        }

        async fn initiate_download(
            &self,
            site: &Site,
            _destination: &Path,
            _user_info: Option<&UserInfo>,
        ) -> Result<String, PluginError> {
            Ok(format!("{}.zip", site.site_id))
        }
    }

    fn shuttle(config: ShuttleConfig) -> Shuttle {
        let mut registry = PluginRegistry::new();
        registry
            .register("ameriflux", "AmeriFlux", || {
                Box::new(ListingPlugin {
                    id: "ameriflux",
                    sites: vec!["US-Ha1", "US-MMS"],
                })
            })
            .unwrap();
        registry
            .register("icos", "ICOS", || {
                Box::new(ListingPlugin {
                    id: "icos",
                    sites: vec!["DE-Hai"],
                })
            })
            .unwrap();
        Shuttle::new(Arc::new(registry), config)
    }

    #[test]
    fn test_enabled_data_hubs_respects_config() {
        let shuttle = shuttle(ShuttleConfig::default().with_data_hub("ameriflux", false));
        assert_eq!(shuttle.list_available_data_hubs(), vec!["ameriflux", "icos"]);
        assert_eq!(shuttle.enabled_data_hubs(), vec!["icos"]);
    }

    #[test]
    fn test_explicit_disabled_provider_fails_fast() {
        let shuttle = shuttle(ShuttleConfig::default().with_data_hub("icos", false));
        let err = shuttle.get_all_sites(Some(&["icos"][..])).unwrap_err();
        assert!(matches!(err, ShuttleError::ProviderDisabled { ref id, .. } if id == "icos"));
    }

    #[test]
    fn test_unknown_provider_lists_available() {
        let shuttle = shuttle(ShuttleConfig::default());
        let err = shuttle
            .get_all_sites(Some(&["icos", "fluxnet2015"][..]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("fluxnet2015"));
        assert!(msg.contains("ameriflux, icos"));
    }

    #[tokio::test]
    async fn test_requested_providers_follow_registry_order() {
        let shuttle = shuttle(ShuttleConfig::default());
        let sites = shuttle
            .get_all_sites(Some(&["icos", "ameriflux", "icos"][..]))
            .unwrap();
        let (sites, summary) = sites.collect_all().await.unwrap();
        let ids: Vec<&str> = sites.iter().map(|site| site.site_id.as_str()).collect();
        assert_eq!(ids, vec!["US-Ha1", "US-MMS", "DE-Hai"]);
        assert_eq!(summary.total_results, 3);
    }

    #[tokio::test]
    async fn test_last_errors_tracks_latest_call() {
        let shuttle = shuttle(ShuttleConfig::default());
        assert_eq!(shuttle.last_errors(), ErrorSummary::default());

        let sites = shuttle.get_all_sites(None).unwrap();
        assert!(!shuttle.last_errors().is_final);
        sites.collect_all().await.unwrap();
        assert!(shuttle.last_errors().is_final);
        assert_eq!(shuttle.last_errors().total_results, 3);
    }

    #[tokio::test]
    async fn test_datasets_pair_site_and_metadata() {
        let shuttle = shuttle(ShuttleConfig::default());
        let (datasets, summary) = shuttle
            .get_all_datasets(Some(&["ameriflux"][..]))
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert_eq!(datasets.len(), 2);
        for dataset in &datasets {
            assert_eq!(dataset.site.site_id, dataset.metadata.site_id);
        }
        assert!(!summary.has_errors());
    }

    #[tokio::test]
    async fn test_download_rejects_missing_destination() {
        let shuttle = shuttle(ShuttleConfig::default());
        let err = shuttle
            .download_sites(Vec::new(), Path::new("/definitely/not/here"), None)
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
