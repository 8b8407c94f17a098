//! Shared mock data hub backends for integration tests.
//!
//! [`MockHub`] is a configurable in-memory backend: a fixed site list, an
//! optional listing failure after N sites, per-step delays, per-site
//! metadata/download failures, and a never-ending listing whose drop can be
//! observed.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use shuttle_core::{
    DataHubPlugin, DatasetMetadata, PluginError, PluginRegistry, Site, SiteStream, UserInfo,
};
use tracing_subscriber::EnvFilter;

/// Routes library logs to the test harness; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a valid site owned by `data_hub`.
pub fn site(site_id: &str, data_hub: &str) -> Site {
    Site::new(site_id, data_hub, 45.2, 10.7, "ENF").expect("valid test site")
}

/// Sets a flag when dropped; used to observe stream cancellation.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Configurable in-memory backend.
#[derive(Clone)]
pub struct MockHub {
    id: String,
    sites: Vec<Site>,
    fail_after: Option<usize>,
    step_delay: Option<Duration>,
    failing_metadata: Vec<String>,
    failing_downloads: Vec<String>,
    hang_flag: Option<Arc<AtomicBool>>,
    listing_calls: Arc<AtomicUsize>,
}

impl MockHub {
    /// A backend that lists no sites.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            sites: Vec::new(),
            fail_after: None,
            step_delay: None,
            failing_metadata: Vec::new(),
            failing_downloads: Vec::new(),
            hang_flag: None,
            listing_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Lists the given site ids.
    pub fn with_sites(mut self, site_ids: &[&str]) -> Self {
        self.sites = site_ids.iter().map(|site_id| site(site_id, &self.id)).collect();
        self
    }

    /// Fails the listing after yielding `count` sites.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Sleeps before every listed site.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = Some(delay);
        self
    }

    /// Fails `get_metadata` for `site_id`.
    pub fn failing_metadata_for(mut self, site_id: &str) -> Self {
        self.failing_metadata.push(site_id.to_string());
        self
    }

    /// Fails `initiate_download` for `site_id`.
    pub fn failing_download_for(mut self, site_id: &str) -> Self {
        self.failing_downloads.push(site_id.to_string());
        self
    }

    /// Never ends the listing; `flag` is set once the listing is dropped.
    pub fn hanging(mut self, flag: Arc<AtomicBool>) -> Self {
        self.hang_flag = Some(flag);
        self
    }

    /// Counts `get_sites` calls across all instances of this backend.
    pub fn listing_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.listing_calls)
    }
}

#[async_trait]
impl DataHubPlugin for MockHub {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.id
    }

    fn get_sites(&self) -> SiteStream {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let mut items: Vec<Result<Site, PluginError>> =
            self.sites.iter().cloned().map(Ok).collect();
        if let Some(count) = self.fail_after {
            items.truncate(count);
            items.push(Err(PluginError::other(&self.id, "site listing failed")));
        }

        let delay = self.step_delay;
        let listing = stream::iter(items).then(move |item| async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            item
        });

        match &self.hang_flag {
            Some(flag) => {
                let guard = DropFlag(Arc::clone(flag));
                listing
                    .chain(stream::pending())
                    .map(move |item| {
                        let _keep = &guard;
                        item
                    })
                    .boxed()
            }
            None => listing.boxed(),
        }
    }

    async fn get_metadata(&self, site: &Site) -> Result<DatasetMetadata, PluginError> {
        if let Some(delay) = self.step_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_metadata.contains(&site.site_id) {
            return Err(PluginError::HttpStatus {
                provider: self.id.clone(),
                url: format!("https://{}.example.org/sites/{}", self.id, site.site_id),
                status: 404,
            });
        }
        DatasetMetadata::new(
            &site.site_id,
            format!("FLX_{}_FLUXNET_2001-2020.zip", site.site_id),
            2001,
            2020,
            &format!("https://{}.example.org/{}.zip", self.id, site.site_id),
        )
        .map(|metadata| metadata.with_source_provider(&self.id))
        .map_err(|error| PluginError::invalid_record(&self.id, error))
    }

    async fn initiate_download(
        &self,
        site: &Site,
        destination: &Path,
        user_info: Option<&UserInfo>,
    ) -> Result<String, PluginError> {
        if self.failing_downloads.contains(&site.site_id) {
            return Err(PluginError::other(&self.id, "archive unavailable"));
        }
        let file_name = format!("{}.zip", site.site_id);
        let requester = user_info.map_or("anonymous", |info| info.name.as_str());
        tokio::fs::write(destination.join(&file_name), requester)
            .await
            .map_err(|error| PluginError::other(&self.id, error.to_string()))?;
        Ok(file_name)
    }
}

/// Registers `hubs` in order and counts factory invocations.
pub fn registry_of(hubs: Vec<MockHub>) -> (Arc<PluginRegistry>, Arc<AtomicUsize>) {
    let instantiations = Arc::new(AtomicUsize::new(0));
    let mut registry = PluginRegistry::new();
    for hub in hubs {
        let counter = Arc::clone(&instantiations);
        let id = hub.id.clone();
        registry
            .register(&id, id.to_uppercase(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::new(hub.clone())
            })
            .expect("unique mock provider id");
    }
    (Arc::new(registry), instantiations)
}
