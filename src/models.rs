//! Site and dataset records supplied by data hub backends.
//!
//! Records are produced by a backend and are read-only to the orchestrator.
//! A site identifier is scoped to its owning provider; no cross-provider
//! identity merging is performed.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ModelError;

/// Site identifiers: country code (or cluster) prefix, dash, site code.
#[allow(clippy::expect_used)]
static SITE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z_]+-[A-Za-z0-9]+$").expect("site id regex is valid") // Static pattern, safe to panic
});

const MAX_SITE_ID_LEN: usize = 20;
const MAX_IGBP_LEN: usize = 10;
const MAX_DATA_HUB_LEN: usize = 50;
const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

/// A contact person attached to a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteContact {
    /// Full name.
    pub name: String,
    /// Role at the site (e.g. "PI", "Data manager").
    pub role: String,
    /// Contact email, possibly empty.
    pub email: String,
}

impl SiteContact {
    /// Creates a new contact.
    #[must_use]
    pub fn new(name: impl Into<String>, role: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            email: email.into(),
        }
    }
}

/// A measurement site as reported by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Site identifier (e.g. `US-Ha1`).
    pub site_id: String,
    /// Identifier of the provider that reported this site.
    pub data_hub: String,
    /// Human-readable site name, when the provider has one.
    pub site_name: Option<String>,
    /// Latitude in decimal degrees.
    pub location_lat: f64,
    /// Longitude in decimal degrees.
    pub location_long: f64,
    /// IGBP land-cover classification code.
    pub igbp: String,
    /// Team members listed for the site.
    pub contacts: Vec<SiteContact>,
}

impl Site {
    /// Creates a validated site with no name or contacts.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] when any field fails [`Site::validate`].
    pub fn new(
        site_id: impl Into<String>,
        data_hub: impl Into<String>,
        location_lat: f64,
        location_long: f64,
        igbp: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let site = Self {
            site_id: site_id.into().trim().to_string(),
            data_hub: data_hub.into().trim().to_string(),
            site_name: None,
            location_lat,
            location_long,
            igbp: igbp.into().trim().to_string(),
            contacts: Vec::new(),
        };
        site.validate()?;
        Ok(site)
    }

    /// Sets the human-readable site name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.site_name = Some(name.into());
        self
    }

    /// Appends a contact.
    #[must_use]
    pub fn with_contact(mut self, contact: SiteContact) -> Self {
        self.contacts.push(contact);
        self
    }

    /// Checks identifier format, text lengths and coordinate ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModelError`] found.
    pub fn validate(&self) -> Result<(), ModelError> {
        check_length("site_id", &self.site_id, MAX_SITE_ID_LEN)?;
        if !SITE_ID_PATTERN.is_match(&self.site_id) {
            return Err(ModelError::InvalidSiteId {
                site_id: self.site_id.clone(),
            });
        }
        check_length("data_hub", &self.data_hub, MAX_DATA_HUB_LEN)?;
        check_length("igbp", &self.igbp, MAX_IGBP_LEN)?;
        check_coordinate("location_lat", self.location_lat, 90.0)?;
        check_coordinate("location_long", self.location_long, 180.0)?;
        Ok(())
    }
}

/// Product metadata for the dataset published for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Site the dataset belongs to.
    pub site_id: String,
    /// Archive/product name, usually the file name of the archive.
    pub product_name: String,
    /// First year of data coverage.
    pub first_year: i32,
    /// Last year of data coverage, never before `first_year`.
    pub last_year: i32,
    /// Where the archive can be retrieved.
    pub download_link: Url,
    /// Processing pipeline version (e.g. `v1.3`).
    pub pipeline_version: String,
    /// Citation to use when publishing results from this dataset.
    pub citation: String,
    /// Provider-specific product identifier.
    pub product_id: String,
    /// Network that produced the product.
    pub source_provider: String,
}

impl DatasetMetadata {
    /// Creates validated metadata with empty citation/version/identifier fields.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError`] for out-of-range years, an inverted year range,
    /// or a download link that is not an absolute http(s) URL.
    pub fn new(
        site_id: impl Into<String>,
        product_name: impl Into<String>,
        first_year: i32,
        last_year: i32,
        download_link: &str,
    ) -> Result<Self, ModelError> {
        let metadata = Self {
            site_id: site_id.into(),
            product_name: product_name.into(),
            first_year,
            last_year,
            download_link: parse_download_link(download_link)?,
            pipeline_version: String::new(),
            citation: String::new(),
            product_id: String::new(),
            source_provider: String::new(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Sets the processing pipeline version.
    #[must_use]
    pub fn with_pipeline_version(mut self, version: impl Into<String>) -> Self {
        self.pipeline_version = version.into();
        self
    }

    /// Sets the citation string.
    #[must_use]
    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = citation.into();
        self
    }

    /// Sets the provider-specific product identifier.
    #[must_use]
    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = product_id.into();
        self
    }

    /// Sets the producing network.
    #[must_use]
    pub fn with_source_provider(mut self, source: impl Into<String>) -> Self {
        self.source_provider = source.into();
        self
    }

    /// Checks year bounds and ordering.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModelError`] found.
    pub fn validate(&self) -> Result<(), ModelError> {
        check_year("first_year", self.first_year)?;
        check_year("last_year", self.last_year)?;
        if self.last_year < self.first_year {
            return Err(ModelError::YearRangeInverted {
                first_year: self.first_year,
                last_year: self.last_year,
            });
        }
        Ok(())
    }

    /// Number of calendar years covered, inclusive.
    #[must_use]
    pub fn year_span(&self) -> u32 {
        self.last_year.abs_diff(self.first_year) + 1
    }
}

/// A site paired with the dataset published for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDataset {
    /// The site.
    pub site: Site,
    /// Its dataset metadata.
    pub metadata: DatasetMetadata,
}

/// Requester details some providers need before releasing data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Requester name.
    pub name: String,
    /// Requester email.
    pub email: String,
    /// Declared intended use, when the provider asks for one.
    pub intended_use: Option<String>,
    /// Free-text description of the request.
    pub description: Option<String>,
}

/// Result of one successful download initiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedArtifact {
    /// Site the artifact belongs to.
    pub site_id: String,
    /// Provider that served it.
    pub data_hub: String,
    /// Identifier of the retrieved artifact, as returned by the backend.
    pub artifact: String,
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), ModelError> {
    let length = value.chars().count();
    if length == 0 || length > max {
        return Err(ModelError::FieldLength { field, length, max });
    }
    Ok(())
}

fn check_coordinate(field: &'static str, value: f64, bound: f64) -> Result<(), ModelError> {
    // NaN fails the range check
    if !(-bound..=bound).contains(&value) {
        return Err(ModelError::CoordinateOutOfRange {
            field,
            value,
            min: -bound,
            max: bound,
        });
    }
    Ok(())
}

fn check_year(field: &'static str, value: i32) -> Result<(), ModelError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&value) {
        return Err(ModelError::YearOutOfRange { field, value });
    }
    Ok(())
}

fn parse_download_link(link: &str) -> Result<Url, ModelError> {
    let url = Url::parse(link.trim()).map_err(|error| ModelError::InvalidDownloadLink {
        link: link.to_string(),
        reason: error.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ModelError::InvalidDownloadLink {
            link: link.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(url)
}
