//! Shuttle configuration loading.
//!
//! Configuration is a small TOML document:
//!
//! ```toml
//! parallel_requests = 4
//! handoff_capacity = 32
//! provider_timeout_ms = 30000
//!
//! [data_hubs.icos]
//! enabled = false
//! ```
//!
//! Providers that do not appear under `data_hubs` are enabled.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ShuttleError;

const DEFAULT_PARALLEL_REQUESTS: usize = 3;
const DEFAULT_HANDOFF_CAPACITY: usize = 16;
const MAX_PARALLEL_REQUESTS: usize = 64;
const MAX_HANDOFF_CAPACITY: usize = 1024;
const MAX_PROVIDER_TIMEOUT_MS: u64 = 3_600_000;

/// Per-provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataHubConfig {
    /// Whether the provider takes part in calls that do not name providers.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for DataHubConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_enabled() -> bool {
    true
}

/// Orchestration settings shared by every call of one [`Shuttle`](crate::Shuttle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShuttleConfig {
    /// Per-provider overrides keyed by provider id.
    pub data_hubs: BTreeMap<String, DataHubConfig>,
    /// Concurrent metadata/download calls per provider (1..=64).
    pub parallel_requests: usize,
    /// Bounded capacity of the blocking handoff channel (1..=1024).
    pub handoff_capacity: usize,
    /// Optional per-step provider timeout in milliseconds (1..=3600000).
    pub provider_timeout_ms: Option<u64>,
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            data_hubs: BTreeMap::new(),
            parallel_requests: DEFAULT_PARALLEL_REQUESTS,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
            provider_timeout_ms: None,
        }
    }
}

impl ShuttleConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] for malformed TOML, unknown keys or
    /// out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ShuttleError> {
        let config: Self =
            toml::from_str(raw).map_err(|error| ShuttleError::config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from `path`.
    ///
    /// A missing file yields defaults with a warning; a file that exists but
    /// cannot be read or parsed is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] if the file is unreadable or invalid.
    pub fn load_from_file(path: &Path) -> Result<Self, ShuttleError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(ShuttleError::config(format!(
                    "failed to read config file '{}': {error}",
                    path.display()
                )));
            }
        };
        let config = Self::from_toml_str(&raw).map_err(|error| match error {
            ShuttleError::Config { reason, suggestion } => ShuttleError::Config {
                reason: format!("config file '{}': {reason}", path.display()),
                suggestion,
            },
            other => other,
        })?;
        debug!(path = %path.display(), "Loaded shuttle config");
        Ok(config)
    }

    /// Loads configuration from the default per-user location.
    ///
    /// Falls back to defaults when no location can be resolved or no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] if a file exists but is invalid.
    pub fn load_default() -> Result<Self, ShuttleError> {
        match resolve_default_config_path() {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No config directory resolvable, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::Config`] naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), ShuttleError> {
        validate_range(
            "parallel_requests",
            self.parallel_requests,
            MAX_PARALLEL_REQUESTS,
        )?;
        validate_range(
            "handoff_capacity",
            self.handoff_capacity,
            MAX_HANDOFF_CAPACITY,
        )?;
        if let Some(timeout_ms) = self.provider_timeout_ms
            && !(1..=MAX_PROVIDER_TIMEOUT_MS).contains(&timeout_ms)
        {
            return Err(ShuttleError::config(format!(
                "invalid value for `provider_timeout_ms`: {timeout_ms}. Expected range: 1..={MAX_PROVIDER_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }

    /// Returns true unless `id` is explicitly disabled.
    #[must_use]
    pub fn is_enabled(&self, id: &str) -> bool {
        self.data_hubs.get(id).is_none_or(|hub| hub.enabled)
    }

    /// Per-step provider timeout, if configured.
    #[must_use]
    pub fn provider_timeout(&self) -> Option<Duration> {
        self.provider_timeout_ms.map(Duration::from_millis)
    }

    /// Marks `id` enabled or disabled.
    #[must_use]
    pub fn with_data_hub(mut self, id: impl Into<String>, enabled: bool) -> Self {
        self.data_hubs.insert(id.into(), DataHubConfig { enabled });
        self
    }
}

fn validate_range(field: &str, value: usize, max: usize) -> Result<(), ShuttleError> {
    if !(1..=max).contains(&value) {
        return Err(ShuttleError::config(format!(
            "invalid value for `{field}`: {value}. Expected range: 1..={max}"
        )));
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/fluxnet-shuttle/config.toml`
/// 2. `$HOME/.config/fluxnet-shuttle/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("fluxnet-shuttle")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("fluxnet-shuttle")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
