//! Plugin registry mapping provider identifiers to backend factories.
//!
//! The [`PluginRegistry`] keeps providers in registration order so listings
//! and cross-provider tie-breaks are deterministic. It is populated once at a
//! defined initialization point and then shared read-only (typically behind an
//! `Arc`); `create_instance` takes `&self` and is safe to call concurrently.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

use crate::error::ShuttleError;

use super::DataHubPlugin;

/// Produces a fresh backend instance per call.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn DataHubPlugin> + Send + Sync>;

static GLOBAL_REGISTRY: OnceLock<Arc<PluginRegistry>> = OnceLock::new();

/// Registration record for one provider. Immutable after registration.
#[derive(Clone)]
pub struct ProviderDescriptor {
    id: String,
    display_name: String,
    factory: PluginFactory,
}

impl ProviderDescriptor {
    /// Unique registry key.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable provider name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// A registration-ordered catalog of provider factories.
pub struct PluginRegistry {
    providers: Vec<ProviderDescriptor>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registers a provider under `id`.
    ///
    /// Re-registration is rejected rather than overwritten so a later
    /// registration can never silently shadow an earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::DuplicateProvider`] if `id` is already registered.
    #[tracing::instrument(skip(self, display_name, factory))]
    pub fn register<F>(
        &mut self,
        id: &str,
        display_name: impl Into<String>,
        factory: F,
    ) -> Result<(), ShuttleError>
    where
        F: Fn() -> Box<dyn DataHubPlugin> + Send + Sync + 'static,
    {
        if self.contains(id) {
            return Err(ShuttleError::duplicate_provider(id));
        }
        let descriptor = ProviderDescriptor {
            id: id.to_string(),
            display_name: display_name.into(),
            factory: Arc::new(factory),
        };
        debug!(
            id = descriptor.id(),
            display_name = descriptor.display_name(),
            position = self.providers.len(),
            "Registering provider"
        );
        self.providers.push(descriptor);
        Ok(())
    }

    /// Returns provider identifiers in registration order.
    #[must_use]
    pub fn list_plugins(&self) -> Vec<&str> {
        self.providers.iter().map(ProviderDescriptor::id).collect()
    }

    /// Returns true if `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.descriptor(id).is_some()
    }

    /// Returns the registration record for `id`.
    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|provider| provider.id == id)
    }

    /// Registration position of `id`, used as the cross-provider tie-break.
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.providers.iter().position(|provider| provider.id == id)
    }

    /// Creates a fresh backend instance for `id`.
    ///
    /// Instances are never cached: each call invokes the factory again, so
    /// backends may keep call-scoped state such as HTTP sessions.
    ///
    /// # Errors
    ///
    /// Returns [`ShuttleError::UnknownProvider`] if `id` is not registered.
    pub fn create_instance(&self, id: &str) -> Result<Box<dyn DataHubPlugin>, ShuttleError> {
        let descriptor = self
            .descriptor(id)
            .ok_or_else(|| ShuttleError::unknown_provider(id, &self.list_plugins()))?;
        debug!(id, "Creating provider instance");
        let backend = (descriptor.factory)();
        if backend.id() != id {
            warn!(
                registered = id,
                reported = backend.id(),
                "Provider instance id does not match its registry key; errors are attributed to the key"
            );
        }
        Ok(backend)
    }

    /// Returns the number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Returns true if no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("provider_count", &self.providers.len())
            .field("providers", &self.list_plugins())
            .finish()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the process-wide registry.
///
/// Call once from bootstrap code after all providers are registered; the
/// registry is immutable from then on and lives for the rest of the process.
///
/// # Errors
///
/// Returns [`ShuttleError::RegistryAlreadyInstalled`] on a second call.
pub fn install_global(registry: PluginRegistry) -> Result<Arc<PluginRegistry>, ShuttleError> {
    let registry = Arc::new(registry);
    GLOBAL_REGISTRY
        .set(Arc::clone(&registry))
        .map_err(|_| ShuttleError::RegistryAlreadyInstalled)?;
    debug!(providers = ?registry.list_plugins(), "Installed global plugin registry");
    Ok(registry)
}

/// Returns the process-wide registry, if installed.
#[must_use]
pub fn global() -> Option<Arc<PluginRegistry>> {
    GLOBAL_REGISTRY.get().cloned()
}
