//! Resource Locator
//!
//! Resolves human-given names to provider identifiers once per scenario and
//! caches the resulting handles. Concurrent first lookups may both reach the
//! provider, but only the first resolved handle is ever stored, so every
//! caller observes the same identifier.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::provider::CloudProvider;
use crate::resource::{ResourceHandle, ResourceKind};

#[derive(Clone)]
pub struct ResourceLocator {
    provider: Arc<dyn CloudProvider>,
    cache: Arc<DashMap<(ResourceKind, String), Arc<ResourceHandle>>>,
}

impl std::fmt::Debug for ResourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLocator")
            .field("cached_handles", &self.cache.len())
            .finish()
    }
}

impl ResourceLocator {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            cache: Arc::new(DashMap::new()),
        }
    }

    /// Resolve `(kind, name)`, hitting the provider only on the first call.
    #[instrument(skip(self))]
    pub async fn locate(&self, kind: ResourceKind, name: &str) -> Result<Arc<ResourceHandle>> {
        let key = (kind, name.to_string());
        if let Some(handle) = self.cache.get(&key) {
            debug!("resource handle served from cache");
            return Ok(Arc::clone(handle.value()));
        }

        let identifier = self.provider.find_resource(kind, name).await?;
        let handle = Arc::new(ResourceHandle::new(kind, name, identifier));
        let stored = Arc::clone(self.cache.entry(key).or_insert(handle).value());
        info!(identifier = stored.resolved_identifier(), "resolved {}", stored);
        Ok(stored)
    }

    pub fn cached(&self, kind: ResourceKind, name: &str) -> Option<Arc<ResourceHandle>> {
        self.cache
            .get(&(kind, name.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    pub fn provider(&self) -> &Arc<dyn CloudProvider> {
        &self.provider
    }
}
