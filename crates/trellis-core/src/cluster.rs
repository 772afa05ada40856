//! Handle to one coordination store.
//!
//! A [`Cluster`] owns the store together with the discovery cache and the
//! lease tracker built on top of it, so every method using the same cluster
//! shares one cache and one lease.

use crate::config::RpcDefaults;
use crate::discovery::DiscoveryCache;
use crate::lease::{LeaseIdTracker, StoreLeaseTracker};
use crate::store::CoordinationStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::info;

pub struct Cluster {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    debounce: Duration,
    discovery: OnceCell<Arc<DiscoveryCache>>,
    lease_tracker: Arc<dyn LeaseIdTracker>,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("prefix", &self.prefix)
            .field("debounce", &self.debounce)
            .field("discovery_started", &self.discovery.initialized())
            .finish_non_exhaustive()
    }
}

impl Cluster {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        let lease_tracker = Arc::new(StoreLeaseTracker::new(store.clone()));
        Self {
            store,
            prefix: RpcDefaults::REGISTRY_PREFIX.to_string(),
            debounce: RpcDefaults::DISCOVERY_DEBOUNCE,
            discovery: OnceCell::new(),
            lease_tracker,
        }
    }

    /// Registry key prefix. Only meaningful before discovery starts.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_discovery_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Replace the default store-backed lease tracker.
    pub fn with_lease_tracker(mut self, tracker: Arc<dyn LeaseIdTracker>) -> Self {
        self.lease_tracker = tracker;
        self
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn registry_prefix(&self) -> &str {
        &self.prefix
    }

    /// The cluster's discovery cache, loaded on first use.
    pub async fn discovery(&self) -> Arc<DiscoveryCache> {
        self.discovery
            .get_or_init(|| DiscoveryCache::start(self.store.clone(), self.prefix.clone(), self.debounce))
            .await
            .clone()
    }

    pub fn lease_tracker(&self) -> &Arc<dyn LeaseIdTracker> {
        &self.lease_tracker
    }

    /// Stop discovery and release the lease.
    pub async fn close(&self) {
        if let Some(discovery) = self.discovery.get() {
            discovery.stop();
        }
        self.lease_tracker.close().await;
        info!(prefix = %self.prefix, "cluster handle closed");
    }
}
