//! Service discovery cache.
//!
//! Registrations live in the coordination store as
//! `<prefix>/<serviceName>/<path...>/<podName>` → `<namespace>,<port>`.
//! [`DiscoveryCache`] loads every key under the prefix once at construction,
//! then follows a prefix watch and reloads (debounced) whenever anything
//! changes. A failed reload keeps the previous map: discovery never blocks
//! or fails a caller because the store is briefly unavailable.

use crate::config::RpcDefaults;
use crate::debounce::Debouncer;
use crate::store::CoordinationStore;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One live instance of a method, as advertised in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedInstance {
    pub service_name: String,
    pub path: String,
    pub namespace: String,
    pub port: u16,
}

impl AdvertisedInstance {
    /// Parse one registration entry. Returns `None` for anything that is not
    /// a well-formed registration.
    pub fn parse(prefix: &str, key: &str, value: &str) -> Option<Self> {
        if key.is_empty() || value.is_empty() {
            return None;
        }
        let rest = key.strip_prefix(prefix)?.trim_matches('/');
        let segments: Vec<&str> = rest.split('/').collect();
        // service, at least one path segment, pod
        if segments.len() < 3 {
            return None;
        }
        let service_name = segments[0];
        let path = segments[1..segments.len() - 1].join("/");

        let (namespace, port) = value.split_once(',')?;
        if port.contains(',') {
            return None;
        }
        let port = port.trim().parse().ok()?;

        Some(Self {
            service_name: service_name.to_string(),
            path,
            namespace: namespace.to_string(),
            port,
        })
    }
}

/// Key under which `pod` advertises `service_name`/`path`.
pub fn registration_key(prefix: &str, service_name: &str, path: &str, pod: &str) -> String {
    format!(
        "{}/{}/{}/{}",
        prefix.trim_end_matches('/'),
        service_name,
        path.trim_matches('/'),
        pod
    )
}

pub fn registration_value(namespace: &str, port: u16) -> String {
    format!("{},{}", namespace, port)
}

type ServiceMap = HashMap<String, Vec<Arc<AdvertisedInstance>>>;

pub struct DiscoveryCache {
    services: Arc<RwLock<ServiceMap>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("DiscoveryCache")
            .field("paths", &services.len())
            .finish()
    }
}

impl DiscoveryCache {
    /// Load the current registrations and start following the store.
    pub async fn start(store: Arc<dyn CoordinationStore>, prefix: impl Into<String>, debounce: Duration) -> Arc<Self> {
        let prefix = prefix.into();
        let services = Arc::new(RwLock::new(ServiceMap::new()));
        reload(store.as_ref(), &prefix, &services).await;

        let cancel = CancellationToken::new();
        tokio::spawn(watch_loop(
            store,
            prefix,
            services.clone(),
            debounce,
            cancel.clone(),
        ));

        Arc::new(Self { services, cancel })
    }

    /// Instances serving `path`, optionally restricted to one service.
    /// `None` when nothing matches.
    pub fn find(&self, path: &str, service_name: Option<&str>) -> Option<Vec<Arc<AdvertisedInstance>>> {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let list = services.get(path)?;
        let found: Vec<_> = match service_name.filter(|s| !s.is_empty()) {
            Some(name) => list
                .iter()
                .filter(|i| i.service_name == name)
                .cloned()
                .collect(),
            None => list.clone(),
        };
        (!found.is_empty()).then_some(found)
    }

    /// Stop following the store. The last loaded map stays readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DiscoveryCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn reload(store: &dyn CoordinationStore, prefix: &str, services: &RwLock<ServiceMap>) {
    let entries = match store.get_prefix(prefix).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "rpc discovery load failed, keeping previous view");
            return;
        }
    };

    let mut by_path = ServiceMap::new();
    for kv in &entries {
        match AdvertisedInstance::parse(prefix, &kv.key, &kv.value) {
            Some(instance) => by_path
                .entry(instance.path.clone())
                .or_default()
                .push(Arc::new(instance)),
            None => debug!(key = %kv.key, "skipping malformed registration"),
        }
    }
    debug!(paths = by_path.len(), entries = entries.len(), "rpc discovery reloaded");

    *services.write().unwrap_or_else(PoisonError::into_inner) = by_path;
}

async fn watch_loop(
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    services: Arc<RwLock<ServiceMap>>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let debouncer = {
        let store = store.clone();
        let prefix = prefix.clone();
        let services = services.clone();
        Debouncer::spawn(debounce, move || {
            let store = store.clone();
            let prefix = prefix.clone();
            let services = services.clone();
            async move { reload(store.as_ref(), &prefix, &services).await }
        })
    };

    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            subscribed = store.watch_prefix(&prefix) => subscribed,
        };
        match subscribed {
            Ok(mut events) => {
                // Changes may have landed while no watch was active.
                debouncer.trigger();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debouncer.stop();
                            return;
                        }
                        event = events.next() => match event {
                            Some(_) => debouncer.trigger(),
                            None => break,
                        },
                    }
                }
                info!("rpc discovery watch closed, resubscribing");
            }
            Err(e) => warn!(error = %e, "rpc discovery watch failed, retrying"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RpcDefaults::WATCH_RESUBSCRIBE_DELAY) => {}
        }
    }
    debouncer.stop();
}
