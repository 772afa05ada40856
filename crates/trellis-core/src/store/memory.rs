//! In-process coordination store.
//!
//! Implements the full [`CoordinationStore`] contract, including lease
//! expiry: when a lease is neither renewed nor revoked before its TTL
//! elapses, every key bound to it is deleted and a delete event reaches all
//! watchers. Used for tests and single-node deployments.

use super::{CoordinationStore, KeepAliveStream, KeyValue, LeaseId, WatchEvent, WatchStream};
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

const EVENT_CAPACITY: usize = 1024;
const MIN_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseState>,
    next_lease: LeaseId,
}

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct LeaseState {
    ttl: Duration,
    expires_at: Instant,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MemoryStore")
            .field("entries", &state.entries.len())
            .field("leases", &state.leases.len())
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, events: Vec<WatchEvent>) {
        for event in events {
            // No receivers is fine: nobody is watching yet.
            let _ = self.events.send(event);
        }
    }

    /// Remove `lease` and every key bound to it.
    fn drop_lease(state: &mut State, lease: LeaseId) -> Vec<WatchEvent> {
        state.leases.remove(&lease);
        let bound: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.lease == Some(lease))
            .map(|(key, _)| key.clone())
            .collect();
        bound
            .into_iter()
            .map(|key| {
                state.entries.remove(&key);
                WatchEvent::Delete { key }
            })
            .collect()
    }
}

/// Watch `lease` until it is renewed past its deadline, revoked, or expires.
fn spawn_expiry(weak: Weak<Inner>, lease: LeaseId, first_deadline: Instant) {
    tokio::spawn(async move {
        let mut wake = first_deadline;
        loop {
            tokio::time::sleep_until(wake).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let events = {
                let mut state = inner.lock();
                match state.leases.get(&lease) {
                    None => return,
                    Some(l) if l.expires_at > Instant::now() => {
                        wake = l.expires_at;
                        continue;
                    }
                    Some(_) => Inner::drop_lease(&mut state, lease),
                }
            };
            debug!(lease, keys = events.len(), "lease expired");
            inner.publish(events);
            return;
        }
    });
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.inner.lock();
        Ok(state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        {
            let mut state = self.inner.lock();
            if let Some(id) = lease {
                if !state.leases.contains_key(&id) {
                    return Err(RpcError::not_found(format!("lease {} not found", id)));
                }
            }
            state.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    lease,
                },
            );
        }
        self.inner.publish(vec![WatchEvent::Put(KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        })]);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let removed = self.inner.lock().entries.remove(key).is_some();
        if removed {
            self.inner.publish(vec![WatchEvent::Delete {
                key: key.to_string(),
            }]);
        }
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let rx = self.inner.events.subscribe();
        let prefix = prefix.to_string();
        let stream = futures::stream::unfold(rx, move |mut rx| {
            let prefix = prefix.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(event) if event.key().starts_with(&prefix) => return Some((event, rx)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "watch consumer lagged, closing stream");
                            return None;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        if ttl_secs <= 0 {
            return Err(RpcError::validation(format!(
                "lease ttl must be positive, got {}",
                ttl_secs
            )));
        }
        let ttl = Duration::from_secs(ttl_secs as u64);
        let expires_at = Instant::now() + ttl;
        let id = {
            let mut state = self.inner.lock();
            state.next_lease += 1;
            let id = state.next_lease;
            state.leases.insert(id, LeaseState { ttl, expires_at });
            id
        };
        spawn_expiry(Arc::downgrade(&self.inner), id, expires_at);
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let ttl = self
            .inner
            .lock()
            .leases
            .get(&lease)
            .map(|l| l.ttl)
            .ok_or_else(|| RpcError::not_found(format!("lease {} not found", lease)))?;
        let interval = (ttl / 3).max(MIN_KEEP_ALIVE_INTERVAL);
        let weak = Arc::downgrade(&self.inner);

        let stream = futures::stream::unfold((weak, true), move |(weak, first)| async move {
            if !first {
                tokio::time::sleep(interval).await;
            }
            let inner = weak.upgrade()?;
            let renewed = {
                let mut state = inner.lock();
                match state.leases.get_mut(&lease) {
                    Some(l) => {
                        l.expires_at = Instant::now() + l.ttl;
                        true
                    }
                    None => false,
                }
            };
            renewed.then_some(((), (weak, false)))
        });
        Ok(stream.boxed())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let events = {
            let mut state = self.inner.lock();
            Inner::drop_lease(&mut state, lease)
        };
        self.inner.publish(events);
        Ok(())
    }
}
