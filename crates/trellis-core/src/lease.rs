//! Shared lease tracking.
//!
//! Registrations bind their keys to a lease so they disappear when this
//! process stops renewing it. Every registration on a cluster shares one
//! lease, managed by a [`LeaseIdTracker`]: subscribers observe the current
//! lease id and every replacement granted after a lease is lost.

use crate::config::RpcDefaults;
use crate::error::Result;
use crate::store::{CoordinationStore, KeepAliveStream, LeaseId};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait LeaseIdTracker: Send + Sync {
    /// Start observing lease ids. The subscription is released on drop.
    fn subscribe(&self) -> LeaseSubscription;

    /// Stop tracking and revoke the current lease.
    async fn close(&self) {}
}

/// A live interest in the cluster lease.
pub struct LeaseSubscription {
    rx: watch::Receiver<Option<LeaseId>>,
    _guard: Box<dyn Send + Sync>,
}

impl std::fmt::Debug for LeaseSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseSubscription")
            .field("current", &*self.rx.borrow())
            .finish()
    }
}

impl LeaseSubscription {
    /// Wrap a receiver. `guard` is dropped together with the subscription.
    pub fn new(mut rx: watch::Receiver<Option<LeaseId>>, guard: impl Send + Sync + 'static) -> Self {
        rx.mark_changed();
        Self {
            rx,
            _guard: Box::new(guard),
        }
    }

    pub fn current(&self) -> Option<LeaseId> {
        *self.rx.borrow()
    }

    /// Next lease id this subscription has not seen yet. The first call
    /// returns the current lease as soon as one exists. `None` means the
    /// tracker is gone.
    pub async fn next(&mut self) -> Option<LeaseId> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(id) = *self.rx.borrow_and_update() {
                return Some(id);
            }
        }
    }

    pub fn unsubscribe(self) {}
}

/// Lease tracker backed by a [`CoordinationStore`].
///
/// The grant/renew loop only runs while at least one subscription exists.
#[derive(Clone)]
pub struct StoreLeaseTracker {
    shared: Arc<Shared>,
}

struct Shared {
    store: Arc<dyn CoordinationStore>,
    ttl_secs: i64,
    retry_delay: Duration,
    tx: watch::Sender<Option<LeaseId>>,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    subscribers: usize,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn grant(&self) -> Result<(LeaseId, KeepAliveStream)> {
        let id = self.store.grant_lease(self.ttl_secs).await?;
        match self.store.keep_alive(id).await {
            Ok(stream) => Ok((id, stream)),
            Err(e) => {
                let _ = self.store.revoke_lease(id).await;
                Err(e)
            }
        }
    }
}

impl StoreLeaseTracker {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_settings(store, RpcDefaults::LEASE_TTL_SECS, RpcDefaults::LEASE_RETRY_DELAY)
    }

    pub fn with_settings(store: Arc<dyn CoordinationStore>, ttl_secs: i64, retry_delay: Duration) -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                store,
                ttl_secs,
                retry_delay,
                tx,
                state: Mutex::new(TrackerState::default()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running.is_some()
    }
}

struct SubscriberGuard {
    shared: Arc<Shared>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some((cancel, _)) = state.running.take() {
                debug!("last lease subscriber released, stopping tracker");
                cancel.cancel();
                self.shared.tx.send_replace(None);
            }
        }
    }
}

#[async_trait]
impl LeaseIdTracker for StoreLeaseTracker {
    fn subscribe(&self) -> LeaseSubscription {
        let mut state = self.shared.lock();
        state.subscribers += 1;
        if state.running.is_none() {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_tracker(self.shared.clone(), cancel.clone()));
            state.running = Some((cancel, handle));
        }
        let rx = self.shared.tx.subscribe();
        drop(state);
        LeaseSubscription::new(
            rx,
            SubscriberGuard {
                shared: self.shared.clone(),
            },
        )
    }

    async fn close(&self) {
        let running = self.shared.lock().running.take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            let _ = handle.await;
        }
        self.shared.tx.send_replace(None);
    }
}

async fn run_tracker(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let granted = tokio::select! {
            _ = cancel.cancelled() => return,
            granted = shared.grant() => granted,
        };
        let (id, mut keep_alive) = match granted {
            Ok(lease) => lease,
            Err(e) => {
                error!(
                    error = %e,
                    retry_secs = shared.retry_delay.as_secs(),
                    "create and keep alive lease failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(shared.retry_delay) => continue,
                }
            }
        };

        if !cancel.is_cancelled() {
            info!(lease = id, "lease granted");
            shared.tx.send_replace(Some(id));
        }

        let stopped = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = async { while keep_alive.next().await.is_some() {} } => false,
        };
        if stopped {
            if let Err(e) = shared.store.revoke_lease(id).await {
                warn!(lease = id, error = %e, "revoke lease failed");
            }
            return;
        }
        warn!(lease = id, "lease keep-alive ended, granting a new lease");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker(store: &MemoryStore) -> StoreLeaseTracker {
        StoreLeaseTracker::with_settings(Arc::new(store.clone()), 2, Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_share_one_lease() {
        let store = MemoryStore::new();
        let tracker = tracker(&store);
        let mut a = tracker.subscribe();
        let first = a.next().await.unwrap();

        let mut b = tracker.subscribe();
        assert_eq!(b.next().await, Some(first));
        assert!(tracker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lease_is_replaced() {
        let store = MemoryStore::new();
        let tracker = tracker(&store);
        let mut sub = tracker.subscribe();
        let first = sub.next().await.unwrap();

        store.revoke_lease(first).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_unsubscribe_stops_and_revokes() {
        let store = MemoryStore::new();
        let tracker = tracker(&store);
        let mut sub = tracker.subscribe();
        let id = sub.next().await.unwrap();
        store.put("/rpc-services/a/b/pod", "ns,1", Some(id)).await.unwrap();

        sub.unsubscribe();
        assert!(!tracker.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get_prefix("/rpc-services").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_revokes_current_lease() {
        let store = MemoryStore::new();
        let tracker = tracker(&store);
        let mut sub = tracker.subscribe();
        let id = sub.next().await.unwrap();
        store.put("/k", "v", Some(id)).await.unwrap();

        tracker.close().await;
        assert!(store.get_prefix("/k").await.unwrap().is_empty());
        assert_eq!(sub.current(), None);
    }
}
