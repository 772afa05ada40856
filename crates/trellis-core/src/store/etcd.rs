//! etcd v3 coordination store.

use super::{CoordinationStore, KeepAliveStream, KeyValue, LeaseId, WatchEvent, WatchStream};
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions,
};
use futures::StreamExt;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl From<etcd_client::Error> for RpcError {
    fn from(err: etcd_client::Error) -> Self {
        RpcError::network(format!("etcd: {}", err)).with_source(err)
    }
}

/// [`CoordinationStore`] backed by an etcd cluster.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore").finish_non_exhaustive()
    }
}

impl EtcdStore {
    /// Connect to the given endpoints, e.g. `["http://127.0.0.1:2379"]`.
    pub async fn connect<E: AsRef<str>>(endpoints: &[E]) -> Result<Self> {
        let options = ConnectOptions::new().with_connect_timeout(CONNECT_TIMEOUT);
        let client = Client::connect(endpoints, Some(options)).await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_key_value(kv: &etcd_client::KeyValue) -> Option<KeyValue> {
    Some(KeyValue {
        key: kv.key_str().ok()?.to_string(),
        value: kv.value_str().ok()?.to_string(),
    })
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp.kvs().iter().filter_map(to_key_value).collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut client = self.client.clone();
        let options = lease.map(|id| PutOptions::new().with_lease(id));
        client.put(key, value, options).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut client = self.client.clone();
        let (watcher, stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        // The watcher must outlive the stream or the watch is cancelled.
        let state = (watcher, stream, VecDeque::<WatchEvent>::new());
        let events = futures::stream::unfold(state, |(watcher, mut stream, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((event, (watcher, stream, pending)));
                }
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            debug!(reason = resp.cancel_reason(), "etcd watch canceled");
                            return None;
                        }
                        for event in resp.events() {
                            let Some(kv) = event.kv().and_then(to_key_value) else {
                                continue;
                            };
                            pending.push_back(match event.event_type() {
                                EventType::Put => WatchEvent::Put(kv),
                                EventType::Delete => WatchEvent::Delete { key: kv.key },
                            });
                        }
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(error = %e, "etcd watch stream failed");
                        return None;
                    }
                }
            }
        });
        Ok(events.boxed())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId> {
        let mut client = self.client.clone();
        let resp = client.lease_grant(ttl_secs, None).await?;
        Ok(resp.id())
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream> {
        let mut client = self.client.clone();
        let ttl = client
            .lease_time_to_live(lease, None)
            .await?
            .granted_ttl()
            .max(1);
        let interval = Duration::from_secs((ttl as u64 / 3).max(1));
        let (keeper, responses) = client.lease_keep_alive(lease).await?;

        let stream = futures::stream::unfold(
            (keeper, responses, true),
            move |(mut keeper, mut responses, first)| async move {
                if !first {
                    tokio::time::sleep(interval).await;
                }
                if let Err(e) = keeper.keep_alive().await {
                    warn!(lease, error = %e, "lease keep-alive request failed");
                    return None;
                }
                match responses.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => Some(((), (keeper, responses, false))),
                    Ok(_) => {
                        debug!(lease, "lease expired");
                        None
                    }
                    Err(e) => {
                        warn!(lease, error = %e, "lease keep-alive stream failed");
                        None
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<()> {
        let mut client = self.client.clone();
        client.lease_revoke(lease).await?;
        Ok(())
    }
}
