//! Coordination store abstraction.
//!
//! The RPC layer needs five things from the shared cluster store: prefix
//! reads, lease-bound writes, prefix watches, and lease grant/keep-alive.
//! [`CoordinationStore`] captures exactly that contract.
//!
//! - [`MemoryStore`]: in-process implementation with real lease expiry
//! - [`EtcdStore`]: etcd v3 implementation (feature `etcd`)

mod memory;

#[cfg(feature = "etcd")]
mod etcd;

pub use memory::MemoryStore;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Identifier of a time-bound lease.
pub type LeaseId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(KeyValue),
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete { key } => key,
        }
    }
}

/// Stream of watch events. It ends when the underlying watch is lost
/// (reconnect, compaction, lagging consumer); callers re-subscribe.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Yields once per successful lease renewal and ends when the lease is lost.
pub type KeepAliveStream = BoxStream<'static, ()>;

#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// All key/value pairs whose key starts with `prefix`.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Write `key`, optionally bound to `lease` so it vanishes with it.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribe to changes under `prefix`.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;

    /// Grant a lease that expires after `ttl_secs` unless renewed.
    async fn grant_lease(&self, ttl_secs: i64) -> Result<LeaseId>;

    /// Keep `lease` alive for as long as the returned stream is polled.
    async fn keep_alive(&self, lease: LeaseId) -> Result<KeepAliveStream>;

    /// Revoke `lease`, deleting every key bound to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<()>;
}
