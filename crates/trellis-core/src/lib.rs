//! Trellis RPC - typed service-to-service calls over a shared coordination
//! store.
//!
//! A process declares [`Method`] descriptors, serves some of them and calls
//! others. Serving a method binds it on a shared HTTP/2 listener and
//! advertises it under a lease in the coordination store; callers find live
//! instances through a watch-driven [`DiscoveryCache`] and prefer instances
//! in their own namespace. Payloads are MessagePack, errors travel as
//! structured `{message, type, code}` bodies and keep their [`ErrorKind`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis_rpc::{Cluster, MemoryStore, Method, RpcConfig, RpcContext, RpcRuntime};
//!
//! #[tokio::main]
//! async fn main() -> trellis_rpc::Result<()> {
//!     let cluster = Arc::new(Cluster::new(Arc::new(MemoryStore::new())));
//!     let runtime = RpcRuntime::builder(cluster)
//!         .config(RpcConfig::default().with_service_name("greeter"))
//!         .build()?;
//!
//!     let greet: Method<String, String> = Method::new("greet");
//!     greet
//!         .serve(&runtime, |_ctx: RpcContext, name: String| async move {
//!             Ok(format!("hello {}", name))
//!         })
//!         .await;
//!
//!     let reply = greet.call(&runtime, &RpcContext::background(), &"trellis".into()).await?;
//!     println!("{}", reply);
//!     runtime.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod context;
pub mod debounce;
pub mod discovery;
pub mod error;
pub mod gateway;
pub mod lease;
pub mod method;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod store;

// Re-export commonly used types
pub use cluster::Cluster;
pub use codec::NoContent;
pub use config::{RpcConfig, RpcDefaults};
pub use context::{Metadata, RpcContext};
pub use discovery::{AdvertisedInstance, DiscoveryCache};
pub use error::{ErrorKind, Result, RpcError};
pub use gateway::{Gateway, Group, Interceptor, JsonTranscoder, Route};
pub use lease::{LeaseIdTracker, LeaseSubscription, StoreLeaseTracker};
pub use method::{Handler, Method, Payload};
pub use runtime::{RpcRuntime, RpcRuntimeBuilder};
pub use server::Registration;
pub use shutdown::Shutdown;
pub use store::{CoordinationStore, KeyValue, LeaseId, MemoryStore, WatchEvent};

#[cfg(feature = "etcd")]
pub use store::EtcdStore;
