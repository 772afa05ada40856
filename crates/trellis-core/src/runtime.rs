//! Process-wide RPC runtime.
//!
//! [`RpcRuntime`] carries everything a call or a registration needs: the
//! deployment config, the default cluster, one shared HTTP/2 client, the
//! per-port listener table and the shutdown coordinator. It is cheap to
//! clone and is passed explicitly to [`Method::call`](crate::Method::call)
//! and [`Method::serve`](crate::Method::serve).

use crate::cluster::Cluster;
use crate::config::{RpcConfig, RpcDefaults};
use crate::error::Result;
use crate::server::PortListener;
use crate::shutdown::Shutdown;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RpcRuntime {
    inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: RpcConfig,
    pub(crate) cluster: Arc<Cluster>,
    pub(crate) http: reqwest::Client,
    pub(crate) listeners: Mutex<HashMap<u16, Arc<PortListener>>>,
    pub(crate) shutdown: Shutdown,
}

impl std::fmt::Debug for RpcRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRuntime")
            .field("config", &self.inner.config)
            .field("cluster", &self.inner.cluster)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RpcRuntime`].
///
/// ```rust,ignore
/// let cluster = Arc::new(Cluster::new(Arc::new(MemoryStore::new())));
/// let runtime = RpcRuntime::builder(cluster)
///     .config(RpcConfig::default().with_namespace("ns1"))
///     .build()?;
/// ```
pub struct RpcRuntimeBuilder {
    cluster: Arc<Cluster>,
    config: RpcConfig,
    shutdown: Option<Shutdown>,
    http: Option<reqwest::Client>,
}

impl RpcRuntimeBuilder {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Self {
            cluster,
            config: RpcConfig::default(),
            shutdown: None,
            http: None,
        }
    }

    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing shutdown coordinator instead of creating one.
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Use a preconfigured HTTP client. It must speak HTTP/2 with prior
    /// knowledge.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn build(self) -> Result<RpcRuntime> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().http2_prior_knowledge().build()?,
        };
        let shutdown = self.shutdown.unwrap_or_default();

        // Registered first so it runs after every listener has stopped.
        let cluster = self.cluster.clone();
        shutdown.on_shutdown("cluster", move || async move {
            cluster.close().await;
            Ok(())
        });

        Ok(RpcRuntime {
            inner: Arc::new(RuntimeInner {
                config: self.config,
                cluster: self.cluster,
                http,
                listeners: Mutex::new(HashMap::new()),
                shutdown,
            }),
        })
    }
}

impl RpcRuntime {
    pub fn builder(cluster: Arc<Cluster>) -> RpcRuntimeBuilder {
        RpcRuntimeBuilder::new(cluster)
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Default cluster for methods that do not name one.
    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.inner.cluster
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.inner.shutdown
    }

    pub(crate) fn inner(&self) -> &RuntimeInner {
        &self.inner
    }

    pub(crate) fn cluster_or_default<'a>(&'a self, cluster: Option<&'a Arc<Cluster>>) -> &'a Arc<Cluster> {
        cluster.unwrap_or(&self.inner.cluster)
    }

    /// Stop listeners, registrations and discovery.
    pub async fn close(&self) {
        self.inner.shutdown.run(RpcDefaults::SHUTDOWN_TIMEOUT).await;
    }
}
