//! Serving a method and advertising it in the coordination store.

use super::dispatch::endpoint;
use super::listener::PortListener;
use crate::cluster::Cluster;
use crate::config::RpcDefaults;
use crate::discovery::{registration_key, registration_value};
use crate::error::Result;
use crate::method::{Handler, Method, Payload};
use crate::runtime::RpcRuntime;
use crate::shutdown::abort_process;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a served method lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Coordination store key advertising this instance.
    pub key: String,
    /// HTTP path the method is served at, `/<serviceName>/<path>`.
    pub route: String,
    pub local_addr: SocketAddr,
}

impl RpcRuntime {
    /// Serve `method` with `handler` and keep it advertised for as long as
    /// the cluster lease is renewed.
    ///
    /// # Panics
    ///
    /// Panics when no service name is available, when the path is empty,
    /// when the route is already served on the port, or when the port
    /// cannot be bound. These are startup configuration errors.
    pub async fn serve<I, O, H>(&self, method: &Method<I, O>, handler: H) -> Registration
    where
        I: Payload,
        O: Payload,
        H: Handler<I, O>,
    {
        let config = self.config();
        let service_name = method
            .service_name()
            .unwrap_or(&config.service_name)
            .trim_matches('/');
        if service_name.is_empty() {
            panic!("no service name set for rpc method {}", method.path());
        }
        if method.path().is_empty() {
            panic!("no path set for rpc method of service {}", service_name);
        }

        let port = method.port().unwrap_or(config.server_port);
        let timeout = method
            .timeout()
            .map(|t| t + RpcDefaults::SERVER_TIMEOUT_GRACE)
            .unwrap_or(RpcDefaults::SERVER_TIMEOUT);
        let route = format!("/{}/{}", service_name, method.path());

        let listener = match self.listener(port).await {
            Ok(listener) => listener,
            Err(e) => panic!("rpc server failed to start on port {}: {}", port, e),
        };
        let ep = endpoint(handler, Some(timeout), method.validator().cloned());
        if let Err(e) = listener.attach(&route, ep) {
            panic!("{}", e);
        }

        let cluster = self.cluster_or_default(method.cluster()).clone();
        let key = registration_key(cluster.registry_prefix(), service_name, method.path(), &config.pod_name);
        let value = registration_value(&config.namespace, listener.local_addr().port());
        tokio::spawn(publish(cluster, key.clone(), value, self.shutdown().token()));

        info!(route = %route, port = listener.local_addr().port(), "rpc method served");
        Registration {
            key,
            route,
            local_addr: listener.local_addr(),
        }
    }

    /// Listener for `port`, bound on first use.
    pub(crate) async fn listener(&self, port: u16) -> Result<Arc<PortListener>> {
        let mut listeners = self.inner().listeners.lock().await;
        if let Some(listener) = listeners.get(&port) {
            return Ok(listener.clone());
        }
        let listener = PortListener::bind(port, self.shutdown().token()).await?;
        listeners.insert(port, listener.clone());
        Ok(listener)
    }
}

/// Republish `key` under every lease the cluster tracker hands out.
async fn publish(cluster: Arc<Cluster>, key: String, value: String, shutdown: CancellationToken) {
    let mut leases = cluster.lease_tracker().subscribe();
    loop {
        let lease = tokio::select! {
            _ = shutdown.cancelled() => break,
            lease = leases.next() => lease,
        };
        let Some(lease) = lease else {
            warn!(key = %key, "lease tracker closed, registration no longer renewed");
            break;
        };

        let put = tokio::time::timeout(
            RpcDefaults::REGISTRATION_PUBLISH_TIMEOUT,
            cluster.store().put(&key, &value, Some(lease)),
        )
        .await;
        if shutdown.is_cancelled() {
            break;
        }
        match put {
            Ok(Ok(())) => debug!(key = %key, lease, "rpc method registered"),
            Ok(Err(e)) => abort_process(&format!("register service method {} failed: {}", key, e)),
            Err(_) => abort_process(&format!("register service method {} timed out", key)),
        }
    }
}
