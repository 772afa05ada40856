//! One HTTP/2 listener per port, shared by every method served on it.

use super::dispatch::BoxedEndpoint;
use crate::error::{Result, RpcError};
use crate::protocol;
use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type RouteTable = Arc<RwLock<HashMap<String, BoxedEndpoint>>>;

pub struct PortListener {
    port: u16,
    local_addr: SocketAddr,
    routes: RouteTable,
}

impl std::fmt::Debug for PortListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortListener")
            .field("port", &self.port)
            .field("local_addr", &self.local_addr)
            .field("routes", &self.paths())
            .finish()
    }
}

impl PortListener {
    /// Bind `port` on all interfaces and start serving until `shutdown`
    /// is cancelled. Port 0 binds an ephemeral port; see
    /// [`PortListener::local_addr`].
    pub async fn bind(port: u16, shutdown: CancellationToken) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        let routes: RouteTable = Arc::new(RwLock::new(HashMap::new()));

        let table = routes.clone();
        let app = Router::new().fallback(move |req: Request| {
            let table = table.clone();
            async move { dispatch(&table, req).await }
        });

        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            match served {
                Ok(()) => info!(port = local_addr.port(), "rpc server stopped"),
                Err(e) => error!(port = local_addr.port(), error = %e, "rpc server failed"),
            }
        });
        info!(port = local_addr.port(), "rpc server started");

        Ok(Arc::new(Self {
            port,
            local_addr,
            routes,
        }))
    }

    /// Port this listener was requested for.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Attach `endpoint` at `path`. Each path can be attached once.
    pub fn attach(&self, path: &str, endpoint: BoxedEndpoint) -> Result<()> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.contains_key(path) {
            return Err(RpcError::conflict(format!("handler for path {} already exists", path)));
        }
        routes.insert(path.to_string(), endpoint);
        Ok(())
    }

    pub fn paths(&self) -> Vec<String> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = routes.keys().cloned().collect();
        paths.sort();
        paths
    }
}

/// Table key for a request. A `rpc-service-name` header scopes a bare
/// method path to that service.
fn route_key(path: &str, headers: &HeaderMap) -> String {
    let service = headers
        .get(protocol::HEADER_SERVICE_NAME)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty());
    match service {
        Some(service) if !path.starts_with(&format!("/{}/", service)) => {
            format!("/{}/{}", service, path.trim_start_matches('/'))
        }
        _ => path.to_string(),
    }
}

async fn dispatch(routes: &RouteTable, req: Request) -> Response {
    let key = route_key(req.uri().path(), req.headers());
    let endpoint = routes
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
        .cloned();
    match endpoint {
        Some(endpoint) => endpoint(req).await,
        None => protocol::error_response(&RpcError::not_found(format!("rpc method {} not found", key))),
    }
}
