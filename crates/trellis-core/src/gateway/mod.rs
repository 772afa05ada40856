//! HTTP gateway composing routes from several groups.
//!
//! Every route is reachable at exactly `<group path>/<route path>`. Requests
//! pass through the configured interceptors in order before reaching the
//! route; any interceptor can answer the request itself and stop the chain.

mod route;
mod transcoder;

pub use route::Route;
pub use transcoder::JsonTranscoder;

use crate::error::{Result, RpcError};
use crate::protocol;
use crate::runtime::RpcRuntime;
use crate::server::BoxedEndpoint;
use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use axum::Router;
use futures::FutureExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info};

/// A set of routes sharing a path prefix.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub description: String,
    pub path: String,
    pub routes: Vec<Route>,
}

impl Group {
    pub fn new(path: impl Into<String>, routes: Vec<Route>) -> Self {
        Self {
            description: String::new(),
            path: path.into(),
            routes,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Pre-routing hook. Returning `Break` answers the request with the given
/// response and skips the remaining interceptors and the route.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, req: &mut Request, route: &Route, group: &Group) -> ControlFlow<Response>;
}

#[async_trait]
impl<F> Interceptor for F
where
    F: Fn(&mut Request, &Route, &Group) -> ControlFlow<Response> + Send + Sync,
{
    async fn intercept(&self, req: &mut Request, route: &Route, group: &Group) -> ControlFlow<Response> {
        self(req, route, group)
    }
}

#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    groups: Vec<Group>,
    /// Full path → (group index, route index).
    table: HashMap<String, (usize, usize)>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<&String> = self.inner.table.keys().collect();
        paths.sort();
        f.debug_struct("Gateway")
            .field("paths", &paths)
            .field("interceptors", &self.inner.interceptors.len())
            .finish()
    }
}

/// `/a/` + `b//c` → `/a/b/c`.
fn join_path(prefix: &str, path: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

impl Gateway {
    /// Build the route table.
    ///
    /// # Panics
    ///
    /// Panics if two routes resolve to the same path. Use
    /// [`Gateway::try_new`] to get an error instead.
    pub fn new(groups: Vec<Group>, interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        match Self::try_new(groups, interceptors) {
            Ok(gateway) => gateway,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn try_new(groups: Vec<Group>, interceptors: Vec<Arc<dyn Interceptor>>) -> Result<Self> {
        let mut table = HashMap::new();
        for (g, group) in groups.iter().enumerate() {
            for (r, route) in group.routes.iter().enumerate() {
                let path = join_path(&group.path, route.path());
                if table.insert(path.clone(), (g, r)).is_some() {
                    return Err(RpcError::conflict(format!("duplicate route {}", path)));
                }
            }
        }
        Ok(Self {
            inner: Arc::new(GatewayInner {
                groups,
                table,
                interceptors,
            }),
        })
    }

    /// Groups as declared, for documentation generators.
    pub fn groups(&self) -> &[Group] {
        &self.inner.groups
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inner.table.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub async fn handle(&self, mut req: Request) -> Response {
        let path = req.uri().path().to_string();
        let Some(&(g, r)) = self.inner.table.get(&path) else {
            debug!(path = %path, "gateway route not found");
            return protocol::error_response(&RpcError::not_found(format!("path [{}] not found", path)));
        };
        let group = &self.inner.groups[g];
        let route = &group.routes[r];

        for interceptor in &self.inner.interceptors {
            if let ControlFlow::Break(response) = interceptor.intercept(&mut req, route, group).await {
                debug!(path = %path, "request stopped by interceptor");
                return response;
            }
        }
        route.handle(req).await
    }

    /// Attach every route to the runtime's shared listener for `port`, or
    /// the configured server port when `None`. The listener stops with the
    /// runtime.
    pub async fn serve(&self, runtime: &RpcRuntime, port: Option<u16>) -> Result<SocketAddr> {
        let port = port.unwrap_or(runtime.config().server_port);
        let listener = runtime.listener(port).await?;
        for path in self.paths() {
            let gateway = self.clone();
            let endpoint: BoxedEndpoint = Arc::new(move |req: Request| {
                let gateway = gateway.clone();
                async move { gateway.handle(req).await }.boxed()
            });
            listener.attach(&path, endpoint)?;
        }
        info!(port = listener.local_addr().port(), routes = self.inner.table.len(), "gateway served");
        Ok(listener.local_addr())
    }

    /// Mount the gateway as the fallback of a fresh router.
    pub fn into_router(self) -> Router {
        Router::new().fallback(move |req: Request| {
            let gateway = self.clone();
            async move { gateway.handle(req).await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, NoContent};
    use crate::context::RpcContext;
    use crate::error::ErrorKind;
    use axum::body::{to_bytes, Body};
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ping() -> Route {
        Route::hosted("ping", |_ctx: RpcContext, _in: NoContent| async {
            Ok::<_, RpcError>("pong".to_string())
        })
    }

    fn post(path: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_join_path_normalizes() {
        assert_eq!(join_path("/api/", "/v1//ping"), "/api/v1/ping");
        assert_eq!(join_path("", "ping"), "/ping");
        assert_eq!(join_path("/", "/"), "/");
    }

    #[test]
    fn test_duplicate_across_groups_rejected() {
        let groups = vec![
            Group::new("/api", vec![ping()]),
            Group::new("api/", vec![ping()]),
        ];
        let err = Gateway::try_new(groups, Vec::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.message(), "duplicate route /api/ping");
    }

    #[test]
    #[should_panic(expected = "duplicate route")]
    fn test_new_panics_on_duplicate() {
        Gateway::new(vec![Group::new("/x", vec![ping(), ping()])], Vec::new());
    }

    #[tokio::test]
    async fn test_hosted_route_and_miss() {
        let gateway = Gateway::new(vec![Group::new("/api", vec![ping()])], Vec::new());
        assert_eq!(gateway.paths(), vec!["/api/ping".to_string()]);
        assert_eq!(gateway.groups().len(), 1);

        let response = gateway.handle(post("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(codec::decode::<String>(&bytes).unwrap(), "pong");

        let response = gateway.handle(post("/api/missing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let err = codec::decode_error(&bytes).unwrap();
        assert_eq!(err.message(), "path [/api/missing] not found");
    }

    struct DenyAll;

    #[async_trait]
    impl Interceptor for DenyAll {
        async fn intercept(&self, _req: &mut Request, _route: &Route, _group: &Group) -> ControlFlow<Response> {
            ControlFlow::Break(protocol::error_response(&RpcError::authentication("login required")))
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Interceptor for Counting {
        async fn intercept(&self, _req: &mut Request, _route: &Route, _group: &Group) -> ControlFlow<Response> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        }
    }

    #[tokio::test]
    async fn test_interceptor_can_stop_chain() {
        let handled = Arc::new(AtomicUsize::new(0));
        let route = {
            let handled = handled.clone();
            Route::hosted("ping", move |_ctx: RpcContext, _in: NoContent| {
                let handled = handled.clone();
                async move {
                    handled.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RpcError>("pong".to_string())
                }
            })
        };
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let passthrough =
            |_req: &mut Request, _route: &Route, _group: &Group| ControlFlow::<Response>::Continue(());
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(passthrough),
            Arc::new(Counting(before.clone())),
            Arc::new(DenyAll),
            Arc::new(Counting(after.clone())),
        ];
        let gateway = Gateway::new(vec![Group::new("/api", vec![route])], interceptors);

        let response = gateway.handle(post("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(before.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 0);
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_route_runs_when_chain_continues() {
        let seen = Arc::new(AtomicUsize::new(0));
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Counting(seen.clone()))];
        let gateway = Gateway::new(vec![Group::new("/api", vec![ping()])], interceptors);

        let response = gateway.handle(post("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        gateway.handle(post("/api/missing")).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
