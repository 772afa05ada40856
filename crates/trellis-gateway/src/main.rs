//! Trellis Gateway - JSON front for binary trellis RPC services.
//!
//! External callers post JSON; every request other than `GET /health` is
//! re-encoded to the binary wire format and forwarded over h2c to the
//! upstream, and the reply is translated back to JSON.
//!
//! The process also joins the cluster: it advertises a `gateway/health`
//! method under its service name, and each `--route` becomes a proxy to a
//! discovered method, served on the RPC server port. Without `--upstream`
//! the JSON front forwards to those local routes.

use anyhow::{bail, Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use trellis_rpc::{
    Cluster, CoordinationStore, Gateway, Group, JsonTranscoder, MemoryStore, Method, NoContent, Route, RpcConfig,
    RpcContext, RpcError, RpcRuntime,
};

#[derive(Parser, Debug)]
#[command(name = "trellis-gateway")]
#[command(about = "JSON gateway for trellis RPC services")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Base URL of the binary upstream, e.g. http://api-gateway:28000.
    /// Defaults to this process's own routes.
    #[arg(short, long, env = "GATEWAY_UPSTREAM")]
    upstream: Option<String>,

    /// Proxy route `PATH=METHOD[@SERVICE]`, e.g. `/api/orders=orders/create@orders`
    #[arg(short, long = "route", env = "GATEWAY_ROUTES", value_delimiter = ',')]
    routes: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Maximum number of requests handled at once
    #[arg(long, default_value = "1024")]
    max_concurrency: usize,

    #[arg(long, env = "SERVICE_DOMAIN_SUFFIX", default_value = "cluster.local")]
    service_domain_suffix: String,

    #[arg(long, env = "RPC_SERVICE_NAME", default_value = "localhost")]
    service_name: String,

    #[arg(long, env = "NAMESPACE", default_value = "localhost")]
    namespace: String,

    #[arg(long, env = "RPC_SERVER_PORT", default_value = "28000")]
    server_port: u16,

    #[arg(long, env = "POD_NAME", default_value = "pod")]
    pod_name: String,

    /// Comma-separated etcd endpoints; the in-memory store is used when empty
    #[arg(long, env = "ETCD_ENDPOINTS", value_delimiter = ',')]
    etcd_endpoints: Vec<String>,
}

impl Args {
    fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            service_domain_suffix: self.service_domain_suffix.clone(),
            service_name: self.service_name.clone(),
            namespace: self.namespace.clone(),
            server_port: self.server_port,
            pod_name: self.pod_name.clone(),
            ..RpcConfig::default()
        }
    }
}

/// A parsed `--route` value.
#[derive(Debug, PartialEq, Eq)]
struct RouteSpec {
    path: String,
    method: String,
    service: Option<String>,
}

fn parse_route(spec: &str) -> Result<RouteSpec> {
    let Some((path, target)) = spec.split_once('=') else {
        bail!("invalid route '{}': expected PATH=METHOD[@SERVICE]", spec);
    };
    let (method, service) = match target.split_once('@') {
        Some((method, service)) => (method, Some(service.trim().to_string())),
        None => (target, None),
    };
    if path.trim().is_empty() || method.trim().is_empty() {
        bail!("invalid route '{}': path and method must not be empty", spec);
    }
    Ok(RouteSpec {
        path: path.trim().to_string(),
        method: method.trim().to_string(),
        service: service.filter(|s| !s.is_empty()),
    })
}

/// Proxy gateway over the configured routes. Payloads pass through
/// untouched, so the routes are typed as generic JSON values.
fn build_gateway(runtime: &RpcRuntime, specs: &[String]) -> Result<Gateway> {
    let mut routes = Vec::with_capacity(specs.len());
    for spec in specs {
        let spec = parse_route(spec)?;
        let mut method = Method::<Value, Value>::try_new(&spec.method)?;
        if let Some(service) = &spec.service {
            method = method.with_service_name(service);
        }
        routes.push(Route::proxy(runtime, &spec.path, &method));
    }
    Ok(Gateway::try_new(vec![Group::new("/", routes)], Vec::new())?)
}

#[cfg(feature = "etcd")]
async fn coordination_store(endpoints: &[String]) -> Result<Arc<dyn CoordinationStore>> {
    if endpoints.is_empty() {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = trellis_rpc::EtcdStore::connect(endpoints)
        .await
        .context("connect to etcd failed")?;
    info!(endpoints = ?endpoints, "connected to etcd");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
async fn coordination_store(endpoints: &[String]) -> Result<Arc<dyn CoordinationStore>> {
    if !endpoints.is_empty() {
        warn!("ETCD_ENDPOINTS ignored: built without the etcd feature");
    }
    Ok(Arc::new(MemoryStore::new()))
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn router(transcoder: JsonTranscoder, max_concurrency: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    transcoder
        .into_router()
        .route("/health", get(handle_health))
        .layer(ConcurrencyLimitLayer::new(max_concurrency))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting trellis gateway");

    let config = args.rpc_config();
    let store = coordination_store(&args.etcd_endpoints).await?;
    let cluster = Cluster::new(store).with_prefix(config.registry_prefix.clone());
    let runtime = RpcRuntime::builder(Arc::new(cluster))
        .config(config)
        .build()
        .context("build rpc runtime failed")?;

    let pod_name = args.pod_name.clone();
    let health: Method<NoContent, Value> =
        Method::new("gateway/health").with_description("Liveness of this gateway instance");
    let registration = health
        .serve(&runtime, move |_ctx: RpcContext, _in: NoContent| {
            let pod_name = pod_name.clone();
            async move { Ok::<_, RpcError>(json!({ "status": "ok", "pod": pod_name })) }
        })
        .await;
    info!(route = %registration.route, key = %registration.key, "gateway advertised");

    let local_upstream = if args.routes.is_empty() {
        None
    } else {
        let gateway = build_gateway(&runtime, &args.routes)?;
        let addr = gateway.serve(&runtime, None).await.context("serve proxy routes failed")?;
        info!(routes = ?gateway.paths(), port = addr.port(), "proxy routes served");
        Some(format!("http://127.0.0.1:{}", addr.port()))
    };
    let upstream = match (args.upstream.clone(), local_upstream) {
        (Some(upstream), _) => upstream,
        (None, Some(local)) => local,
        (None, None) => bail!("either --upstream or at least one --route is required"),
    };

    let transcoder = JsonTranscoder::new(upstream.clone(), runtime.http().clone());
    let app = router(transcoder, args.max_concurrency.max(1));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    // Read by process supervisors and the integration tests.
    println!("GATEWAY_PORT={}", actual_addr.port());
    info!(addr = %actual_addr, upstream = %upstream, "gateway listening");

    let token = runtime.shutdown().token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");
    runtime.close().await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "gateway server stopped with error"),
        Err(e) => warn!(error = %e, "gateway server task failed"),
    }
    Ok(())
}
