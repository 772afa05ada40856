//! Basic usage example - serve a method and call it through discovery

use std::sync::Arc;
use std::time::Duration;
use trellis_rpc::{Cluster, MemoryStore, Method, Result, RpcConfig, RpcContext, RpcError, RpcRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    // Name to greet from args
    let name = std::env::args().nth(1).unwrap_or_else(|| "trellis".to_string());

    let cluster = Cluster::new(Arc::new(MemoryStore::new())).with_discovery_debounce(Duration::from_millis(50));
    let runtime = RpcRuntime::builder(Arc::new(cluster))
        .config(RpcConfig::default().with_server_port(0))
        .build()?;

    let greet: Method<String, String> = Method::new("greeter/greet").with_description("Say hello");
    let registration = greet
        .serve(&runtime, |ctx: RpcContext, name: String| async move {
            if name.is_empty() {
                return Err(RpcError::validation("name is required"));
            }
            Ok(format!("hello {} (trace {})", name, ctx.trace_id()))
        })
        .await;
    println!("Serving {} on {}", registration.route, registration.local_addr);

    // Registration reaches the discovery cache after one debounce window.
    while greet.url(&runtime).await.is_err() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let reply = greet.call(&runtime, &RpcContext::background(), &name).await?;
    println!("{}", reply);

    runtime.close().await;
    Ok(())
}
