//! Integration tests for serving, discovering and calling methods.
//!
//! Every test runs servers and clients in-process against a shared
//! `MemoryStore`, with the default service name `localhost` so resolved
//! URLs reach the loopback listener.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use trellis_rpc::discovery::{registration_key, registration_value};
use trellis_rpc::{
    codec, protocol, Cluster, CoordinationStore, ErrorKind, Gateway, Group, MemoryStore, Metadata, Method,
    NoContent, Route, RpcConfig, RpcContext, RpcError, RpcRuntime,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CreateOrder {
    #[serde(rename = "orderId")]
    order_id: String,
    quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderCreated {
    id: String,
    total: u32,
    #[serde(rename = "traceId")]
    trace_id: i64,
    caller: String,
}

/// Runtime on an ephemeral port, with a short discovery debounce.
fn runtime(store: &MemoryStore, namespace: &str, pod: &str) -> RpcRuntime {
    let cluster = Cluster::new(Arc::new(store.clone())).with_discovery_debounce(Duration::from_millis(50));
    RpcRuntime::builder(Arc::new(cluster))
        .config(
            RpcConfig::default()
                .with_namespace(namespace)
                .with_pod_name(pod)
                .with_server_port(0),
        )
        .build()
        .expect("Failed to build runtime")
}

/// Wait until `method` resolves through discovery.
async fn wait_for_discovery<I, O>(runtime: &RpcRuntime, method: &Method<I, O>) -> String
where
    I: trellis_rpc::Payload,
    O: trellis_rpc::Payload,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok(url) = method.url(runtime).await {
            return url;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never became discoverable",
            method.path()
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn h2c_client() -> reqwest::Client {
    reqwest::Client::builder()
        .http2_prior_knowledge()
        .build()
        .expect("Failed to build client")
}

#[tokio::test]
async fn test_call_roundtrip_propagates_metadata() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "orders-0");
    let create: Method<CreateOrder, OrderCreated> = Method::new("orders/create");

    let registration = create
        .serve(&rt, |ctx: RpcContext, cmd: CreateOrder| async move {
            Ok::<_, RpcError>(OrderCreated {
                id: cmd.order_id,
                total: cmd.quantity * 10,
                trace_id: ctx.trace_id(),
                caller: ctx.caller().to_string(),
            })
        })
        .await;
    assert_eq!(registration.route, "/localhost/orders/create");
    assert_eq!(registration.key, "/rpc-services/localhost/orders/create/orders-0");

    let url = wait_for_discovery(&rt, &create).await;
    assert_eq!(
        url,
        format!(
            "http://localhost:{}/localhost/orders/create",
            registration.local_addr.port()
        )
    );

    let ctx = RpcContext::with_metadata(
        Metadata {
            trace_id: 4242,
            operator: "alice".into(),
            ..Default::default()
        },
        Some("billing-0"),
    );
    let created = create
        .call(
            &rt,
            &ctx,
            &CreateOrder {
                order_id: "o-1".into(),
                quantity: 3,
            },
        )
        .await
        .unwrap();
    assert_eq!(created.id, "o-1");
    assert_eq!(created.total, 30);
    assert_eq!(created.trace_id, 4242);
    assert_eq!(created.caller, "billing-0");

    rt.close().await;
}

#[tokio::test]
async fn test_no_content_roundtrip() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let touch: Method<NoContent, NoContent> = Method::new("cache/touch");
    touch
        .serve(&rt, |_ctx: RpcContext, _in: NoContent| async { Ok::<_, RpcError>(NoContent) })
        .await;
    wait_for_discovery(&rt, &touch).await;

    let out = touch.call(&rt, &RpcContext::background(), &NoContent).await.unwrap();
    assert_eq!(out, NoContent);
    rt.close().await;
}

#[tokio::test]
async fn test_remote_error_keeps_classification() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let pay: Method<u64, String> = Method::new("wallet/pay");
    pay.serve(&rt, |_ctx: RpcContext, amount: u64| async move {
        Err::<String, _>(RpcError::business(format!("insufficient balance for {}", amount)).with_code(4002))
    })
    .await;
    wait_for_discovery(&rt, &pay).await;

    let err = pay.call(&rt, &RpcContext::background(), &500).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Business);
    assert_eq!(err.code(), 4002);
    assert_eq!(err.message(), "insufficient balance for 500");
    rt.close().await;
}

#[tokio::test]
async fn test_unregistered_method_is_not_found() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let nobody: Method<String, String> = Method::new("nobody/home");

    let err = nobody
        .call(&rt, &RpcContext::background(), &"hi".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.message(), "rpc service nobody/home not found");
}

#[tokio::test]
async fn test_client_timeout() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let slow: Method<NoContent, NoContent> = Method::new("slow/op");
    slow.serve(&rt, |_ctx: RpcContext, _in: NoContent| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Ok::<_, RpcError>(NoContent)
    })
    .await;
    wait_for_discovery(&rt, &slow).await;

    let err = slow
        .with_timeout(Duration::from_millis(200))
        .call(&rt, &RpcContext::background(), &NoContent)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    rt.close().await;
}

#[tokio::test]
#[should_panic(expected = "already exists")]
async fn test_duplicate_serve_panics() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let echo: Method<String, String> = Method::new("echo");
    echo.serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s) })
        .await;
    echo.serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s) })
        .await;
}

#[tokio::test]
async fn test_same_namespace_instance_preferred() {
    let store = MemoryStore::new();
    let prefix = "/rpc-services";
    store
        .put(
            &registration_key(prefix, "orders", "orders/create", "orders-ns2"),
            &registration_value("ns2", 28000),
            None,
        )
        .await
        .unwrap();
    store
        .put(
            &registration_key(prefix, "orders", "orders/create", "orders-ns1"),
            &registration_value("ns1", 28000),
            None,
        )
        .await
        .unwrap();

    let create: Method<CreateOrder, OrderCreated> = Method::new("orders/create");
    let in_ns1 = runtime(&store, "ns1", "client-0");
    assert_eq!(
        create.url(&in_ns1).await.unwrap(),
        "http://orders:28000/orders/orders/create"
    );

    let in_ns3 = runtime(&store, "ns3", "client-1");
    let url = create.url(&in_ns3).await.unwrap();
    assert!(url.starts_with("http://orders.ns"), "unexpected url {}", url);
    assert!(url.ends_with(".svc.cluster.local:28000/orders/orders/create"));

    let filtered = create.with_service_name("billing");
    assert_eq!(
        filtered.url(&in_ns1).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test(start_paused = true)]
async fn test_expired_lease_removes_instance() {
    let store = MemoryStore::new();
    let cluster = Cluster::new(Arc::new(store.clone())).with_discovery_debounce(Duration::from_secs(1));
    let lease = store.grant_lease(2).await.unwrap();
    store
        .put(
            &registration_key("/rpc-services", "orders", "orders/create", "orders-0"),
            &registration_value("ns1", 28000),
            Some(lease),
        )
        .await
        .unwrap();

    let discovery = cluster.discovery().await;
    assert!(discovery.find("orders/create", None).is_some());

    // Lease TTL plus one debounce window.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(discovery.find("orders/create", None).is_none());
}

#[tokio::test]
async fn test_close_withdraws_registration() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let echo: Method<String, String> = Method::new("echo");
    let registration = echo
        .serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s) })
        .await;
    wait_for_discovery(&rt, &echo).await;
    assert_eq!(store.get_prefix(&registration.key).await.unwrap().len(), 1);

    rt.close().await;
    assert!(store.get_prefix(&registration.key).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_service_name_header_scopes_bare_path() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");
    let echo: Method<String, String> = Method::new("echo").with_service_name("echo-svc");
    let registration = echo
        .serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s.to_uppercase()) })
        .await;

    let response = h2c_client()
        .post(format!("http://127.0.0.1:{}/echo", registration.local_addr.port()))
        .header(protocol::HEADER_SERVICE_NAME, "echo-svc")
        .body(codec::encode(&"hey".to_string()).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(codec::decode::<String>(&body).unwrap(), "HEY");

    let response = h2c_client()
        .post(format!("http://127.0.0.1:{}/missing", registration.local_addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    rt.close().await;
}

#[tokio::test]
async fn test_gateway_proxies_and_masks_server_errors() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");

    let echo: Method<String, String> = Method::new("echo").with_description("Echo a string");
    echo.serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s) })
        .await;
    let broken: Method<NoContent, NoContent> = Method::new("broken");
    broken
        .serve(&rt, |_ctx: RpcContext, _in: NoContent| async {
            Err::<NoContent, _>(RpcError::internal("database password is hunter2"))
        })
        .await;
    wait_for_discovery(&rt, &echo).await;
    wait_for_discovery(&rt, &broken).await;

    let gateway = Gateway::new(
        vec![Group::new(
            "/api",
            vec![Route::proxy(&rt, "", &echo), Route::proxy(&rt, "fail", &broken)],
        )],
        Vec::new(),
    );
    assert_eq!(gateway.groups()[0].routes[0].description(), "Echo a string");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, gateway.into_router()).await });

    let client = h2c_client();
    let response = client
        .post(format!("http://127.0.0.1:{}/api/echo", port))
        .body(codec::encode(&"through the gateway".to_string()).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(codec::decode::<String>(&body).unwrap(), "through the gateway");

    let response = client
        .post(format!("http://127.0.0.1:{}/api/fail", port))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let err = codec::decode_error(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(!err.message().contains("hunter2"));

    rt.close().await;
}

#[tokio::test]
async fn test_gateway_served_on_runtime_listener() {
    let store = MemoryStore::new();
    let rt = runtime(&store, "localhost", "pod-0");

    let echo: Method<String, String> = Method::new("echo");
    let registration = echo
        .serve(&rt, |_ctx: RpcContext, s: String| async move { Ok::<_, RpcError>(s) })
        .await;
    wait_for_discovery(&rt, &echo).await;

    let gateway = Gateway::new(vec![Group::new("/public", vec![Route::proxy(&rt, "say", &echo)])], Vec::new());
    let addr = gateway.serve(&rt, None).await.unwrap();
    assert_eq!(addr.port(), registration.local_addr.port());

    let response = h2c_client()
        .post(format!("http://127.0.0.1:{}/public/say", addr.port()))
        .body(codec::encode(&"shared port".to_string()).unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.bytes().await.unwrap();
    assert_eq!(codec::decode::<String>(&body).unwrap(), "shared port");

    let err = gateway.serve(&rt, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    rt.close().await;
}
