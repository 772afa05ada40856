//! Gateway routes: proxies to discovered methods, or locally hosted
//! handlers.

use crate::error::{Result, RpcError};
use crate::method::{Handler, Method, Payload};
use crate::protocol::{self, CONTENT_TYPE_WIRE, PROPAGATED_HEADERS};
use crate::runtime::RpcRuntime;
use crate::server::{endpoint, BoxedEndpoint};
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{error, warn};

type UrlResolver = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

#[derive(Clone)]
enum Target {
    Proxy { resolve: UrlResolver, http: reqwest::Client },
    Hosted(BoxedEndpoint),
}

/// One path exposed by a [`Gateway`](super::Gateway).
#[derive(Clone)]
pub struct Route {
    path: String,
    description: String,
    input_type: &'static str,
    output_type: &'static str,
    target: Target,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.target {
            Target::Proxy { .. } => "proxy",
            Target::Hosted(_) => "hosted",
        };
        f.debug_struct("Route")
            .field("path", &self.path)
            .field("kind", &kind)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .finish()
    }
}

impl Route {
    /// Forward requests to wherever `method` is currently served. An empty
    /// `path` reuses the method path; the description defaults to the
    /// method's.
    pub fn proxy<I: Payload, O: Payload>(runtime: &RpcRuntime, path: &str, method: &Method<I, O>) -> Self {
        let path = if path.is_empty() { method.path() } else { path };
        let resolve: UrlResolver = {
            let runtime = runtime.clone();
            let method = method.clone();
            Arc::new(move || {
                let runtime = runtime.clone();
                let method = method.clone();
                async move { runtime.resolve_url(&method).await }.boxed()
            })
        };
        Self {
            path: path.to_string(),
            description: method.description().to_string(),
            input_type: std::any::type_name::<I>(),
            output_type: std::any::type_name::<O>(),
            target: Target::Proxy {
                resolve,
                http: runtime.http().clone(),
            },
        }
    }

    /// Serve `handler` directly from the gateway process.
    pub fn hosted<I, O, H>(path: &str, handler: H) -> Self
    where
        I: Payload,
        O: Payload,
        H: Handler<I, O>,
    {
        Self {
            path: path.to_string(),
            description: String::new(),
            input_type: std::any::type_name::<I>(),
            output_type: std::any::type_name::<O>(),
            target: Target::Hosted(endpoint(handler, None, None)),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_type(&self) -> &'static str {
        self.input_type
    }

    pub fn output_type(&self) -> &'static str {
        self.output_type
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.target, Target::Proxy { .. })
    }

    pub(crate) async fn handle(&self, req: Request) -> Response {
        match &self.target {
            Target::Hosted(endpoint) => endpoint(req).await,
            Target::Proxy { resolve, http } => match forward(resolve, http, req).await {
                Ok(response) => response,
                Err(e) => protocol::error_response(&e),
            },
        }
    }
}

async fn forward(resolve: &UrlResolver, http: &reqwest::Client, req: Request) -> Result<Response> {
    let url = resolve().await?;
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| RpcError::internal(format!("read request body failed: {}", e)))?;

    let mut headers = HeaderMap::new();
    for name in PROPAGATED_HEADERS {
        if let Some(value) = parts.headers.get(name) {
            headers.insert(name, value.clone());
        }
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_WIRE));

    let upstream = http
        .post(&url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| RpcError::from(e).context("proxy request failed"))?;

    let status = upstream.status();
    if status.is_server_error() {
        warn!(url = %url, status = status.as_u16(), "upstream returned server error");
        return Err(RpcError::internal("internal server error"));
    }

    let mut response = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if name != header::CONTENT_LENGTH && name != header::TRANSFER_ENCODING {
            response = response.header(name, value);
        }
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| {
            error!(url = %url, error = %e, "build proxy response failed");
            RpcError::internal(format!("build proxy response failed: {}", e))
        })
}
