//! Client call path: resolve, encode, send, decode.

use crate::codec::{self, PayloadShape};
use crate::config::RpcDefaults;
use crate::context::RpcContext;
use crate::discovery::AdvertisedInstance;
use crate::error::{ErrorKind, Result, RpcError};
use crate::method::{Method, Payload};
use crate::protocol;
use crate::runtime::RpcRuntime;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Pick the URL for a call among `instances`.
///
/// An instance in the caller's own namespace wins and is addressed by the
/// short in-cluster name; otherwise the first instance is addressed by its
/// fully-qualified cross-namespace name.
pub fn select_url(instances: &[Arc<AdvertisedInstance>], namespace: &str, domain_suffix: &str) -> Option<String> {
    if let Some(local) = instances.iter().find(|i| i.namespace == namespace) {
        return Some(format!(
            "http://{}:{}/{}/{}",
            local.service_name, local.port, local.service_name, local.path
        ));
    }
    let remote = instances.first()?;
    Some(format!(
        "http://{}.{}.svc.{}:{}/{}/{}",
        remote.service_name, remote.namespace, domain_suffix, remote.port, remote.service_name, remote.path
    ))
}

fn kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED => ErrorKind::Authentication,
        StatusCode::FORBIDDEN => ErrorKind::Authorization,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimit,
        _ => ErrorKind::Internal,
    }
}

/// Turn a response into the typed output or the remote error.
pub fn parse_response<O: DeserializeOwned + 'static>(status: StatusCode, body: &[u8]) -> Result<O> {
    if status.as_u16() >= 400 {
        let fallback = || {
            RpcError::new(
                kind_for_status(status),
                format!("rpc call failed with status {}", status.as_u16()),
            )
        };
        if body.is_empty() {
            return Err(fallback());
        }
        return Err(codec::decode_error(body).unwrap_or_else(|_| fallback()));
    }
    PayloadShape::of::<O>().decode_body(body, "response")
}

impl RpcRuntime {
    /// URL a call to `method` would use right now. Never touches the network
    /// beyond the discovery cache.
    pub async fn resolve_url<I, O>(&self, method: &Method<I, O>) -> Result<String> {
        let cluster = self.cluster_or_default(method.cluster());
        let discovery = cluster.discovery().await;
        let not_found = || RpcError::not_found(format!("rpc service {} not found", method.path()));

        let instances = discovery
            .find(method.path(), method.service_name())
            .ok_or_else(not_found)?;
        let config = self.config();
        select_url(&instances, &config.namespace, &config.service_domain_suffix).ok_or_else(not_found)
    }

    /// Call `method` with `input`, bounded by the method timeout (or the
    /// client default) and by any deadline already on `ctx`.
    pub async fn call<I: Payload, O: Payload>(&self, method: &Method<I, O>, ctx: &RpcContext, input: &I) -> Result<O> {
        let timeout = method.timeout().unwrap_or(RpcDefaults::CLIENT_TIMEOUT);
        let ctx = ctx.with_timeout(timeout);

        let url = self.resolve_url(method).await?;
        let body = PayloadShape::of::<I>().encode_body(input)?;

        let mut request = self.http().post(&url).headers(protocol::metadata_headers(&ctx));
        if let Some(body) = body {
            request = request.body(body);
        }
        debug!(url = %url, trace_id = ctx.trace_id(), "calling rpc method");

        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| RpcError::from(e).context("request rpc method failed"))?;
            let status = response.status();
            let bytes = response.bytes().await?;
            parse_response::<O>(status, &bytes)
        };

        tokio::select! {
            result = exchange => result,
            _ = ctx.done() => {
                let expired = ctx.deadline().is_some_and(|d| Instant::now() >= d);
                Err(if expired {
                    RpcError::timeout(format!("rpc call {} deadline exceeded", method.path()))
                } else {
                    RpcError::internal("context canceled")
                })
            }
        }
    }
}
