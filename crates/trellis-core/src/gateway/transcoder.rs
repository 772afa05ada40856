//! JSON front for binary services.
//!
//! External callers speak JSON; internal services only speak the binary
//! wire format. [`JsonTranscoder`] re-encodes each request body, forwards it
//! to `upstream` at the same path, and re-encodes the reply (success or
//! error) back to JSON with the upstream status preserved.

use crate::codec::{self, ErrorPayload};
use crate::error::{ErrorKind, Result, RpcError};
use crate::protocol::{CONTENT_TYPE_JSON, CONTENT_TYPE_WIRE, PROPAGATED_HEADERS};
use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use axum::Router;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct JsonTranscoder {
    upstream: String,
    http: reqwest::Client,
}

impl JsonTranscoder {
    /// `upstream` is a base URL such as `http://gateway:8080`.
    pub fn new(upstream: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            upstream: upstream.into(),
            http,
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub async fn handle(&self, req: Request) -> Response {
        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(upstream = %self.upstream, error = %e, "json transcoding failed");
                json_error(&e)
            }
        }
    }

    async fn forward(&self, req: Request) -> Result<Response> {
        let url = format!(
            "{}/{}",
            self.upstream.trim_end_matches('/'),
            req.uri().path().trim_start_matches('/')
        );
        let (parts, body) = req.into_parts();
        let json = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| RpcError::internal(format!("read request body failed: {}", e)))?;
        let wire = if json.is_empty() {
            Vec::new()
        } else {
            codec::json_to_wire(&json).map_err(|e| e.with_kind(ErrorKind::Validation))?
        };

        let mut headers = HeaderMap::new();
        for name in PROPAGATED_HEADERS {
            if let Some(value) = parts.headers.get(name) {
                headers.insert(name, value.clone());
            }
        }
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_WIRE));

        debug!(url = %url, "forwarding transcoded request");
        let upstream = self
            .http
            .post(&url)
            .headers(headers)
            .body(wire)
            .send()
            .await
            .map_err(|e| RpcError::from(e).context("forward request failed"))?;

        let status = upstream.status();
        let bytes = upstream.bytes().await?;
        let body = if bytes.is_empty() {
            Vec::new()
        } else {
            codec::wire_to_json(&bytes)?
        };
        Ok(json_response(status, body))
    }

    /// Route every request through the transcoder.
    pub fn into_router(self) -> Router {
        Router::new().fallback(move |req: Request| {
            let transcoder = self.clone();
            async move { transcoder.handle(req).await }
        })
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
    response
}

/// JSON error body `{message, type, code}` for `err`.
pub(crate) fn json_error(err: &RpcError) -> Response {
    let status = StatusCode::from_u16(err.kind().http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = serde_json::to_vec(&ErrorPayload::from(err)).unwrap_or_default();
    json_response(status, body)
}
