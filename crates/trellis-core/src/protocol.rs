//! HTTP surface of the wire protocol: header names, content type and the
//! mapping between [`Metadata`] and request headers.

use crate::codec;
use crate::context::{Metadata, RpcContext};
use crate::error::RpcError;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use tracing::error;

pub const HEADER_TRACE_ID: &str = "rpc-trace-id";
pub const HEADER_OPERATOR: &str = "rpc-operator";
pub const HEADER_CALLER: &str = "rpc-caller";
pub const HEADER_LOCALE: &str = "rpc-locale";
pub const HEADER_SERVICE_NAME: &str = "rpc-service-name";

pub const CONTENT_TYPE_WIRE: &str = "application/msgpack";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

/// Headers copied verbatim when a request is forwarded.
pub const PROPAGATED_HEADERS: [&str; 4] =
    [HEADER_TRACE_ID, HEADER_OPERATOR, HEADER_CALLER, HEADER_LOCALE];

/// Read call metadata from inbound headers. Missing or malformed values are
/// left empty for [`Metadata::fill_defaults`].
pub fn read_metadata(headers: &HeaderMap) -> Metadata {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    Metadata {
        trace_id: get(HEADER_TRACE_ID).parse().unwrap_or(0),
        operator: get(HEADER_OPERATOR),
        caller: get(HEADER_CALLER),
        locale: get(HEADER_LOCALE),
    }
}

/// Headers describing `ctx` for an outbound call.
pub fn metadata_headers(ctx: &RpcContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        (HEADER_TRACE_ID, ctx.trace_id().to_string()),
        (HEADER_CALLER, ctx.caller().to_string()),
        (HEADER_OPERATOR, ctx.operator().to_string()),
        (HEADER_LOCALE, ctx.locale().to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_WIRE));
    headers
}

/// Build the binary error response for `err`.
pub fn error_response(err: &RpcError) -> Response {
    let status =
        StatusCode::from_u16(err.kind().http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = match codec::encode_error(err) {
        Ok(bytes) => Body::from(bytes),
        Err(e) => {
            error!(error = %e, "encode error payload failed");
            Body::empty()
        }
    };
    wire_response(status, body)
}

/// Build a 200 response carrying an optional binary payload.
pub fn success_response(payload: Option<Vec<u8>>) -> Response {
    let body = payload.map(Body::from).unwrap_or_else(Body::empty);
    wire_response(StatusCode::OK, body)
}

fn wire_response(status: StatusCode, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_WIRE));
    response
}
