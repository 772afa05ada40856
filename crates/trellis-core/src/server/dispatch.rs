//! Per-request handling of one typed method.

use crate::codec::PayloadShape;
use crate::context::RpcContext;
use crate::error::{Result, RpcError};
use crate::method::{Handler, Payload, Validator};
use crate::protocol;
use axum::body::to_bytes;
use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Type-erased request handler stored in route tables.
pub type BoxedEndpoint = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Wrap a typed handler into an endpoint.
///
/// Payload shapes and the validator are resolved here once; each request
/// then reads metadata from headers, applies `timeout` if any, decodes, validates,
/// runs the handler and writes either the encoded output or the encoded
/// error.
pub fn endpoint<I, O, H>(handler: H, timeout: Option<Duration>, validator: Option<Validator<I>>) -> BoxedEndpoint
where
    I: Payload,
    O: Payload,
    H: Handler<I, O>,
{
    let handler = Arc::new(handler);
    let input_shape = PayloadShape::of::<I>();
    let output_shape = PayloadShape::of::<O>();

    Arc::new(move |req: Request| {
        let handler = handler.clone();
        let validator = validator.clone();
        async move {
            let path = req.uri().path().to_string();
            let mut ctx = RpcContext::with_metadata(protocol::read_metadata(req.headers()), None);
            if let Some(timeout) = timeout {
                ctx = ctx.with_timeout(timeout);
            }
            let trace_id = ctx.trace_id();
            debug!(path = %path, trace_id, "received rpc request");

            let input: I = match read_input(req, input_shape).await {
                Ok(input) => input,
                Err(e) => {
                    error!(path = %path, trace_id, error = %e, "read request failed");
                    return protocol::error_response(&e);
                }
            };
            if let Some(validate) = &validator {
                if let Err(e) = validate(&input) {
                    warn!(path = %path, trace_id, error = %e, "validate request failed");
                    return protocol::error_response(&e);
                }
            }

            // The deadline only cancels `ctx`; the handler always runs to completion.
            let start = Instant::now();
            let result = handler.call(ctx.clone(), input).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(output) => match output_shape.encode_body(&output) {
                    Ok(body) => {
                        info!(path = %path, trace_id, duration_ms, "handle rpc request successful");
                        protocol::success_response(body)
                    }
                    Err(e) => {
                        error!(path = %path, trace_id, error = ?e, "write response failed");
                        protocol::error_response(&e)
                    }
                },
                Err(e) if e.is_internal() => {
                    error!(path = %path, trace_id, duration_ms, error = ?e, "handle rpc request failed");
                    protocol::error_response(&e)
                }
                Err(e) => {
                    warn!(path = %path, trace_id, duration_ms, kind = %e.kind(), error = %e, "handle rpc request failed");
                    protocol::error_response(&e)
                }
            }
        }
        .boxed()
    })
}

async fn read_input<I: Payload>(req: Request, shape: PayloadShape) -> Result<I> {
    if shape.is_no_content() {
        return shape.decode_body(&[], "request");
    }
    let bytes = to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| RpcError::internal(format!("read request body failed: {}", e)))?;
    shape.decode_body(&bytes, "request")
}
