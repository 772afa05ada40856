//! Error types for trellis RPC.
//!
//! Every failure that crosses the wire is an [`RpcError`]: a closed
//! [`ErrorKind`] classification, a numeric application code and a message.
//! The classification survives serialization, so a caller reconstructs an
//! error equivalent to the one the remote handler returned.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of error classifications carried across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    #[default]
    Internal,
    Timeout,
    Business,
    Conflict,
    RateLimit,
    Network,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Business => "business",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
        }
    }

    /// HTTP status used when an error of this kind is written as a response.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Authorization => 403,
            ErrorKind::Authentication => 401,
            ErrorKind::NotFound => 404,
            _ => 502,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for trellis operations.
///
/// Builder helpers consume and return the error, so a shared definition is
/// never mutated in place.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RpcError {
    kind: ErrorKind,
    code: i32,
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Result type alias for trellis operations.
pub type Result<T> = std::result::Result<T, RpcError>;

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: 0,
            message: message.into(),
            source: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn business(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Business, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Prefix the message: `"<prefix>: <message>"`.
    pub fn context(mut self, prefix: impl fmt::Display) -> Self {
        self.message = if self.message.is_empty() {
            prefix.to_string()
        } else {
            format!("{}: {}", prefix, self.message)
        };
        self
    }

    pub fn is_internal(&self) -> bool {
        self.kind == ErrorKind::Internal
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else {
            ErrorKind::Network
        };
        RpcError::new(kind, err.to_string()).with_source(err)
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::internal(format!("encode payload failed: {}", err)).with_source(err)
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RpcError::internal(format!("decode payload failed: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::internal(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        RpcError::internal(err.to_string()).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for RpcError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RpcError::timeout("deadline exceeded").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::not_found("rpc service orders/create not found");
        assert_eq!(err.to_string(), "rpc service orders/create not found");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_context_prefixes_message() {
        let err = RpcError::network("connection refused").context("request rpc method failed");
        assert_eq!(err.message(), "request rpc method failed: connection refused");
        assert_eq!(err.kind(), ErrorKind::Network);

        let empty = RpcError::internal("").context("boom");
        assert_eq!(empty.message(), "boom");
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::Authorization.http_status(), 403);
        assert_eq!(ErrorKind::Authentication.http_status(), 401);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Internal.http_status(), 502);
        assert_eq!(ErrorKind::Business.http_status(), 502);
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::RateLimit).unwrap();
        assert_eq!(json, "\"rate_limit\"");
        let parsed: ErrorKind = serde_json::from_str("\"not_found\"").unwrap();
        assert_eq!(parsed, ErrorKind::NotFound);
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
    }

    #[test]
    fn test_builders_keep_classification() {
        let err = RpcError::business("insufficient balance").with_code(4002);
        assert_eq!(err.code(), 4002);
        assert_eq!(err.kind(), ErrorKind::Business);
        assert!(!err.is_internal());
    }
}
