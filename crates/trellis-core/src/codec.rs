//! Binary wire codec.
//!
//! Payloads are MessagePack maps keyed by the same field names serde uses
//! for JSON, so `#[serde(rename = ...)]` attributes apply to both formats.
//! The [`NoContent`] marker (and `()`) travels without any body at all.

use crate::error::{ErrorKind, Result, RpcError};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::{Deserialize, Serialize};
use std::any::TypeId;

/// Marker type for methods that take or return no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoContent;

/// Whether `T` is a payload-less marker type.
pub fn is_no_content<T: 'static>() -> bool {
    let id = TypeId::of::<T>();
    id == TypeId::of::<NoContent>() || id == TypeId::of::<()>()
}

/// Encode a value as a MessagePack map keyed by field names.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Produce the value of a marker type without reading any bytes.
pub fn empty_value<T: DeserializeOwned>() -> Result<T> {
    let de: serde::de::value::UnitDeserializer<serde::de::value::Error> = ().into_deserializer();
    T::deserialize(de).map_err(|e| RpcError::internal(format!("marker type has no unit form: {}", e)))
}

/// Per-type encode/decode plan, resolved once when a method is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadShape {
    no_content: bool,
}

impl PayloadShape {
    pub fn of<T: 'static>() -> Self {
        Self {
            no_content: is_no_content::<T>(),
        }
    }

    pub fn is_no_content(&self) -> bool {
        self.no_content
    }

    /// Body bytes for `value`, or `None` for marker types.
    pub fn encode_body<T: Serialize>(&self, value: &T) -> Result<Option<Vec<u8>>> {
        if self.no_content {
            return Ok(None);
        }
        encode(value).map(Some)
    }

    /// Decode a body. Marker types ignore the bytes; any other type
    /// requires a non-empty body.
    pub fn decode_body<T: DeserializeOwned>(&self, bytes: &[u8], what: &str) -> Result<T> {
        if self.no_content {
            return empty_value();
        }
        if bytes.is_empty() {
            return Err(RpcError::internal(format!("{} content length is zero", what)));
        }
        decode(bytes)
    }
}

/// Structured error body written for every failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub code: i32,
}

impl From<&RpcError> for ErrorPayload {
    fn from(err: &RpcError) -> Self {
        Self {
            message: err.message().to_string(),
            kind: err.kind(),
            code: err.code(),
        }
    }
}

impl From<ErrorPayload> for RpcError {
    fn from(payload: ErrorPayload) -> Self {
        RpcError::new(payload.kind, payload.message).with_code(payload.code)
    }
}

pub fn encode_error(err: &RpcError) -> Result<Vec<u8>> {
    encode(&ErrorPayload::from(err))
}

pub fn decode_error(bytes: &[u8]) -> Result<RpcError> {
    let payload: ErrorPayload = decode(bytes)?;
    Ok(payload.into())
}

/// Re-encode a JSON document as a wire payload.
pub fn json_to_wire(json: &[u8]) -> Result<Vec<u8>> {
    let value: serde_json::Value = serde_json::from_slice(json)?;
    encode(&value)
}

/// Re-encode a wire payload as a JSON document.
pub fn wire_to_json(wire: &[u8]) -> Result<Vec<u8>> {
    let value: serde_json::Value = decode(wire)?;
    Ok(serde_json::to_vec(&value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct CreateOrder {
        #[serde(rename = "orderId")]
        order_id: String,
        quantity: u32,
    }

    #[test]
    fn test_encode_uses_serde_field_names() {
        let bytes = encode(&CreateOrder {
            order_id: "o-1".into(),
            quantity: 3,
        })
        .unwrap();
        let as_json: serde_json::Value = decode(&bytes).unwrap();
        assert_eq!(as_json["orderId"], "o-1");
        assert_eq!(as_json["quantity"], 3);
    }

    #[test]
    fn test_marker_detection() {
        assert!(is_no_content::<NoContent>());
        assert!(is_no_content::<()>());
        assert!(!is_no_content::<CreateOrder>());
        assert!(!is_no_content::<String>());
    }

    #[test]
    fn test_marker_shape_skips_body() {
        let shape = PayloadShape::of::<NoContent>();
        assert_eq!(shape.encode_body(&NoContent).unwrap(), None);
        let value: NoContent = shape.decode_body(&[], "request").unwrap();
        assert_eq!(value, NoContent);
        let unit: () = PayloadShape::of::<()>().decode_body(&[], "request").unwrap();
        assert_eq!(unit, ());
    }

    #[test]
    fn test_empty_body_rejected_for_payload_types() {
        let shape = PayloadShape::of::<CreateOrder>();
        let err = shape.decode_body::<CreateOrder>(&[], "response").unwrap_err();
        assert_eq!(err.message(), "response content length is zero");
    }

    #[test]
    fn test_error_payload_preserves_classification() {
        let original = RpcError::not_found("order o-1 not found").with_code(404_01);
        let bytes = encode_error(&original).unwrap();
        let decoded = decode_error(&bytes).unwrap();
        assert_eq!(decoded.kind(), ErrorKind::NotFound);
        assert_eq!(decoded.code(), 404_01);
        assert_eq!(decoded.message(), "order o-1 not found");

        let generic: serde_json::Value = decode(&bytes).unwrap();
        assert_eq!(generic["type"], "not_found");
    }

    #[test]
    fn test_json_transcoding_reaches_typed_decode() {
        let wire = json_to_wire(br#"{"orderId":"o-9","quantity":2}"#).unwrap();
        let order: CreateOrder = decode(&wire).unwrap();
        assert_eq!(order.order_id, "o-9");

        let json = wire_to_json(&encode(&order).unwrap()).unwrap();
        let back: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(back["quantity"], 2);
    }
}
