//! `X-PAYMENT` header codec.
//!
//! A payment payload travels as `base64(JSON)`. Bigints (`value`,
//! `validAfter`, `validBefore`, amounts) are decimal strings inside the JSON.
//! Decoding validates the structure of the variant as it parses: hex fields
//! must be hex, integers must be integers, required fields must be present.
//! An unknown `type` or namespace is rejected, never skipped.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Deserialize;

use crate::namespace::Namespace;
use crate::proto::{PaymentPayload, PaymentPayloadWire};

/// Errors produced while decoding an `X-PAYMENT` header.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The header is not base64, not JSON, or not a well-formed payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(value: base64::DecodeError) -> Self {
        Self::InvalidPayload(format!("invalid base64: {value}"))
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}

/// Encodes a payment payload as `base64(JSON)`.
#[must_use]
pub fn encode(payload: &PaymentPayload) -> String {
    // Serializing plain data with string map keys cannot fail.
    let json = serde_json::to_vec(payload).unwrap_or_default();
    b64.encode(json)
}

/// Decodes an `X-PAYMENT` header value.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPayload`] for any malformed input.
pub fn decode(encoded: &str) -> Result<PaymentPayload, CodecError> {
    let wire = decode_wire(encoded)?;
    let namespace = wire
        .namespace
        .ok_or_else(|| CodecError::InvalidPayload("missing field `namespace`".to_owned()))?;
    Ok(wire.into_payload(namespace)?)
}

/// Decodes an `X-PAYMENT` header value, parsing the inner proof as the given namespace.
///
/// A payload without a `namespace` field is assigned `namespace`. One that
/// names a namespace keeps it, so a later requirement match still sees it.
///
/// # Errors
///
/// Returns [`CodecError::InvalidPayload`] if the proof is not a valid member of
/// the namespace's variant family.
pub fn decode_for(encoded: &str, namespace: Namespace) -> Result<PaymentPayload, CodecError> {
    let wire = decode_wire(encoded)?;
    Ok(wire.into_payload(namespace)?)
}

/// Reads only the `namespace` field of an encoded payload.
///
/// Returns `None` if the header does not decode or names no known namespace.
#[must_use]
pub fn detect_namespace(encoded: &str) -> Option<Namespace> {
    #[derive(Deserialize)]
    struct NamespaceOnly {
        namespace: Namespace,
    }
    let bytes = b64.decode(encoded.trim()).ok()?;
    serde_json::from_slice::<NamespaceOnly>(&bytes)
        .ok()
        .map(|partial| partial.namespace)
}

fn decode_wire(encoded: &str) -> Result<PaymentPayloadWire, CodecError> {
    let bytes = b64.decode(encoded.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}
