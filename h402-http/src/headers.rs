//! HTTP header encoding and decoding for h402 settlement receipts.
//!
//! The `X-PAYMENT-RESPONSE` header is `base64(JSON)` of a [`SettleResponse`].
//! Payment payloads in `X-PAYMENT` go through [`h402::codec`] instead.

use h402::proto::{Base64Bytes, SettleResponse};
use http::HeaderValue;

use crate::error::HeaderError;

/// Encodes a settlement receipt for the `X-PAYMENT-RESPONSE` header.
///
/// # Errors
///
/// Returns [`HeaderError::Json`] if JSON serialization fails.
pub fn encode_payment_response(settlement: &SettleResponse) -> Result<String, HeaderError> {
    let json = serde_json::to_vec(settlement)?;
    Ok(Base64Bytes(json).encode())
}

/// Decodes an `X-PAYMENT-RESPONSE` header value.
///
/// Clients use this to inspect the receipt a resource server attached.
///
/// # Errors
///
/// Returns [`HeaderError::Base64`] or [`HeaderError::Json`] if the value is
/// not `base64(JSON)` of a settlement response.
pub fn decode_payment_response(value: &str) -> Result<SettleResponse, HeaderError> {
    let bytes = Base64Bytes::decode(value.trim())?;
    Ok(serde_json::from_slice(&bytes.0)?)
}

/// Encodes a settlement receipt straight into a [`HeaderValue`].
///
/// # Errors
///
/// Returns [`HeaderError`] if serialization fails or the result is not a
/// legal header value.
pub fn payment_response_header(settlement: &SettleResponse) -> Result<HeaderValue, HeaderError> {
    let encoded = encode_payment_response(settlement)?;
    Ok(HeaderValue::from_str(&encoded)?)
}

#[cfg(test)]
mod tests {
    use h402::namespace::Namespace;
    use h402::proto::ErrorReason;

    use super::*;

    #[test]
    fn receipt_survives_the_header() {
        let settlement = SettleResponse::Success {
            transaction: "0xabc".into(),
            namespace: Some(Namespace::Evm),
            payer: Some("0x01".into()),
        };
        let header = payment_response_header(&settlement).unwrap();
        let decoded = decode_payment_response(header.to_str().unwrap()).unwrap();
        assert_eq!(decoded, settlement);
    }

    #[test]
    fn failed_receipt_keeps_the_reason() {
        let settlement = SettleResponse::error(
            ErrorReason::UnexpectedSettleError,
            Some("rpc down".into()),
            Some(Namespace::Solana),
            None,
        );
        let encoded = encode_payment_response(&settlement).unwrap();
        assert_eq!(decode_payment_response(&encoded).unwrap(), settlement);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            decode_payment_response("%%%"),
            Err(HeaderError::Base64(_))
        ));
        assert!(matches!(
            decode_payment_response("bm90IGpzb24="),
            Err(HeaderError::Json(_))
        ));
    }
}
