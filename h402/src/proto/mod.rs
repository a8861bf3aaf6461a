//! Protocol types for h402 payment messages.
//!
//! This module defines the wire format exchanged between clients, resource
//! servers, and facilitators:
//!
//! - [`PaymentRequirements`] - what a resource costs and where to pay
//! - [`PaymentPayload`] - the client's signed proof
//! - [`VerifyRequest`] / [`SettleRequest`] - facilitator request bodies
//! - [`VerifyResponse`] / [`SettleResponse`] - facilitator results
//! - [`PaymentRequired`] - the 402 response body
//! - [`ErrorReason`] - the snake_case failure taxonomy

mod encoding;
mod error;
mod payload;
mod requirements;

pub use encoding::*;
pub use error::*;
pub use payload::*;
pub use requirements::*;

pub(crate) use payload::PaymentPayloadWire;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::namespace::Namespace;

/// Whether a verified payment still needs settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    /// Signed but not executed; the facilitator must settle it.
    Payload,
    /// Already executed on chain; settlement is skipped.
    Transaction,
}

/// Body of `POST /verify` and `POST /settle`.
///
/// `payload` travels as the client's `X-PAYMENT` header value (`base64(JSON)`).
/// A plain JSON object is accepted on input as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    /// The decoded payment proof.
    pub payload: PaymentPayload,
    /// The requirements the proof is checked against.
    pub payment_requirements: PaymentRequirements,
}

/// Settlement takes the same body as verification.
pub type SettleRequest = VerifyRequest;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestWireRef<'a> {
    payload: String,
    payment_requirements: &'a PaymentRequirements,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadField {
    Encoded(String),
    Decoded(PaymentPayload),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequestWire {
    payload: PayloadField,
    payment_requirements: PaymentRequirements,
}

impl Serialize for VerifyRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        VerifyRequestWireRef {
            payload: codec::encode(&self.payload),
            payment_requirements: &self.payment_requirements,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyRequest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = VerifyRequestWire::deserialize(deserializer)?;
        let payload = match wire.payload {
            PayloadField::Encoded(encoded) => {
                codec::decode(&encoded).map_err(serde::de::Error::custom)?
            }
            PayloadField::Decoded(payload) => payload,
        };
        Ok(Self {
            payload,
            payment_requirements: wire.payment_requirements,
        })
    }
}

/// Result of payment verification.
///
/// Serialized as `{isValid, invalidReason?, errorMessage?, txHash?, type?, payer?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResponse {
    /// The payment satisfies the requirements.
    Valid {
        /// Payer address, when identifiable.
        payer: Option<String>,
        /// Whether settlement is still required.
        kind: PaymentKind,
        /// Hash of the already executed transaction, for [`PaymentKind::Transaction`].
        tx_hash: Option<String>,
    },
    /// The payment was rejected.
    Invalid {
        /// Machine-readable reason.
        reason: ErrorReason,
        /// Human-readable details.
        message: Option<String>,
        /// Payer address, when identifiable.
        payer: Option<String>,
    },
}

impl VerifyResponse {
    /// A valid response.
    #[must_use]
    pub const fn valid(payer: Option<String>, kind: PaymentKind, tx_hash: Option<String>) -> Self {
        Self::Valid {
            payer,
            kind,
            tx_hash,
        }
    }

    /// An invalid response.
    #[must_use]
    pub const fn invalid(reason: ErrorReason, message: Option<String>, payer: Option<String>) -> Self {
        Self::Invalid {
            reason,
            message,
            payer,
        }
    }

    /// Builds an invalid response from any error that maps onto a reason.
    #[must_use]
    pub fn from_problem<E: AsPaymentProblem>(error: &E, payer: Option<String>) -> Self {
        let problem = error.as_payment_problem();
        Self::invalid(problem.reason(), Some(problem.details().to_owned()), payer)
    }

    /// Returns `true` for [`Self::Valid`].
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// The payer, if known.
    #[must_use]
    pub fn payer(&self) -> Option<&str> {
        match self {
            Self::Valid { payer, .. } | Self::Invalid { payer, .. } => payer.as_deref(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<PaymentKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Valid {
                payer,
                kind,
                tx_hash,
            } => VerifyResponseWire {
                is_valid: true,
                invalid_reason: None,
                error_message: None,
                tx_hash: tx_hash.clone(),
                kind: Some(*kind),
                payer: payer.clone(),
            },
            Self::Invalid {
                reason,
                message,
                payer,
            } => VerifyResponseWire {
                is_valid: false,
                invalid_reason: Some(*reason),
                error_message: message.clone(),
                tx_hash: None,
                kind: None,
                payer: payer.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            Ok(Self::Valid {
                payer: wire.payer,
                kind: wire.kind.unwrap_or(PaymentKind::Payload),
                tx_hash: wire.tx_hash,
            })
        } else {
            Ok(Self::Invalid {
                reason: wire
                    .invalid_reason
                    .unwrap_or(ErrorReason::UnexpectedVerifyError),
                message: wire.error_message,
                payer: wire.payer,
            })
        }
    }
}

/// Result of payment settlement.
///
/// Serialized as `{success, transaction, namespace?, payer?, errorReason?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResponse {
    /// The payment was executed.
    Success {
        /// Transaction hash, signature, or Ark txid.
        transaction: String,
        /// Namespace the payment settled on.
        namespace: Option<Namespace>,
        /// Payer address, when identifiable.
        payer: Option<String>,
    },
    /// Settlement failed.
    Error {
        /// Machine-readable reason.
        reason: ErrorReason,
        /// Human-readable details.
        message: Option<String>,
        /// Transaction reference if one was produced before the failure, else empty.
        transaction: String,
        /// Namespace the payment was attempted on.
        namespace: Option<Namespace>,
        /// Payer address, when identifiable.
        payer: Option<String>,
    },
}

impl SettleResponse {
    /// A failed settlement with no transaction reference.
    #[must_use]
    pub const fn error(
        reason: ErrorReason,
        message: Option<String>,
        namespace: Option<Namespace>,
        payer: Option<String>,
    ) -> Self {
        Self::Error {
            reason,
            message,
            transaction: String::new(),
            namespace,
            payer,
        }
    }

    /// Builds a failed settlement from any error that maps onto a reason.
    #[must_use]
    pub fn from_problem<E: AsPaymentProblem>(
        error: &E,
        namespace: Option<Namespace>,
        payer: Option<String>,
    ) -> Self {
        let problem = error.as_payment_problem();
        Self::error(
            problem.reason(),
            Some(problem.details().to_owned()),
            namespace,
            payer,
        )
    }

    /// Returns `true` for [`Self::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default)]
    transaction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    namespace: Option<Namespace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Success {
                transaction,
                namespace,
                payer,
            } => SettleResponseWire {
                success: true,
                transaction: transaction.clone(),
                namespace: *namespace,
                payer: payer.clone(),
                error_reason: None,
                error: None,
            },
            Self::Error {
                reason,
                message,
                transaction,
                namespace,
                payer,
            } => SettleResponseWire {
                success: false,
                transaction: transaction.clone(),
                namespace: *namespace,
                payer: payer.clone(),
                error_reason: Some(*reason),
                error: message.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            if wire.transaction.is_empty() {
                return Err(serde::de::Error::missing_field("transaction"));
            }
            Ok(Self::Success {
                transaction: wire.transaction,
                namespace: wire.namespace,
                payer: wire.payer,
            })
        } else {
            Ok(Self::Error {
                reason: wire
                    .error_reason
                    .unwrap_or(ErrorReason::UnexpectedSettleError),
                message: wire.error,
                transaction: wire.transaction,
                namespace: wire.namespace,
                payer: wire.payer,
            })
        }
    }
}

/// Body of a 402 Payment Required response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    /// Protocol version.
    pub h402_version: u8,
    /// Why payment is required (missing header, failed verification, ...).
    pub error: String,
    /// Every accepted way to pay.
    pub accepts: Vec<PaymentRequirements>,
    /// Payer of a rejected payment, when identifiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// A `(namespace, networkId, scheme)` combination a facilitator serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedKind {
    /// Protocol version.
    pub h402_version: u8,
    /// Payment scheme.
    pub scheme: String,
    /// Chain family.
    pub namespace: Namespace,
    /// Network within the namespace.
    pub network_id: String,
}

/// Body of `GET /supported`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// Served payment kinds.
    pub kinds: Vec<SupportedKind>,
    /// Settlement signer addresses by namespace.
    #[serde(default)]
    pub signers: std::collections::BTreeMap<String, Vec<String>>,
}
