//! Payment payloads sent by clients in the `X-PAYMENT` header.
//!
//! A [`PaymentPayload`] is an envelope (`h402Version`, `scheme`, `namespace`,
//! `networkId`, `resource`) around a [`PayloadVariant`]. The variant is a
//! closed union keyed by `(namespace, type)`: the envelope's namespace picks
//! the family and the inner `type` tag picks the member.

use std::fmt::{self, Display, Formatter};

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::PaymentKind;
use super::encoding::Base64Bytes;
use crate::amount::TokenAmount;
use crate::namespace::Namespace;
use crate::timestamp::UnixTimestamp;

/// The protocol version this crate speaks.
pub const H402_VERSION: u8 = 1;

/// A signed payment proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPayload {
    /// Protocol version.
    pub h402_version: u8,
    /// Payment scheme, `"exact"`.
    pub scheme: String,
    /// Chain family of [`Self::payload`].
    pub namespace: Namespace,
    /// Network within the namespace.
    pub network_id: String,
    /// The resource URL this payment is bound to.
    pub resource: String,
    /// The namespace-specific proof.
    pub payload: PayloadVariant,
}

impl PaymentPayload {
    /// Whether the proof still needs settlement or is already executed.
    #[must_use]
    pub const fn kind(&self) -> PaymentKind {
        self.payload.kind()
    }
}

/// Namespace-specific payment proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PayloadVariant {
    /// EVM proofs.
    Evm(EvmPayload),
    /// Solana proofs.
    Solana(SolanaPayload),
    /// Arkade proofs.
    Arkade(ArkadePayload),
}

impl PayloadVariant {
    /// The namespace this variant belongs to.
    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        match self {
            Self::Evm(_) => Namespace::Evm,
            Self::Solana(_) => Namespace::Solana,
            Self::Arkade(_) => Namespace::Arkade,
        }
    }

    /// Classifies the proof: `Payload` must be settled, `Transaction` is already on chain.
    #[must_use]
    pub const fn kind(&self) -> PaymentKind {
        match self {
            Self::Evm(EvmPayload::Authorization(_) | EvmPayload::SignedTransaction(_))
            | Self::Solana(SolanaPayload::SignTransaction(_))
            | Self::Arkade(ArkadePayload::SignedTransaction(_)) => PaymentKind::Payload,
            Self::Evm(EvmPayload::SignAndSendTransaction(_))
            | Self::Solana(
                SolanaPayload::NativeTransfer(_)
                | SolanaPayload::TokenTransfer(_)
                | SolanaPayload::SignAndSendTransaction(_),
            )
            | Self::Arkade(ArkadePayload::SignAndSendTransaction(_)) => PaymentKind::Transaction,
        }
    }

    /// The wire `type` tag of the variant.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Evm(EvmPayload::Authorization(_)) => "authorization",
            Self::Evm(EvmPayload::SignedTransaction(_))
            | Self::Arkade(ArkadePayload::SignedTransaction(_)) => "signedTransaction",
            Self::Evm(EvmPayload::SignAndSendTransaction(_))
            | Self::Solana(SolanaPayload::SignAndSendTransaction(_))
            | Self::Arkade(ArkadePayload::SignAndSendTransaction(_)) => "signAndSendTransaction",
            Self::Solana(SolanaPayload::NativeTransfer(_)) => "nativeTransfer",
            Self::Solana(SolanaPayload::TokenTransfer(_)) => "tokenTransfer",
            Self::Solana(SolanaPayload::SignTransaction(_)) => "signTransaction",
        }
    }

    /// Parses the inner `payload` object for a given namespace.
    ///
    /// # Errors
    ///
    /// Returns an error on an unknown `type`, a missing field, or a field of the wrong shape.
    pub fn from_value(
        namespace: Namespace,
        value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match namespace {
            Namespace::Evm => Self::Evm(serde_json::from_value(value)?),
            Namespace::Solana => Self::Solana(serde_json::from_value(value)?),
            Namespace::Arkade => Self::Arkade(serde_json::from_value(value)?),
        })
    }
}

/// EVM payment proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EvmPayload {
    /// An EIP-3009 `transferWithAuthorization` signature the facilitator broadcasts.
    Authorization(EvmAuthorizationPayload),
    /// A signed raw transaction the facilitator broadcasts.
    SignedTransaction(EvmSignedTransaction),
    /// A transaction the client already broadcast.
    SignAndSendTransaction(EvmSentTransaction),
}

/// An EIP-3009 authorization and its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmAuthorizationPayload {
    /// 65-byte ECDSA signature over the EIP-712 `TransferWithAuthorization` message.
    pub signature: Bytes,
    /// The signed authorization parameters.
    pub authorization: EvmAuthorization,
}

/// EIP-3009 `TransferWithAuthorization` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmAuthorization {
    /// Payer.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// Amount in the token's smallest unit.
    pub value: TokenAmount,
    /// Not valid before this instant.
    pub valid_after: UnixTimestamp,
    /// Not valid at or after this instant.
    pub valid_before: UnixTimestamp,
    /// Unique 32-byte nonce.
    pub nonce: B256,
}

/// A signed, not yet broadcast EIP-2718 transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmSignedTransaction {
    /// The RLP/EIP-2718 encoded signed transaction.
    pub signed_transaction: Bytes,
    /// EIP-191 signature over the resource URL by the transaction sender.
    pub signed_message: Bytes,
}

/// A transaction already broadcast by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmSentTransaction {
    /// The transaction hash.
    pub transaction_hash: B256,
    /// EIP-191 signature over the resource URL by the transaction sender.
    pub signed_message: Bytes,
}

/// Solana payment proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SolanaPayload {
    /// A confirmed SOL transfer.
    NativeTransfer(SolanaTransferProof),
    /// A confirmed SPL token transfer.
    TokenTransfer(SolanaTransferProof),
    /// A signed wire transaction.
    SignTransaction(SolanaSignedTransaction),
    /// A transaction the client already sent.
    SignAndSendTransaction(SolanaTransferProof),
}

/// Reference to a Solana transaction already on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaTransferProof {
    /// The transaction's first signature.
    pub transaction_signature: Base58Signature,
    /// Optional wallet signature over the resource URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_message: Option<String>,
}

/// A signed Solana wire transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaSignedTransaction {
    /// Bincode-serialized versioned transaction.
    pub transaction: Base64Bytes,
}

/// A base58-encoded 64-byte Solana signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Base58Signature(String);

impl Base58Signature {
    /// Validates and wraps a base58 signature string.
    ///
    /// # Errors
    ///
    /// Returns a message if the string is not base58 or does not decode to 64 bytes.
    pub fn parse(s: &str) -> Result<Self, String> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| format!("invalid base58 signature: {e}"))?;
        if bytes.len() != 64 {
            return Err(format!(
                "signature must be 64 bytes, got {}",
                bytes.len()
            ));
        }
        Ok(Self(s.to_owned()))
    }

    /// Wraps the base58 encoding of raw signature bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// The base58 text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Base58Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Base58Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Base58Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Arkade payment proofs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArkadePayload {
    /// A signed Ark transaction the facilitator submits to the Ark server.
    SignedTransaction(ArkadeSignedTransaction),
    /// An Ark transaction the client already submitted.
    SignAndSendTransaction(ArkadeSentTransaction),
}

/// A signed, not yet submitted Ark transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArkadeSignedTransaction {
    /// The signed Ark transaction as a PSBT.
    pub psbt: Base64Bytes,
    /// Signed checkpoint PSBTs, if the client produced them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkpoint_txs: Vec<Base64Bytes>,
}

/// Reference to an Ark transaction already accepted by the Ark server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArkadeSentTransaction {
    /// The Ark transaction id, 32 bytes of hex.
    pub txid: B256,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentPayloadWireRef<'a> {
    h402_version: u8,
    scheme: &'a str,
    namespace: Namespace,
    network_id: &'a str,
    resource: &'a str,
    payload: &'a PayloadVariant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PaymentPayloadWire {
    pub(crate) h402_version: u8,
    pub(crate) scheme: String,
    #[serde(default)]
    pub(crate) namespace: Option<Namespace>,
    pub(crate) network_id: String,
    pub(crate) resource: String,
    pub(crate) payload: serde_json::Value,
}

impl PaymentPayloadWire {
    /// Parses the proof as a member of `family`. A payload that names no
    /// namespace takes `family` as its own.
    pub(crate) fn into_payload(
        self,
        family: Namespace,
    ) -> Result<PaymentPayload, serde_json::Error> {
        let payload = PayloadVariant::from_value(family, self.payload)?;
        Ok(PaymentPayload {
            h402_version: self.h402_version,
            scheme: self.scheme,
            namespace: self.namespace.unwrap_or(family),
            network_id: self.network_id,
            resource: self.resource,
            payload,
        })
    }
}

impl Serialize for PaymentPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PaymentPayloadWireRef {
            h402_version: self.h402_version,
            scheme: &self.scheme,
            namespace: self.namespace,
            network_id: &self.network_id,
            resource: &self.resource,
            payload: &self.payload,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PaymentPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = PaymentPayloadWire::deserialize(deserializer)?;
        let namespace = wire
            .namespace
            .ok_or_else(|| serde::de::Error::missing_field("namespace"))?;
        wire.into_payload(namespace)
            .map_err(serde::de::Error::custom)
    }
}
