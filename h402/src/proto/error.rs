//! Error types for h402 payment verification.
//!
//! [`ErrorReason`] is the closed, machine-readable taxonomy carried in
//! `invalidReason` / `errorReason` fields. [`PaymentVerificationError`] is the
//! typed error handlers return; it maps onto a reason via [`AsPaymentProblem`].

use serde::{Deserialize, Serialize};

/// Errors that can occur during payment verification.
///
/// Chain crates convert their own errors into this type; the variants that
/// are specific to one namespace travel as [`Self::Rejected`] with a
/// namespace-qualified [`ErrorReason`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PaymentVerificationError {
    /// The payment payload is malformed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    /// The payment requirements are malformed or cannot be satisfied by this payload type.
    #[error("Invalid payment requirements: {0}")]
    InvalidRequirements(String),
    /// The payload speaks a protocol version this implementation does not.
    #[error("Unsupported h402 version {0}")]
    VersionMismatch(u8),
    /// Payload and requirements disagree on the scheme.
    #[error("Payment scheme is invalid with respect to the payment requirements")]
    SchemeMismatch,
    /// Payload and requirements disagree on the namespace.
    #[error("Payment namespace is invalid with respect to the payment requirements")]
    NamespaceMismatch,
    /// Payload and requirements disagree on the network.
    #[error("Payment network is invalid with respect to the payment requirements")]
    NetworkMismatch,
    /// Payload and requirements disagree on the resource.
    #[error("Payment resource is invalid with respect to the payment requirements")]
    ResourceMismatch,
    /// No handler serves this `(namespace, networkId)` pair.
    #[error("Unsupported network: {0}")]
    UnsupportedNetwork(String),
    /// The payload type cannot be settled by the facilitator.
    #[error("Payload type {0} cannot be settled by the facilitator")]
    NotSettleable(String),
    /// The payer's on-chain balance is insufficient.
    #[error("Onchain balance is not enough to cover the payment amount")]
    InsufficientFunds,
    /// The referenced transaction failed or is not in a usable state.
    #[error("Invalid transaction state: {0}")]
    TransactionState(String),
    /// The referenced transaction does not exist on chain.
    #[error("Transaction {0} not found")]
    TransactionNotFound(String),
    /// A namespace-specific rejection.
    #[error("{message}")]
    Rejected {
        /// The namespace-qualified reason.
        reason: ErrorReason,
        /// Human-readable details.
        message: String,
    },
}

impl PaymentVerificationError {
    /// Builds a [`Self::Rejected`] error.
    pub fn rejected(reason: ErrorReason, message: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: message.into(),
        }
    }
}

impl AsPaymentProblem for PaymentVerificationError {
    fn as_payment_problem(&self) -> PaymentProblem {
        let error_reason = match self {
            Self::InvalidPayload(_) => ErrorReason::InvalidPayload,
            Self::InvalidRequirements(_) => ErrorReason::InvalidPaymentRequirements,
            Self::VersionMismatch(_) => ErrorReason::InvalidH402Version,
            Self::SchemeMismatch | Self::NotSettleable(_) => ErrorReason::InvalidScheme,
            Self::NamespaceMismatch => ErrorReason::InvalidNamespace,
            Self::NetworkMismatch | Self::UnsupportedNetwork(_) => ErrorReason::InvalidNetwork,
            Self::ResourceMismatch => ErrorReason::InvalidResource,
            Self::InsufficientFunds => ErrorReason::InsufficientFunds,
            Self::TransactionState(_) => ErrorReason::InvalidTransactionState,
            Self::TransactionNotFound(_) => ErrorReason::TransactionNotFound,
            Self::Rejected { reason, .. } => *reason,
        };
        PaymentProblem::new(error_reason, self.to_string())
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidPayload(value.to_string())
    }
}

/// Machine-readable reason codes for payment failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The payment payload is malformed.
    InvalidPayload,
    /// The network does not match or is not served.
    InvalidNetwork,
    /// The scheme does not match, or the payload type cannot be settled.
    InvalidScheme,
    /// The protocol version is not supported.
    #[serde(rename = "invalid_h402_version")]
    InvalidH402Version,
    /// The payment requirements are malformed.
    InvalidPaymentRequirements,
    /// The namespace does not match.
    InvalidNamespace,
    /// The resource does not match.
    InvalidResource,
    /// The payer cannot cover the amount.
    InsufficientFunds,
    /// The EIP-3009 authorization is not yet valid.
    InvalidEvmAuthorizationValidAfter,
    /// The EIP-3009 authorization expires too soon or has expired.
    InvalidEvmAuthorizationValidBefore,
    /// The authorized value is below the required amount.
    InvalidEvmAuthorizationValue,
    /// The token contract rejects the authorization signature.
    InvalidEvmAuthorizationSignature,
    /// The authorization pays someone other than `payToAddress`.
    InvalidEvmAuthorizationRecipientMismatch,
    /// Settling the authorization would exceed the gas cap.
    InvalidEvmAuthorizationGasLimit,
    /// The transferred value is below the required amount.
    InvalidEvmTransactionValue,
    /// The transaction pays someone other than `payToAddress`.
    InvalidEvmTransactionRecipientMismatch,
    /// The transaction or resource signature is invalid.
    InvalidEvmTransactionSignature,
    /// The emitted `Transfer` event disagrees with the transaction.
    InvalidEvmTransactionTransferEvent,
    /// The Solana transfer is below the required amount.
    InvalidSolanaTransactionValue,
    /// The Solana transfer pays someone other than `payToAddress`.
    InvalidSolanaRecipientMismatch,
    /// The Solana signature or wire transaction is invalid.
    InvalidSolanaSignature,
    /// The PSBT cannot be decoded.
    InvalidArkadePsbt,
    /// A PSBT input carries no signature.
    InvalidArkadePsbtUnsigned,
    /// The Ark address cannot be decoded.
    InvalidArkadeAddress,
    /// The Ark transfer is below the required amount.
    InvalidArkadeTransactionValue,
    /// No Ark output pays `payToAddress`.
    InvalidArkadeRecipientMismatch,
    /// The referenced transaction failed or is unusable.
    InvalidTransactionState,
    /// The referenced transaction is not on chain.
    TransactionNotFound,
    /// Verification failed for an unclassified reason (RPC outage, timeout).
    UnexpectedVerifyError,
    /// Settlement failed for an unclassified reason (broadcast failure, underfunded facilitator).
    UnexpectedSettleError,
}

impl ErrorReason {
    /// Returns the `snake_case` string representation matching the wire format.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidPayload => "invalid_payload",
            Self::InvalidNetwork => "invalid_network",
            Self::InvalidScheme => "invalid_scheme",
            Self::InvalidH402Version => "invalid_h402_version",
            Self::InvalidPaymentRequirements => "invalid_payment_requirements",
            Self::InvalidNamespace => "invalid_namespace",
            Self::InvalidResource => "invalid_resource",
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidEvmAuthorizationValidAfter => "invalid_evm_authorization_valid_after",
            Self::InvalidEvmAuthorizationValidBefore => "invalid_evm_authorization_valid_before",
            Self::InvalidEvmAuthorizationValue => "invalid_evm_authorization_value",
            Self::InvalidEvmAuthorizationSignature => "invalid_evm_authorization_signature",
            Self::InvalidEvmAuthorizationRecipientMismatch => {
                "invalid_evm_authorization_recipient_mismatch"
            }
            Self::InvalidEvmAuthorizationGasLimit => "invalid_evm_authorization_gas_limit",
            Self::InvalidEvmTransactionValue => "invalid_evm_transaction_value",
            Self::InvalidEvmTransactionRecipientMismatch => {
                "invalid_evm_transaction_recipient_mismatch"
            }
            Self::InvalidEvmTransactionSignature => "invalid_evm_transaction_signature",
            Self::InvalidEvmTransactionTransferEvent => "invalid_evm_transaction_transfer_event",
            Self::InvalidSolanaTransactionValue => "invalid_solana_transaction_value",
            Self::InvalidSolanaRecipientMismatch => "invalid_solana_recipient_mismatch",
            Self::InvalidSolanaSignature => "invalid_solana_signature",
            Self::InvalidArkadePsbt => "invalid_arkade_psbt",
            Self::InvalidArkadePsbtUnsigned => "invalid_arkade_psbt_unsigned",
            Self::InvalidArkadeAddress => "invalid_arkade_address",
            Self::InvalidArkadeTransactionValue => "invalid_arkade_transaction_value",
            Self::InvalidArkadeRecipientMismatch => "invalid_arkade_recipient_mismatch",
            Self::InvalidTransactionState => "invalid_transaction_state",
            Self::TransactionNotFound => "transaction_not_found",
            Self::UnexpectedVerifyError => "unexpected_verify_error",
            Self::UnexpectedSettleError => "unexpected_settle_error",
        }
    }

    /// Returns `true` for the "paid less than required" class, whatever the namespace.
    #[must_use]
    pub const fn is_insufficient_amount(&self) -> bool {
        matches!(
            self,
            Self::InvalidEvmAuthorizationValue
                | Self::InvalidEvmTransactionValue
                | Self::InvalidSolanaTransactionValue
                | Self::InvalidArkadeTransactionValue
        )
    }
}

impl core::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for converting errors into structured payment problems.
pub trait AsPaymentProblem {
    /// Converts this error into a [`PaymentProblem`].
    fn as_payment_problem(&self) -> PaymentProblem;
}

/// A structured payment error with reason code and details.
#[derive(Debug)]
pub struct PaymentProblem {
    reason: ErrorReason,
    details: String,
}

impl PaymentProblem {
    /// Creates a new payment problem with the given reason and details.
    #[must_use]
    pub const fn new(reason: ErrorReason, details: String) -> Self {
        Self { reason, details }
    }

    /// Returns the error reason code.
    #[must_use]
    pub const fn reason(&self) -> ErrorReason {
        self.reason
    }

    /// Returns the human-readable error details.
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }
}
