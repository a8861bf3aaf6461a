//! Error types for the EVM namespace.

use alloy_primitives::TxHash;
use alloy_transport::TransportError;
use h402::handler::HandlerError;
use h402::proto::PaymentVerificationError;

use crate::provider::BroadcastError;

/// Errors specific to EVM verification and settlement.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    /// RPC transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Pending transaction error.
    #[error(transparent)]
    PendingTransaction(#[from] alloy_provider::PendingTransactionError),
    /// On-chain transaction was reverted.
    #[error("Transaction {0} reverted")]
    TransactionReverted(TxHash),
    /// Contract call failed.
    #[error("Contract call failed: {0}")]
    ContractCall(String),
    /// Payment verification failed.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
}

impl From<EvmError> for HandlerError {
    fn from(value: EvmError) -> Self {
        match value {
            EvmError::Transport(_) | EvmError::PendingTransaction(_) | EvmError::ContractCall(_) => {
                Self::Onchain(value.to_string())
            }
            EvmError::TransactionReverted(hash) => Self::Verification(
                PaymentVerificationError::TransactionState(format!("transaction {hash} reverted")),
            ),
            EvmError::PaymentVerification(e) => Self::Verification(e),
        }
    }
}

impl From<BroadcastError> for EvmError {
    fn from(e: BroadcastError) -> Self {
        match e {
            BroadcastError::Transport(e) => Self::Transport(e),
            BroadcastError::PendingTransaction(e) => Self::PendingTransaction(e),
        }
    }
}

impl From<alloy_contract::Error> for EvmError {
    fn from(e: alloy_contract::Error) -> Self {
        match e {
            alloy_contract::Error::TransportError(e) => Self::Transport(e),
            alloy_contract::Error::PendingTransactionError(e) => Self::PendingTransaction(e),
            other => Self::ContractCall(other.to_string()),
        }
    }
}
