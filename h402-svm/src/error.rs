//! Error types for the Solana namespace.

use h402::handler::HandlerError;
use h402::proto::PaymentVerificationError;
use solana_client::client_error::{ClientError, ClientErrorKind};

/// Errors specific to Solana verification.
#[derive(Debug, thiserror::Error)]
pub enum SolanaError {
    /// RPC transport error.
    #[error(transparent)]
    Transport(Box<ClientErrorKind>),
    /// The RPC node answered with data this crate cannot interpret.
    #[error("Unexpected RPC response: {0}")]
    Response(String),
    /// Payment verification failed.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
}

impl From<ClientError> for SolanaError {
    fn from(value: ClientError) -> Self {
        Self::Transport(value.kind)
    }
}

impl From<SolanaError> for HandlerError {
    fn from(value: SolanaError) -> Self {
        match value {
            SolanaError::Transport(_) | SolanaError::Response(_) => {
                Self::Onchain(value.to_string())
            }
            SolanaError::PaymentVerification(e) => Self::Verification(e),
        }
    }
}
