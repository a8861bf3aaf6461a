//! Error types for the h402 payment gate middleware.
//!
//! Every variant here ends in a `402 Payment Required`: the client can fix
//! the request by paying (again).

use h402::proto::ErrorReason;

/// Failures before the protected handler runs.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// Required payment header is missing.
    #[error("{0} header is required")]
    PaymentHeaderRequired(&'static str),
    /// Payment header is present but does not decode.
    #[error("Invalid or malformed payment header: {0}")]
    InvalidPaymentHeader(String),
    /// No accepted requirement matches the payload.
    #[error("Unable to find matching payment requirements")]
    NoPaymentMatching,
    /// The facilitator rejected the payment.
    #[error("{reason}")]
    Rejected {
        /// Machine-readable reason.
        reason: ErrorReason,
        /// Facilitator details, if any.
        message: Option<String>,
        /// Payer, when identifiable.
        payer: Option<String>,
    },
    /// The facilitator could not be reached or did not answer in time.
    #[error("unexpected_verify_error: {0}")]
    VerificationFailed(String),
}

impl VerificationError {
    /// The payer to report in the 402 body.
    #[must_use]
    pub fn payer(&self) -> Option<&str> {
        match self {
            Self::Rejected { payer, .. } => payer.as_deref(),
            _ => None,
        }
    }
}

/// Paygate error type that wraps verification and settlement errors.
#[derive(Debug, thiserror::Error)]
pub enum PaygateError {
    /// Payment verification failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),
    /// Settlement failed before any response byte was released.
    #[error("Settlement failed: {reason}")]
    Settlement {
        /// Machine-readable reason.
        reason: ErrorReason,
        /// Details, if any.
        message: Option<String>,
        /// Payer, when identifiable.
        payer: Option<String>,
    },
}

impl PaygateError {
    /// The payer to report in the 402 body.
    #[must_use]
    pub fn payer(&self) -> Option<&str> {
        match self {
            Self::Verification(err) => err.payer(),
            Self::Settlement { payer, .. } => payer.as_deref(),
        }
    }
}
