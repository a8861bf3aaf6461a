//! Error types for the Arkade namespace.

use h402::handler::HandlerError;
use h402::proto::PaymentVerificationError;
use reqwest::StatusCode;

/// Errors from Ark server calls and Arkade verification.
#[derive(Debug, thiserror::Error)]
pub enum ArkadeError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The Ark server answered with data that does not decode.
    #[error("Invalid Ark server response: {context}: {message}")]
    InvalidResponse {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong.
        message: String,
    },
    /// Payment verification failed.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
}

impl From<ArkadeError> for HandlerError {
    fn from(value: ArkadeError) -> Self {
        match value {
            ArkadeError::PaymentVerification(e) => Self::Verification(e),
            ArkadeError::UrlParse { .. }
            | ArkadeError::Http { .. }
            | ArkadeError::HttpStatus { .. }
            | ArkadeError::InvalidResponse { .. } => Self::Onchain(value.to_string()),
        }
    }
}
