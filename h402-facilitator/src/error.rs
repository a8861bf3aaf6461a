//! Error types for the facilitator service.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors returned to facilitator HTTP clients as `{"error": ...}`.
///
/// Payment rejections are not errors: they travel inside the
/// verify and settle response bodies.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request body is not a valid verify or settle request.
    #[error("invalid request body: {0}")]
    InvalidBody(#[from] JsonRejection),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(rejection) => match rejection {
                JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                _ => StatusCode::BAD_REQUEST,
            },
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Errors while turning the configuration into namespace handlers.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// An EVM section key is not a decimal chain id.
    #[error("invalid EVM chain id {0:?}")]
    InvalidChainId(String),
    /// A URL in the configuration does not parse.
    #[error("invalid URL for {network}: {message}")]
    InvalidUrl {
        /// Network the URL belongs to.
        network: String,
        /// Parser message.
        message: String,
    },
    /// The signer key is not a valid secp256k1 private key.
    #[cfg(feature = "chain-evm")]
    #[error("invalid signer key for {network}: {source}")]
    SignerKey {
        /// Network the key belongs to.
        network: String,
        /// Underlying error.
        source: alloy_signer_local::LocalSignerError,
    },
    /// The EVM provider could not be assembled.
    #[cfg(feature = "chain-evm")]
    #[error("failed to build provider for {network}: {source}")]
    Provider {
        /// Network the provider serves.
        network: String,
        /// Underlying error.
        source: h402_evm::provider::ProviderBuildError,
    },
}
