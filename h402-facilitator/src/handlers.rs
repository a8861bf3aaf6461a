//! Axum route handlers for the facilitator service.
//!
//! - `POST /verify` answers `{"data": VerifyResponse}`
//! - `POST /settle` answers a bare `SettleResponse`
//! - `GET /supported` lists served kinds and signer addresses
//! - `GET /health` reports liveness and version
//!
//! A malformed request body answers `{"error": ...}` with a 4xx status.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use h402::handler::HandlerRegistry;
use h402::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};
use serde::Serialize;

use crate::error::ServiceError;

/// Shared application state.
pub type FacilitatorState = Arc<HandlerRegistry>;

/// Body of a successful `POST /verify`.
#[derive(Debug, Serialize)]
pub struct VerifyEnvelope {
    /// The verification outcome.
    pub data: VerifyResponse,
}

/// `POST /verify`
///
/// # Errors
///
/// Returns [`ServiceError::InvalidBody`] if the body does not parse.
pub async fn post_verify(
    State(registry): State<FacilitatorState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<VerifyEnvelope>, ServiceError> {
    let Json(request) = body?;
    let data = registry.verify_payment(&request).await;
    tracing::debug!(valid = data.is_valid(), "verify handled");
    Ok(Json(VerifyEnvelope { data }))
}

/// `POST /settle`
///
/// # Errors
///
/// Returns [`ServiceError::InvalidBody`] if the body does not parse.
pub async fn post_settle(
    State(registry): State<FacilitatorState>,
    body: Result<Json<SettleRequest>, JsonRejection>,
) -> Result<Json<SettleResponse>, ServiceError> {
    let Json(request) = body?;
    let response = registry.settle_payment(&request).await;
    tracing::debug!(success = response.is_success(), "settle handled");
    Ok(Json(response))
}

/// `GET /supported`
pub async fn get_supported(State(registry): State<FacilitatorState>) -> Json<SupportedResponse> {
    Json(registry.supported_kinds())
}

/// `GET /health`
pub async fn get_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates a [`Router`] serving every facilitator endpoint.
pub fn facilitator_router(state: FacilitatorState) -> Router {
    Router::new()
        .route("/verify", post(post_verify))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
        .route("/health", get(get_health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use h402::amount::TokenAmount;
    use h402::facilitator::BoxFuture;
    use h402::handler::NamespaceHandler;
    use h402::namespace::Namespace;
    use h402::proto::{PaymentKind, PaymentPayload, PaymentRequirements};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    const RESOURCE: &str = "https://api.example.com/premium";
    const PAY_TO: &str = "0x0000000000000000000000000000000000000001";
    const PAYER: &str = "0x00000000000000000000000000000000000000aa";

    /// Accepts every payload on network `8453`.
    struct AcceptAll;

    impl NamespaceHandler for AcceptAll {
        fn namespace(&self) -> Namespace {
            Namespace::Evm
        }

        fn network_id(&self) -> &str {
            "8453"
        }

        fn signers(&self) -> Vec<String> {
            vec![PAY_TO.to_owned()]
        }

        fn verify<'a>(
            &'a self,
            _: &'a PaymentPayload,
            _: &'a PaymentRequirements,
        ) -> BoxFuture<'a, VerifyResponse> {
            Box::pin(async {
                VerifyResponse::valid(Some(PAYER.to_owned()), PaymentKind::Payload, None)
            })
        }

        fn settle<'a>(
            &'a self,
            _: &'a PaymentPayload,
            _: &'a PaymentRequirements,
        ) -> BoxFuture<'a, SettleResponse> {
            Box::pin(async {
                SettleResponse::Success {
                    transaction: format!("0x{}", "ab".repeat(32)),
                    namespace: Some(Namespace::Evm),
                    payer: Some(PAYER.to_owned()),
                }
            })
        }
    }

    fn router() -> Router {
        let registry = HandlerRegistry::new().and_register(Arc::new(AcceptAll));
        facilitator_router(Arc::new(registry))
    }

    fn request_body(network_id: &str) -> Value {
        let requirements = PaymentRequirements::new(
            Namespace::Evm,
            network_id,
            PAY_TO,
            TokenAmount::from(1_000),
            RESOURCE,
        );
        json!({
            "payload": {
                "h402Version": 1,
                "scheme": "exact",
                "namespace": "evm",
                "networkId": network_id,
                "resource": RESOURCE,
                "payload": {
                    "type": "authorization",
                    "signature": format!("0x{}", "11".repeat(65)),
                    "authorization": {
                        "from": PAYER,
                        "to": PAY_TO,
                        "value": "1000",
                        "validAfter": "0",
                        "validBefore": "99999999999",
                        "nonce": format!("0x{}", "22".repeat(32)),
                    },
                },
            },
            "paymentRequirements": requirements,
        })
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn verify_wraps_the_response_in_data() {
        let (status, body) = send(post_json("/verify", &request_body("8453"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isValid"], true);
        assert_eq!(body["data"]["payer"], PAYER);
    }

    #[tokio::test]
    async fn unserved_network_is_an_invalid_payment_not_an_error() {
        let (status, body) = send(post_json("/verify", &request_body("1"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isValid"], false);
        assert_eq!(body["data"]["invalidReason"], "invalid_network");
    }

    #[tokio::test]
    async fn settle_returns_a_bare_settle_response() {
        let (status, body) = send(post_json("/settle", &request_body("8453"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["transaction"], format!("0x{}", "ab".repeat(32)));
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn malformed_body_is_an_error_object() {
        let (status, body) = send(post_json("/settle", &json!({"payload": 42}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn supported_lists_kinds_and_signers() {
        let (status, body) = send(Request::get("/supported").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kinds"][0]["namespace"], "evm");
        assert_eq!(body["kinds"][0]["networkId"], "8453");
        assert_eq!(body["signers"]["evm"][0], PAY_TO);
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
