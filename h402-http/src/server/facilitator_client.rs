//! Remote [`Facilitator`] over HTTP.
//!
//! Answers are accepted in three shapes: `{"data": ...}` (how `/verify`
//! replies), the bare object (how `/settle` and `/supported` reply), and
//! `{"error": "..."}` for a request the facilitator refused. An error body is
//! surfaced as [`FacilitatorClientError::Facilitator`] whatever the status.

use std::fmt::Display;
use std::time::Duration;

use h402::facilitator::{BoxFuture, Facilitator};
use h402::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Span, instrument};

use crate::constants::DEFAULT_TIMEOUT;

/// HTTP client for one h402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Duration,
}

/// Failures talking to a remote facilitator.
///
/// Every variant carries the endpoint as `context` (`"POST /verify"`, ...).
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    /// An endpoint URL could not be built.
    #[error("{context}: bad facilitator URL: {source}")]
    UrlParse {
        /// Endpoint or step.
        context: &'static str,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },
    /// The request could not be sent or timed out.
    #[error("{context}: request failed: {source}")]
    Http {
        /// Endpoint.
        context: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// A success body did not match the expected shape.
    #[error("{context}: malformed response: {source}")]
    JsonDeserialization {
        /// Endpoint.
        context: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The facilitator refused the request with `{"error"}`.
    #[error("{context}: facilitator refused ({status}): {message}")]
    Facilitator {
        /// Endpoint.
        context: &'static str,
        /// Response status.
        status: StatusCode,
        /// The facilitator's message.
        message: String,
    },
    /// A non-success status without an error body.
    #[error("{context}: unexpected status {status}: {body}")]
    HttpStatus {
        /// Endpoint.
        context: &'static str,
        /// Response status.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },
    /// The response body could not be read.
    #[error("{context}: unreadable response body: {source}")]
    ResponseBodyRead {
        /// Endpoint.
        context: &'static str,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<R> {
    Data { data: R },
    Bare(R),
    Error { error: String },
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, Self::Error>> {
        Box::pin(async move {
            let fut = Self::verify(self, &request);
            #[cfg(feature = "telemetry")]
            let fut = with_span(
                fut,
                tracing::info_span!("h402.facilitator_client.verify", timeout = ?self.timeout),
            );
            fut.await
        })
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, Self::Error>> {
        Box::pin(async move {
            let fut = Self::settle(self, &request);
            #[cfg(feature = "telemetry")]
            let fut = with_span(
                fut,
                tracing::info_span!("h402.facilitator_client.settle", timeout = ?self.timeout),
            );
            fut.await
        })
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, Self::Error>> {
        Box::pin(Self::supported(self))
    }
}

impl FacilitatorClient {
    /// The facilitator root, always ending in `/`.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST` target for verification.
    #[must_use]
    pub const fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// `POST` target for settlement.
    #[must_use]
    pub const fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    /// `GET` target listing supported kinds.
    #[must_use]
    pub const fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// Extra headers sent with every request.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates a client for the facilitator rooted at `base_url`.
    ///
    /// Endpoints are resolved relative to `base_url`, so it should end in `/`.
    /// The timeout starts at [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let join = |path: &str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|e| FacilitatorClientError::UrlParse { context, source: e })
        };
        let verify_url = join("./verify", "POST /verify")?;
        let settle_url = join("./settle", "POST /settle")?;
        let supported_url = join("./supported", "GET /supported")?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            supported_url,
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sends `headers` with every request, e.g. an API key.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Overrides the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Asks the facilitator to verify a payment.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport failure or an `{"error"}` reply.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", request)
            .await
    }

    /// Asks the facilitator to settle a payment.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] on transport failure or an `{"error"}` reply.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", request)
            .await
    }

    /// Lists the kinds the facilitator serves.
    ///
    /// # Errors
    ///
    /// Returns [`FacilitatorClientError`] if the HTTP request fails.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.facilitator_client.supported", skip_all, err)
    )]
    pub async fn supported(&self) -> Result<SupportedResponse, FacilitatorClientError> {
        let request = self.client.get(self.supported_url.clone());
        self.send(request, "GET /supported").await
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.client.post(url.clone()).json(payload);
        self.send(request, context).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        mut request: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, FacilitatorClientError> {
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| FacilitatorClientError::Http { context, source })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| FacilitatorClientError::ResponseBodyRead { context, source })?;

        let result = parse_reply(context, status, body);
        record_result_on_span(&result);
        result
    }
}

/// Unwraps a facilitator reply according to its status and envelope.
fn parse_reply<R: DeserializeOwned>(
    context: &'static str,
    status: StatusCode,
    body: String,
) -> Result<R, FacilitatorClientError> {
    let refused = |message| FacilitatorClientError::Facilitator {
        context,
        status,
        message,
    };
    if status.is_success() {
        return match serde_json::from_str::<Envelope<R>>(&body) {
            Ok(Envelope::Data { data } | Envelope::Bare(data)) => Ok(data),
            Ok(Envelope::Error { error }) => Err(refused(error)),
            Err(source) => Err(FacilitatorClientError::JsonDeserialization { context, source }),
        };
    }
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error }) => Err(refused(error)),
        Err(_) => Err(FacilitatorClientError::HttpStatus {
            context,
            status,
            body,
        }),
    }
}

/// Parses `value` as the facilitator root; a missing trailing `/` is added.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

/// Marks the current span `OK` or `ERROR`.
#[cfg(feature = "telemetry")]
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::error!(error = %err, "facilitator request failed");
        }
    }
}

#[cfg(not(feature = "telemetry"))]
const fn record_result_on_span<R, E: Display>(_result: &Result<R, E>) {}

#[cfg(feature = "telemetry")]
fn with_span<F: Future>(fut: F, span: Span) -> impl Future<Output = F::Output> {
    fut.instrument(span)
}

#[cfg(test)]
mod tests {
    use h402::amount::TokenAmount;
    use h402::codec;
    use h402::namespace::Namespace;
    use h402::proto::{
        ErrorReason, H402_VERSION, PaymentKind, PaymentPayload, PaymentRequirements,
    };
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const RESOURCE: &str = "https://api.example.com/premium";

    fn request() -> VerifyRequest {
        let payload: PaymentPayload = serde_json::from_value(json!({
            "h402Version": H402_VERSION,
            "scheme": "exact",
            "namespace": "evm",
            "networkId": "8453",
            "resource": RESOURCE,
            "payload": {
                "type": "signAndSendTransaction",
                "transactionHash": format!("0x{}", "ab".repeat(32)),
                "signedMessage": "0x01",
            },
        }))
        .unwrap();
        VerifyRequest {
            payload,
            payment_requirements: PaymentRequirements::new(
                Namespace::Evm,
                "8453",
                "0x0000000000000000000000000000000000000001",
                TokenAmount::from(1_000),
                RESOURCE,
            ),
        }
    }

    fn client(server: &MockServer) -> FacilitatorClient {
        FacilitatorClient::try_from(server.uri()).unwrap()
    }

    #[test]
    fn endpoints_are_relative_to_the_base() {
        let client = FacilitatorClient::try_from("https://facilitator.example/h402//").unwrap();
        assert_eq!(
            client.verify_url().as_str(),
            "https://facilitator.example/h402/verify"
        );
        assert_eq!(
            client.supported_url().as_str(),
            "https://facilitator.example/h402/supported"
        );
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn error_body_on_success_status_is_a_refusal() {
        let err = parse_reply::<SupportedResponse>(
            "GET /supported",
            StatusCode::OK,
            r#"{"error":"maintenance"}"#.to_owned(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "GET /supported: facilitator refused (200 OK): maintenance"
        );
    }

    #[tokio::test]
    async fn verify_unwraps_the_data_envelope() {
        let server = MockServer::start().await;
        let request = request();
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(body_partial_json(json!({"payload": codec::encode(&request.payload)})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"isValid": true, "type": "transaction", "txHash": "0xab"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = Facilitator::verify(&client(&server), request)
            .await
            .unwrap();
        assert_eq!(
            response,
            VerifyResponse::valid(None, PaymentKind::Transaction, Some("0xab".into()))
        );
    }

    #[tokio::test]
    async fn verify_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"error": "bad payload"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).verify(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            FacilitatorClientError::Facilitator { status: StatusCode::BAD_REQUEST, ref message, .. }
                if message == "bad payload"
        ));
    }

    #[tokio::test]
    async fn settle_reads_a_bare_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "transaction": "",
                "namespace": "evm",
                "errorReason": "unexpected_settle_error",
                "error": "nonce too low",
            })))
            .mount(&server)
            .await;

        let response = client(&server).settle(&request()).await.unwrap();
        assert_eq!(
            response,
            SettleResponse::error(
                ErrorReason::UnexpectedSettleError,
                Some("nonce too low".into()),
                Some(Namespace::Evm),
                None,
            )
        );
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kinds": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        let supported = client(&server)
            .with_headers(headers)
            .supported()
            .await
            .unwrap();
        assert!(supported.kinds.is_empty());
    }

    #[tokio::test]
    async fn unparseable_failure_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).settle(&request()).await.unwrap_err();
        assert!(matches!(
            err,
            FacilitatorClientError::HttpStatus { status: StatusCode::BAD_GATEWAY, ref body, .. }
                if body == "bad gateway"
        ));
    }

    #[tokio::test]
    async fn slow_facilitator_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(json!({"data": {"isValid": true}})),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .with_timeout(Duration::from_millis(50))
            .verify(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, FacilitatorClientError::Http { .. }));
    }
}
