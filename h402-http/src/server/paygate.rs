//! Core payment gate logic for enforcing h402 payments.
//!
//! The [`Paygate`] struct runs the per-request lifecycle: route lookup,
//! header decoding, requirement selection, verification, the protected
//! handler, and settlement. Anything the client can fix by paying becomes a
//! `402 Payment Required`; nothing in here produces a `500`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum_core::body::Body;
use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use h402::codec;
use h402::facilitator::Facilitator;
use h402::proto::{
    ErrorReason, H402_VERSION, PaymentKind, PaymentPayload, PaymentRequired, PaymentRequirements,
    SettleRequest, SettleResponse, VerifyRequest, VerifyResponse,
};
use http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tower::Service;

#[cfg(feature = "telemetry")]
use tracing::Instrument;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::body::GuardedBody;
use super::error::{PaygateError, VerificationError};
use super::paywall::{Paywall, accepts_html};
use crate::constants::{X_PAYMENT_HEADER, X_PAYMENT_RESPONSE_HEADER};
use crate::headers::payment_response_header;
use crate::route::RouteMatcher;

/// How settlement is driven once the handler's head is known.
///
/// Either way the head is held until settlement resolves, so a failed
/// settlement is always answered with a 402 and no byte of an unpaid response
/// reaches the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SettlementMode {
    /// Settle inline in the request future.
    #[default]
    Sync,
    /// Settle on a spawned task that runs to completion even if the client
    /// goes away, then stream the upstream body through a [`GuardedBody`].
    Async,
}

/// Payment gate shared by every request through one middleware instance.
#[allow(missing_debug_implementations)] // dyn Paywall has no Debug
pub struct Paygate<F> {
    /// The facilitator for verifying and settling payments
    pub facilitator: F,
    /// Protected routes, tried in declaration order
    pub routes: RouteMatcher,
    /// Settlement ordering
    pub settlement: SettlementMode,
    /// Deadline for each verify and settle call
    pub timeout: Duration,
    /// Optional HTML renderer for browsers
    pub paywall: Option<Arc<dyn Paywall>>,
}

impl<F> Paygate<F> {
    /// Calls the inner service with proper telemetry instrumentation.
    async fn call_inner<S>(mut inner: S, req: Request) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible>,
        S::Future: Send,
    {
        let fut = inner.call(req);
        #[cfg(feature = "telemetry")]
        let fut = fut.instrument(tracing::info_span!("inner"));
        match fut.await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

impl<F> Paygate<F>
where
    F: Facilitator + 'static,
{
    /// Handles an incoming request, processing payment if its route requires it.
    ///
    /// Requests to unprotected routes go straight to `inner`. Payment
    /// failures become a 402 response.
    ///
    /// # Errors
    ///
    /// This method is infallible (`Infallible` error type).
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "h402.handle_request", skip_all, fields(path = %req.uri().path()))
    )]
    pub async fn handle_request<S>(self: Arc<Self>, inner: S, req: Request) -> Result<Response, Infallible>
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let Some(route) = self.routes.find_matching_route(req.uri().path(), req.method()) else {
            return Ok(Self::call_inner(inner, req).await);
        };
        let accepts = route.accepts();
        let wants_html = self.paywall.is_some() && accepts_html(req.headers());

        match self.handle_request_fallible(accepts, inner, req).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(self.error_into_response(&err, accepts, wants_html)),
        }
    }

    /// Handles a request to a protected route, returning errors as `PaygateError`.
    ///
    /// This is the fallible version of `handle_request` that returns an actual error
    /// instead of turning it into 402 Payment Required response.
    ///
    /// # Errors
    ///
    /// Returns [`PaygateError`] if the payment is missing, invalid, or fails to settle.
    pub async fn handle_request_fallible<S>(
        self: &Arc<Self>,
        accepts: &[PaymentRequirements],
        inner: S,
        req: Request,
    ) -> Result<Response, PaygateError>
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send,
        S::Future: Send,
    {
        let header = extract_payment_header(req.headers())?;
        let payload = decode_payment_header(&header, accepts)?;
        let payment_requirements = select_requirements(&payload, accepts)?.clone();
        let request = VerifyRequest {
            payload,
            payment_requirements,
        };

        let kind = self.verify(&request).await?;

        let response = Self::call_inner(inner, req).await;
        if response.status().is_client_error() || response.status().is_server_error() {
            return Ok(response);
        }
        if kind == PaymentKind::Transaction {
            #[cfg(feature = "telemetry")]
            tracing::debug!("Payment already executed on chain, skipping settlement");
            return Ok(response);
        }

        match self.settlement {
            SettlementMode::Sync => {
                let receipt = self.settle(request).await?;
                let mut response = response;
                attach_receipt(response.headers_mut(), receipt);
                Ok(response)
            }
            SettlementMode::Async => self.settle_in_background(request, response).await,
        }
    }

    async fn verify(&self, request: &VerifyRequest) -> Result<PaymentKind, VerificationError> {
        let outcome =
            tokio::time::timeout(self.timeout, self.facilitator.verify(request.clone())).await;
        match outcome {
            Err(_) => Err(VerificationError::VerificationFailed(format!(
                "verification timed out after {:?}",
                self.timeout
            ))),
            Ok(Err(err)) => Err(VerificationError::VerificationFailed(err.to_string())),
            Ok(Ok(VerifyResponse::Valid { kind, .. })) => Ok(kind),
            Ok(Ok(VerifyResponse::Invalid {
                reason,
                message,
                payer,
            })) => Err(VerificationError::Rejected {
                reason,
                message,
                payer,
            }),
        }
    }

    /// Settles once under the timeout and encodes the receipt.
    async fn settle(&self, request: SettleRequest) -> Result<HeaderValue, PaygateError> {
        let unexpected = |message: String| PaygateError::Settlement {
            reason: ErrorReason::UnexpectedSettleError,
            message: Some(message),
            payer: None,
        };
        let settlement = match tokio::time::timeout(self.timeout, self.facilitator.settle(request))
            .await
        {
            Err(_) => {
                return Err(unexpected(format!(
                    "settlement timed out after {:?}",
                    self.timeout
                )));
            }
            Ok(Err(err)) => return Err(unexpected(err.to_string())),
            Ok(Ok(settlement)) => settlement,
        };

        #[cfg(feature = "telemetry")]
        tracing::event!(
            tracing::Level::INFO,
            success = settlement.is_success(),
            "settlement finished"
        );

        match settlement {
            SettleResponse::Error {
                reason,
                message,
                payer,
                ..
            } => Err(PaygateError::Settlement {
                reason,
                message,
                payer,
            }),
            success @ SettleResponse::Success { .. } => {
                payment_response_header(&success).map_err(|e| unexpected(e.to_string()))
            }
        }
    }

    /// Settles on a spawned task while the upstream body waits unread.
    async fn settle_in_background(
        self: &Arc<Self>,
        request: SettleRequest,
        response: Response,
    ) -> Result<Response, PaygateError> {
        let gate = Arc::clone(self);
        let settlement = tokio::spawn(async move { gate.settle(request).await });
        let receipt = settlement.await.map_err(|join| PaygateError::Settlement {
            reason: ErrorReason::UnexpectedSettleError,
            message: Some(join.to_string()),
            payer: None,
        })??;

        let (mut parts, body) = response.into_parts();
        attach_receipt(&mut parts.headers, receipt);
        Ok(Response::from_parts(parts, Body::new(GuardedBody::new(body))))
    }

    /// Converts a [`PaygateError`] into a 402 Payment Required response.
    fn error_into_response(
        &self,
        err: &PaygateError,
        accepts: &[PaymentRequirements],
        wants_html: bool,
    ) -> Response {
        #[cfg(feature = "telemetry")]
        tracing::debug!(error = %err, "Payment required");

        let required = PaymentRequired {
            h402_version: H402_VERSION,
            error: err.to_string(),
            accepts: accepts.to_vec(),
            payer: err.payer().map(str::to_owned),
        };

        if wants_html
            && matches!(
                err,
                PaygateError::Verification(VerificationError::PaymentHeaderRequired(_))
            )
            && let Some(paywall) = &self.paywall
        {
            return (
                StatusCode::PAYMENT_REQUIRED,
                [(CONTENT_TYPE, "text/html; charset=utf-8")],
                paywall.render(&required),
            )
                .into_response();
        }

        // Plain data with string keys always serializes.
        let body = serde_json::to_vec(&required).unwrap_or_default();
        (
            StatusCode::PAYMENT_REQUIRED,
            [(CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

fn attach_receipt(headers: &mut HeaderMap, receipt: HeaderValue) {
    headers.insert(HeaderName::from_static("x-payment-response"), receipt);
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(X_PAYMENT_RESPONSE_HEADER),
    );
}

/// Extracts the `X-PAYMENT` header as text.
fn extract_payment_header(headers: &HeaderMap) -> Result<String, VerificationError> {
    let value = headers
        .get(X_PAYMENT_HEADER)
        .ok_or(VerificationError::PaymentHeaderRequired(X_PAYMENT_HEADER))?;
    value
        .to_str()
        .map(str::to_owned)
        .map_err(|e| VerificationError::InvalidPaymentHeader(e.to_string()))
}

/// Decodes the header for its own namespace, or the route's first one if it names none.
fn decode_payment_header(
    header: &str,
    accepts: &[PaymentRequirements],
) -> Result<PaymentPayload, VerificationError> {
    let namespace = codec::detect_namespace(header)
        .or_else(|| accepts.first().map(|requirements| requirements.namespace))
        .ok_or(VerificationError::NoPaymentMatching)?;
    codec::decode_for(header, namespace)
        .map_err(|e| VerificationError::InvalidPaymentHeader(e.to_string()))
}

/// Picks the requirement whose `(namespace, networkId, scheme, resource)` equals the payload's.
fn select_requirements<'a>(
    payload: &PaymentPayload,
    accepts: &'a [PaymentRequirements],
) -> Result<&'a PaymentRequirements, VerificationError> {
    accepts
        .iter()
        .find(|requirements| {
            requirements.namespace == payload.namespace
                && requirements.network_id == payload.network_id
                && requirements.scheme == payload.scheme
                && requirements.resource == payload.resource
        })
        .ok_or(VerificationError::NoPaymentMatching)
}
