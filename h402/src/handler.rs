//! Namespace handlers and the registry that dispatches to them.
//!
//! Each chain crate implements [`NamespaceHandler`] for one network
//! (`EvmHandler` for chain 8453, `SolanaHandler` for mainnet, ...). The
//! [`HandlerRegistry`] owns the handlers, runs the chain-agnostic envelope
//! checks, routes by `(namespace, networkId)`, and implements
//! [`Facilitator`] so it can be served over HTTP or used in process.
//!
//! Neither handlers nor the registry let an error escape: every failure is
//! folded into an invalid [`VerifyResponse`] or a failed [`SettleResponse`].

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::facilitator::{BoxFuture, Facilitator};
use crate::namespace::Namespace;
use crate::proto::{
    AsPaymentProblem, ErrorReason, EvmPayload, H402_VERSION, PaymentPayload, PaymentProblem,
    PaymentRequirements, PaymentVerificationError, PayloadVariant, SettleRequest, SettleResponse,
    SupportedKind, SupportedResponse, VerifyRequest, VerifyResponse,
};
use crate::verify::{validate_base_payload, validate_chain_match};

/// Verifies and settles payments for one network of one namespace.
pub trait NamespaceHandler: Send + Sync {
    /// The namespace served.
    fn namespace(&self) -> Namespace;

    /// The network served.
    fn network_id(&self) -> &str;

    /// Addresses the handler settles from, if it signs anything.
    fn signers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Verifies a payload whose envelope already matched `requirements`.
    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, VerifyResponse>;

    /// Settles a payload whose envelope already matched `requirements`.
    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, SettleResponse>;
}

/// Failure inside a handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payment itself is invalid.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The chain could not be read or written (RPC failure, broadcast failure, timeout).
    #[error("Onchain error: {0}")]
    Onchain(String),
}

impl HandlerError {
    fn problem(&self, fallback: ErrorReason) -> PaymentProblem {
        match self {
            Self::Verification(e) => e.as_payment_problem(),
            Self::Onchain(e) => PaymentProblem::new(fallback, e.clone()),
        }
    }

    /// Folds the error into an invalid verification result.
    #[must_use]
    pub fn into_verify_response(self, payer: Option<String>) -> VerifyResponse {
        let problem = self.problem(ErrorReason::UnexpectedVerifyError);
        VerifyResponse::invalid(problem.reason(), Some(problem.details().to_owned()), payer)
    }

    /// Folds the error into a failed settlement result.
    #[must_use]
    pub fn into_settle_response(
        self,
        namespace: Namespace,
        payer: Option<String>,
    ) -> SettleResponse {
        let problem = self.problem(ErrorReason::UnexpectedSettleError);
        SettleResponse::error(
            problem.reason(),
            Some(problem.details().to_owned()),
            Some(namespace),
            payer,
        )
    }
}

/// Best-effort payer identification from the payload alone.
#[must_use]
pub fn payer_hint(payload: &PaymentPayload) -> Option<String> {
    match &payload.payload {
        PayloadVariant::Evm(EvmPayload::Authorization(auth)) => {
            Some(auth.authorization.from.to_string())
        }
        _ => None,
    }
}

/// Registry of namespace handlers keyed by `(namespace, networkId)`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<(Namespace, String), Arc<dyn NamespaceHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("networks", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous one for the same network.
    pub fn register(&mut self, handler: Arc<dyn NamespaceHandler>) -> &mut Self {
        let key = (handler.namespace(), handler.network_id().to_owned());
        #[cfg(feature = "telemetry")]
        tracing::info!(namespace = %key.0, network = %key.1, "Registered namespace handler");
        self.handlers.insert(key, handler);
        self
    }

    /// Registers a handler, builder style.
    #[must_use]
    pub fn and_register(mut self, handler: Arc<dyn NamespaceHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Looks up the handler for a network.
    #[must_use]
    pub fn get(&self, namespace: Namespace, network_id: &str) -> Option<&Arc<dyn NamespaceHandler>> {
        self.handlers.get(&(namespace, network_id.to_owned()))
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn route(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<&Arc<dyn NamespaceHandler>, PaymentVerificationError> {
        validate_base_payload(payload, requirements)?;
        let handler = self
            .get(requirements.namespace, &requirements.network_id)
            .ok_or_else(|| {
                PaymentVerificationError::UnsupportedNetwork(format!(
                    "{}:{}",
                    requirements.namespace, requirements.network_id
                ))
            })?;
        validate_chain_match(handler.namespace(), handler.network_id(), requirements)?;
        Ok(handler)
    }

    /// Verifies a payment. Never fails; rejections are invalid responses.
    #[cfg_attr(feature = "telemetry", instrument(name = "h402.verify", skip_all, fields(
        namespace = %request.payment_requirements.namespace,
        network = %request.payment_requirements.network_id,
    )))]
    pub async fn verify_payment(&self, request: &VerifyRequest) -> VerifyResponse {
        let payload = &request.payload;
        let requirements = &request.payment_requirements;
        match self.route(payload, requirements) {
            Ok(handler) => handler.verify(payload, requirements).await,
            Err(e) => VerifyResponse::from_problem(&e, payer_hint(payload)),
        }
    }

    /// Settles a payment. Never fails; failures are error responses.
    #[cfg_attr(feature = "telemetry", instrument(name = "h402.settle", skip_all, fields(
        namespace = %request.payment_requirements.namespace,
        network = %request.payment_requirements.network_id,
    )))]
    pub async fn settle_payment(&self, request: &SettleRequest) -> SettleResponse {
        let payload = &request.payload;
        let requirements = &request.payment_requirements;
        match self.route(payload, requirements) {
            Ok(handler) => handler.settle(payload, requirements).await,
            Err(e) => SettleResponse::from_problem(
                &e,
                Some(requirements.namespace),
                payer_hint(payload),
            ),
        }
    }

    /// Lists every registered network.
    #[must_use]
    pub fn supported_kinds(&self) -> SupportedResponse {
        let mut response = SupportedResponse::default();
        for ((namespace, network_id), handler) in &self.handlers {
            response.kinds.push(SupportedKind {
                h402_version: H402_VERSION,
                scheme: crate::proto::EXACT_SCHEME.to_owned(),
                namespace: *namespace,
                network_id: network_id.clone(),
            });
            let entry = response
                .signers
                .entry(namespace.as_str().to_owned())
                .or_default();
            for signer in handler.signers() {
                if !entry.contains(&signer) {
                    entry.push(signer);
                }
            }
        }
        response
    }
}

impl Facilitator for HandlerRegistry {
    type Error = Infallible;

    fn verify(&self, request: VerifyRequest) -> BoxFuture<'_, Result<VerifyResponse, Infallible>> {
        Box::pin(async move { Ok(self.verify_payment(&request).await) })
    }

    fn settle(&self, request: SettleRequest) -> BoxFuture<'_, Result<SettleResponse, Infallible>> {
        Box::pin(async move { Ok(self.settle_payment(&request).await) })
    }

    fn supported(&self) -> BoxFuture<'_, Result<SupportedResponse, Infallible>> {
        Box::pin(async move { Ok(self.supported_kinds()) })
    }
}
