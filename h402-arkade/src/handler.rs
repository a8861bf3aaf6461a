//! [`NamespaceHandler`] for Ark networks, checking payments against the Ark server.

use alloy_primitives::hex;
use h402::facilitator::BoxFuture;
use h402::handler::{HandlerError, NamespaceHandler};
use h402::namespace::Namespace;
use h402::proto::{
    ArkadePayload, PaymentKind, PaymentPayload, PaymentRequirements, PaymentVerificationError,
    PayloadVariant, SettleResponse, VerifyResponse,
};
#[cfg(feature = "telemetry")]
use tracing_core::Level;

use crate::client::ArkProvider;
use crate::error::ArkadeError;
use crate::verify::{assert_payment, assert_signed, decode_psbt};

/// Awaits a future, optionally instrumenting it with a tracing span.
macro_rules! traced {
    ($fut:expr, $span:expr) => {{
        #[cfg(feature = "telemetry")]
        {
            use tracing::Instrument;
            $fut.instrument($span).await
        }
        #[cfg(not(feature = "telemetry"))]
        {
            $fut.await
        }
    }};
}

/// [`NamespaceHandler`] for one Ark network (`"bitcoin"`, `"mutinynet"`).
#[derive(Debug)]
pub struct ArkadeHandler<C> {
    network_id: String,
    client: C,
}

impl<C> ArkadeHandler<C> {
    /// Creates a handler for `network_id` backed by an Ark server client.
    pub fn new(network_id: impl Into<String>, client: C) -> Self {
        Self {
            network_id: network_id.into(),
            client,
        }
    }
}

fn arkade_payload(payload: &PaymentPayload) -> Result<&ArkadePayload, PaymentVerificationError> {
    match &payload.payload {
        PayloadVariant::Arkade(arkade) => Ok(arkade),
        PayloadVariant::Evm(_) | PayloadVariant::Solana(_) => {
            Err(PaymentVerificationError::NamespaceMismatch)
        }
    }
}

impl<C: ArkProvider> ArkadeHandler<C> {
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(skip_all, err, fields(network = %self.network_id))
    )]
    async fn verify_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, ArkadeError> {
        match arkade_payload(payload)? {
            ArkadePayload::SignedTransaction(signed) => {
                let psbt = decode_psbt(&signed.psbt.0)?;
                assert_signed(&psbt)?;
                assert_payment(&psbt.unsigned_tx.outputs, requirements, &self.network_id)?;
                Ok(VerifyResponse::valid(None, PaymentKind::Payload, None))
            }
            ArkadePayload::SignAndSendTransaction(sent) => {
                let txid = hex::encode(sent.txid);
                let tx_fut = self.client.get_virtual_tx(&txid);
                let bytes = traced!(
                    tx_fut,
                    tracing::info_span!("get_virtual_tx", txid = %txid, otel.kind = "client")
                )?
                .ok_or_else(|| PaymentVerificationError::TransactionNotFound(txid.clone()))?;
                let psbt = decode_psbt(&bytes)?;
                assert_payment(&psbt.unsigned_tx.outputs, requirements, &self.network_id)?;
                Ok(VerifyResponse::valid(
                    None,
                    PaymentKind::Transaction,
                    Some(txid),
                ))
            }
        }
    }

    async fn settle_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<String, ArkadeError> {
        match arkade_payload(payload)? {
            ArkadePayload::SignedTransaction(signed) => {
                self.verify_inner(payload, requirements).await?;
                let submit_fut = self.client.submit_tx(&signed.psbt, &signed.checkpoint_txs);
                let submitted = traced!(
                    submit_fut,
                    tracing::info_span!("submit_tx",
                        checkpoints = signed.checkpoint_txs.len(),
                        otel.kind = "client",
                    )
                )?;
                #[cfg(feature = "telemetry")]
                tracing::event!(Level::INFO,
                    status = "ok",
                    tx = %submitted.ark_txid,
                    "ark transaction submitted"
                );
                Ok(submitted.ark_txid)
            }
            ArkadePayload::SignAndSendTransaction(_) => Err(
                PaymentVerificationError::NotSettleable("signAndSendTransaction".into()).into(),
            ),
        }
    }
}

impl<C: ArkProvider> NamespaceHandler for ArkadeHandler<C> {
    fn namespace(&self) -> Namespace {
        Namespace::Arkade
    }

    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, VerifyResponse> {
        Box::pin(async move {
            self.verify_inner(payload, requirements)
                .await
                .unwrap_or_else(|e| HandlerError::from(e).into_verify_response(None))
        })
    }

    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, SettleResponse> {
        Box::pin(async move {
            match self.settle_inner(payload, requirements).await {
                Ok(transaction) => SettleResponse::Success {
                    transaction,
                    namespace: Some(Namespace::Arkade),
                    payer: None,
                },
                Err(e) => HandlerError::from(e).into_settle_response(Namespace::Arkade, None),
            }
        })
    }
}
