//! [`NamespaceHandler`] for Solana clusters, checking payments against confirmed transactions.

use h402::facilitator::BoxFuture;
use h402::handler::{HandlerError, NamespaceHandler};
use h402::namespace::Namespace;
use h402::proto::{
    PaymentKind, PaymentPayload, PaymentRequirements, PaymentVerificationError, PayloadVariant,
    SettleResponse, SolanaPayload, VerifyResponse,
};
use solana_signature::Signature;
#[cfg(feature = "telemetry")]
use tracing_core::Level;

use crate::error::SolanaError;
use crate::rpc::SolanaRpc;
use crate::verify::{assert_payment, parse_signature, wire_transaction_signature};

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

/// [`NamespaceHandler`] for one Solana cluster (`"mainnet"`, `"devnet"`).
///
/// Settlement only re-reads the confirmed transaction, so it has no replay
/// protection: the same signature settles every time it is presented. A
/// resource server that must not accept one transfer twice has to record the
/// settled signatures it has already honored.
#[derive(Debug)]
pub struct SolanaHandler<R> {
    network_id: String,
    rpc: R,
}

impl<R> SolanaHandler<R> {
    /// Creates a handler for `network_id` reading through `rpc`.
    pub fn new(network_id: impl Into<String>, rpc: R) -> Self {
        Self {
            network_id: network_id.into(),
            rpc,
        }
    }
}

struct Verified {
    signature: Signature,
    payer: Option<String>,
    kind: PaymentKind,
}

fn solana_payload(payload: &PaymentPayload) -> Result<&SolanaPayload, PaymentVerificationError> {
    match &payload.payload {
        PayloadVariant::Solana(solana) => Ok(solana),
        PayloadVariant::Evm(_) | PayloadVariant::Arkade(_) => {
            Err(PaymentVerificationError::NamespaceMismatch)
        }
    }
}

impl<R: SolanaRpc> SolanaHandler<R> {
    async fn verify_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<Verified, SolanaError> {
        let solana = solana_payload(payload)?;
        let signature = match solana {
            SolanaPayload::NativeTransfer(proof)
            | SolanaPayload::TokenTransfer(proof)
            | SolanaPayload::SignAndSendTransaction(proof) => {
                parse_signature(&proof.transaction_signature)?
            }
            SolanaPayload::SignTransaction(signed) => {
                wire_transaction_signature(&signed.transaction.0)?
            }
        };
        let tx_fut = self.rpc.get_confirmed_transaction(&signature);
        let tx = traced!(
            tx_fut,
            tracing::info_span!("get_transaction",
                signature = %signature,
                network = %self.network_id,
                otel.kind = "client",
            )
        )?
        .ok_or_else(|| PaymentVerificationError::TransactionNotFound(signature.to_string()))?;
        assert_payment(&tx, requirements)?;
        Ok(Verified {
            signature,
            payer: tx.fee_payer().map(str::to_owned),
            kind: payload.payload.kind(),
        })
    }
}

impl<R: SolanaRpc> NamespaceHandler for SolanaHandler<R> {
    fn namespace(&self) -> Namespace {
        Namespace::Solana
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
            match self.verify_inner(payload, requirements).await {
                Ok(verified) => {
                    let tx_hash = (verified.kind == PaymentKind::Transaction)
                        .then(|| verified.signature.to_string());
                    VerifyResponse::valid(verified.payer, verified.kind, tx_hash)
                }
                Err(e) => HandlerError::from(e).into_verify_response(None),
            }
        })
    }

    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, SettleResponse> {
        Box::pin(async move {
            match self.verify_inner(payload, requirements).await {
                Ok(verified) => {
                    #[cfg(feature = "telemetry")]
                    tracing::event!(Level::INFO,
                        status = "ok",
                        tx = %verified.signature,
                        "solana payment confirmed"
                    );
                    SettleResponse::Success {
                        transaction: verified.signature.to_string(),
                        namespace: Some(Namespace::Solana),
                        payer: verified.payer,
                    }
                }
                Err(e) => HandlerError::from(e).into_settle_response(Namespace::Solana, None),
            }
        })
    }
}
