//! On-chain settlement for the EVM namespace.
//!
//! `authorization` payloads are broadcast by the facilitator as a
//! `transferWithAuthorization` call paid from its own key. `signedTransaction`
//! payloads are broadcast verbatim. Both wait for one confirmation.

use alloy_primitives::{Bytes, TxHash};
use alloy_rpc_types_eth::TransactionReceipt;
#[cfg(feature = "telemetry")]
use tracing_core::Level;

use crate::error::EvmError;
use crate::provider::{SettlementProvider, FacilitatorCall};
use crate::verify::AuthorizationCall;

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

fn receipt_outcome(receipt: &TransactionReceipt, _what: &str) -> Result<TxHash, EvmError> {
    if receipt.status() {
        #[cfg(feature = "telemetry")]
        tracing::event!(Level::INFO,
            status = "ok",
            tx = %receipt.transaction_hash,
            "{} succeeded", _what
        );
        Ok(receipt.transaction_hash)
    } else {
        #[cfg(feature = "telemetry")]
        tracing::event!(
            Level::WARN,
            status = "failed",
            tx = %receipt.transaction_hash,
            "{} failed", _what
        );
        Err(EvmError::TransactionReverted(receipt.transaction_hash))
    }
}

/// Broadcasts a verified `transferWithAuthorization` call.
///
/// # Errors
///
/// Returns [`EvmError`] if submission fails, the receipt does not arrive in
/// time, or the transaction reverts.
pub async fn settle_authorization<P>(
    provider: &P,
    authorization: &AuthorizationCall,
) -> Result<TxHash, EvmError>
where
    P: SettlementProvider,
    EvmError: From<P::Error>,
{
    let call = &authorization.call;
    let tx_fut = provider.send_transaction(FacilitatorCall {
        to: authorization.token,
        calldata: authorization.calldata(),
        confirmations: 1,
    });
    let receipt = traced!(
        tx_fut,
        tracing::info_span!("call_transferWithAuthorization",
            from = %call.from,
            to = %call.to,
            value = %call.value,
            valid_after = %call.validAfter,
            valid_before = %call.validBefore,
            nonce = %call.nonce,
            token_contract = %authorization.token,
            otel.kind = "client",
        )
    )?;
    receipt_outcome(&receipt, "transferWithAuthorization")
}

/// Broadcasts a verified client-signed transaction.
///
/// # Errors
///
/// Returns [`EvmError`] if submission fails, the receipt does not arrive in
/// time, or the transaction reverts.
pub async fn settle_signed_transaction<P>(provider: &P, raw: &Bytes) -> Result<TxHash, EvmError>
where
    P: SettlementProvider,
    EvmError: From<P::Error>,
{
    let tx_fut = provider.send_raw_transaction(raw.clone(), 1);
    let receipt = traced!(
        tx_fut,
        tracing::info_span!("send_raw_transaction", otel.kind = "client")
    )?;
    receipt_outcome(&receipt, "raw transaction")
}
