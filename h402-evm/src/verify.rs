//! Payment verification logic for the EVM namespace.
//!
//! Contains the precondition checks (time window, value, recipient, balance,
//! gas, signatures) and the three composite checks, one per payload type.
//! Settlement re-runs the same checks before broadcasting anything.

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{Transaction as _, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, B256, Bytes, Log, Signature, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{BlockNumberOrTag, TransactionReceipt, TransactionRequest};
use alloy_sol_types::{SolCall, SolEvent};
use h402::proto::{
    ErrorReason, EvmAuthorizationPayload, EvmSentTransaction, EvmSignedTransaction,
    PaymentRequirements, PaymentVerificationError,
};
use h402::timestamp::UnixTimestamp;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::contract::{IEIP3009, IERC20};
use crate::error::EvmError;

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

/// Assumed block time.
pub const BLOCK_TIME_SECS: u64 = 2;
/// Blocks an authorization must stay valid for after verification.
pub const SAFETY_BLOCKS: u64 = 3;
/// Gas units the fallback cap allows at the current gas price.
const FALLBACK_GAS_UNITS: u128 = 100_000;

/// Validates that the current time is within the `validAfter` and `validBefore` bounds.
///
/// `validBefore` must leave at least `BLOCK_TIME_SECS * SAFETY_BLOCKS` seconds
/// for the settlement transaction to land.
///
/// # Errors
///
/// Returns a rejection with `invalid_evm_authorization_valid_before` or
/// `invalid_evm_authorization_valid_after`.
pub fn assert_time(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
) -> Result<(), PaymentVerificationError> {
    let now = UnixTimestamp::now();
    if valid_before < now + BLOCK_TIME_SECS * SAFETY_BLOCKS {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmAuthorizationValidBefore,
            format!("authorization expires at {valid_before}, too close to now ({now})"),
        ));
    }
    if valid_after > now {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmAuthorizationValidAfter,
            format!("authorization is not valid until {valid_after}"),
        ));
    }
    Ok(())
}

/// Verifies that `sent` covers `required`.
///
/// # Errors
///
/// Returns a rejection carrying `reason` if `sent < required`.
pub fn assert_enough_value(
    sent: U256,
    required: U256,
    reason: ErrorReason,
) -> Result<(), PaymentVerificationError> {
    if sent < required {
        Err(PaymentVerificationError::rejected(
            reason,
            format!("amount {sent} is below the required {required}"),
        ))
    } else {
        Ok(())
    }
}

/// Parses an address taken from payment requirements.
///
/// Parsing is case-insensitive; checksums are not enforced.
///
/// # Errors
///
/// Returns [`PaymentVerificationError::InvalidRequirements`].
pub fn parse_address(value: &str, field: &str) -> Result<Address, PaymentVerificationError> {
    value.parse::<Address>().map_err(|e| {
        PaymentVerificationError::InvalidRequirements(format!("{field} {value:?} is not an EVM address: {e}"))
    })
}

/// Recovers the address that signed `resource` as an EIP-191 personal message.
///
/// # Errors
///
/// Returns a rejection with `reason` if the signature is malformed or unrecoverable.
pub fn recover_resource_signer(
    signed_message: &[u8],
    resource: &str,
    reason: ErrorReason,
) -> Result<Address, PaymentVerificationError> {
    Signature::from_raw(signed_message)
        .and_then(|signature| signature.recover_address_from_msg(resource.as_bytes()))
        .map_err(|e| {
            PaymentVerificationError::rejected(reason, format!("invalid resource signature: {e}"))
        })
}

/// Checks that `signed_message` is `expected`'s signature over `resource`.
///
/// # Errors
///
/// Returns `invalid_evm_transaction_signature` on any mismatch.
pub fn assert_resource_signer(
    signed_message: &[u8],
    resource: &str,
    expected: Address,
) -> Result<(), PaymentVerificationError> {
    let reason = ErrorReason::InvalidEvmTransactionSignature;
    let signer = recover_resource_signer(signed_message, resource, reason)?;
    if signer == expected {
        Ok(())
    } else {
        Err(PaymentVerificationError::rejected(
            reason,
            format!("resource signed by {signer}, transaction sent by {expected}"),
        ))
    }
}

/// What a transaction transfers, as decoded from its fields or calldata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferIntent {
    /// Receiving address.
    pub recipient: Address,
    /// Transferred amount in smallest units.
    pub amount: U256,
}

/// Decodes the transfer a transaction performs.
///
/// Native transfers read `to`/`value`. Token transfers must call the token
/// contract with ERC-20 `transfer(to, amount)` calldata.
///
/// # Errors
///
/// Returns a recipient mismatch if the transaction targets the wrong contract,
/// or [`PaymentVerificationError::InvalidPayload`] for undecodable calldata.
pub fn decode_transfer(
    to: Option<Address>,
    value: U256,
    input: &[u8],
    token: Option<Address>,
) -> Result<TransferIntent, PaymentVerificationError> {
    match token {
        Some(token) => {
            if to != Some(token) {
                return Err(PaymentVerificationError::rejected(
                    ErrorReason::InvalidEvmTransactionRecipientMismatch,
                    format!("transaction calls {to:?}, not token {token}"),
                ));
            }
            let call = IERC20::transferCall::abi_decode(input).map_err(|e| {
                PaymentVerificationError::InvalidPayload(format!("not an ERC-20 transfer: {e}"))
            })?;
            Ok(TransferIntent {
                recipient: call.to,
                amount: call.amount,
            })
        }
        None => {
            let recipient = to.ok_or_else(|| {
                PaymentVerificationError::rejected(
                    ErrorReason::InvalidEvmTransactionRecipientMismatch,
                    "contract creation is not a payment",
                )
            })?;
            Ok(TransferIntent {
                recipient,
                amount: value,
            })
        }
    }
}

/// Checks a decoded transfer against the recipient and amount required.
///
/// # Errors
///
/// Returns `invalid_evm_transaction_recipient_mismatch` or
/// `invalid_evm_transaction_value`.
pub fn assert_transfer(
    intent: TransferIntent,
    pay_to: Address,
    required: U256,
) -> Result<(), PaymentVerificationError> {
    if intent.recipient != pay_to {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmTransactionRecipientMismatch,
            format!("transfer pays {}, expected {pay_to}", intent.recipient),
        ));
    }
    assert_enough_value(
        intent.amount,
        required,
        ErrorReason::InvalidEvmTransactionValue,
    )
}

/// Checks that an executed token transfer emitted the matching `Transfer` log.
///
/// # Errors
///
/// Returns `invalid_evm_transaction_transfer_event` if no log from `token`
/// moves at least `required` from `from` to `pay_to`.
pub fn assert_transfer_log<'a>(
    logs: impl IntoIterator<Item = &'a Log>,
    token: Address,
    from: Address,
    pay_to: Address,
    required: U256,
) -> Result<(), PaymentVerificationError> {
    let found = logs
        .into_iter()
        .filter(|log| log.address == token)
        .filter_map(|log| IERC20::Transfer::decode_log_data(&log.data).ok())
        .any(|event| event.from == from && event.to == pay_to && event.value >= required);
    if found {
        Ok(())
    } else {
        Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmTransactionTransferEvent,
            format!("no Transfer event of {required} from {from} to {pay_to} on {token}"),
        ))
    }
}

/// A decoded client-signed transaction.
#[derive(Debug, Clone)]
pub struct SignedEnvelope {
    /// The EIP-2718 envelope.
    pub envelope: TxEnvelope,
    /// Recovered sender.
    pub sender: Address,
}

/// Decodes an EIP-2718 transaction and recovers its sender.
///
/// # Errors
///
/// Returns [`PaymentVerificationError::InvalidPayload`] for undecodable bytes
/// and `invalid_evm_transaction_signature` if the sender cannot be recovered.
pub fn parse_signed_transaction(raw: &[u8]) -> Result<SignedEnvelope, PaymentVerificationError> {
    let envelope = TxEnvelope::decode_2718(&mut &raw[..]).map_err(|e| {
        PaymentVerificationError::InvalidPayload(format!("invalid signed transaction: {e}"))
    })?;
    let sender = envelope.recover_signer().map_err(|e| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmTransactionSignature,
            format!("cannot recover transaction sender: {e}"),
        )
    })?;
    Ok(SignedEnvelope { envelope, sender })
}

/// Gas cap derived from the latest block: 30% of its gas limit, plus 25%.
#[must_use]
pub fn block_gas_cap(block_gas_limit: u64) -> u128 {
    u128::from(block_gas_limit) * 30 / 100 * 125 / 100
}

/// Gas cap used when block data is unavailable.
#[must_use]
pub const fn price_gas_cap(gas_price: u128) -> u128 {
    gas_price.saturating_mul(FALLBACK_GAS_UNITS).saturating_mul(125) / 100
}

/// Fetches the current gas cap for a settlement transaction.
///
/// # Errors
///
/// Returns [`EvmError::Transport`] if neither the block nor the gas price can be read.
pub async fn gas_cap<P: Provider>(provider: &P) -> Result<u128, EvmError> {
    let block_fut = provider.get_block_by_number(BlockNumberOrTag::Latest).into_future();
    let block = traced!(
        block_fut,
        tracing::info_span!("get_latest_block", otel.kind = "client")
    );
    if let Ok(Some(block)) = block {
        return Ok(block_gas_cap(block.header.gas_limit));
    }
    let price_fut = provider.get_gas_price().into_future();
    let gas_price = traced!(
        price_fut,
        tracing::info_span!("get_gas_price", otel.kind = "client")
    )?;
    Ok(price_gas_cap(gas_price))
}

/// Checks that the payer holds at least `required` of the asset.
///
/// `token == None` checks the native balance.
///
/// # Errors
///
/// Returns [`PaymentVerificationError::InsufficientFunds`] or an RPC error.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(
    owner = %owner,
    required = %required,
)))]
pub async fn assert_enough_balance<P: Provider>(
    provider: &P,
    token: Option<Address>,
    owner: Address,
    required: U256,
) -> Result<(), EvmError> {
    let balance = match token {
        Some(token) => {
            let contract = IERC20::new(token, provider);
            let balance_of = contract.balanceOf(owner);
            let balance_fut = balance_of.call().into_future();
            traced!(
                balance_fut,
                tracing::info_span!(
                    "fetch_token_balance",
                    token_contract = %token,
                    owner = %owner,
                    otel.kind = "client"
                )
            )?
        }
        None => {
            let balance_fut = provider.get_balance(owner).into_future();
            traced!(
                balance_fut,
                tracing::info_span!("fetch_native_balance", owner = %owner, otel.kind = "client")
            )?
        }
    };
    if balance < required {
        Err(PaymentVerificationError::InsufficientFunds.into())
    } else {
        Ok(())
    }
}

/// A verified `transferWithAuthorization` call, ready to broadcast.
#[derive(Debug, Clone)]
pub struct AuthorizationCall {
    /// Token contract.
    pub token: Address,
    /// Decoded call with split `(v, r, s)` signature.
    pub call: IEIP3009::transferWithAuthorizationCall,
}

impl AuthorizationCall {
    /// Builds the call from a decoded payload.
    ///
    /// # Errors
    ///
    /// Returns `invalid_evm_authorization_signature` for a malformed signature.
    pub fn new(
        token: Address,
        payload: &EvmAuthorizationPayload,
    ) -> Result<Self, PaymentVerificationError> {
        let signature = Signature::from_raw(&payload.signature).map_err(|e| {
            PaymentVerificationError::rejected(
                ErrorReason::InvalidEvmAuthorizationSignature,
                format!("malformed signature: {e}"),
            )
        })?;
        let authorization = &payload.authorization;
        Ok(Self {
            token,
            call: IEIP3009::transferWithAuthorizationCall {
                from: authorization.from,
                to: authorization.to,
                value: authorization.value.0,
                validAfter: U256::from(authorization.valid_after.as_secs()),
                validBefore: U256::from(authorization.valid_before.as_secs()),
                nonce: authorization.nonce,
                v: 27 + u8::from(signature.v()),
                r: B256::from(signature.r()),
                s: B256::from(signature.s()),
            },
        })
    }

    /// ABI-encoded calldata.
    #[must_use]
    pub fn calldata(&self) -> Bytes {
        Bytes::from(self.call.abi_encode())
    }
}

/// Runs every check an EIP-3009 authorization must pass.
///
/// `gas_payer` is the facilitator address the settlement would be sent from;
/// the gas estimate is simulated from it.
///
/// # Errors
///
/// Returns [`EvmError`] for the first failing check.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(
    from = %payload.authorization.from,
    value = %payload.authorization.value,
)))]
pub async fn assert_valid_authorization<P: Provider>(
    provider: &P,
    gas_payer: Address,
    payload: &EvmAuthorizationPayload,
    requirements: &PaymentRequirements,
) -> Result<AuthorizationCall, EvmError> {
    let authorization = &payload.authorization;
    assert_time(authorization.valid_after, authorization.valid_before)?;
    assert_enough_value(
        authorization.value.0,
        requirements.amount_required.0,
        ErrorReason::InvalidEvmAuthorizationValue,
    )?;
    let pay_to = parse_address(&requirements.pay_to_address, "payToAddress")?;
    if authorization.to != pay_to {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmAuthorizationRecipientMismatch,
            format!("authorization pays {}, expected {pay_to}", authorization.to),
        )
        .into());
    }
    let token = requirements
        .token()
        .map(|token| parse_address(token, "tokenAddress"))
        .transpose()?
        .ok_or_else(|| {
            PaymentVerificationError::InvalidRequirements(
                "authorization payments require a token contract".into(),
            )
        })?;
    assert_enough_balance(provider, Some(token), authorization.from, authorization.value.0)
        .await?;

    let call = AuthorizationCall::new(token, payload)?;

    let txr = TransactionRequest::default()
        .with_from(gas_payer)
        .with_to(token)
        .with_input(call.calldata());
    let estimate_fut = provider.estimate_gas(txr).into_future();
    let estimate = match traced!(
        estimate_fut,
        tracing::info_span!("estimate_transferWithAuthorization", otel.kind = "client")
    ) {
        Ok(gas) => Some(gas),
        Err(e) if e.as_error_resp().is_some() => None,
        Err(e) => return Err(e.into()),
    };
    if let Some(gas) = estimate {
        let cap = gas_cap(provider).await?;
        if u128::from(gas) > cap {
            return Err(PaymentVerificationError::rejected(
                ErrorReason::InvalidEvmAuthorizationGasLimit,
                format!("estimated gas {gas} exceeds cap {cap}"),
            )
            .into());
        }
    }

    let contract = IEIP3009::new(token, provider);
    let c = &call.call;
    let verify_call = contract.verifyTransferAuthorization(
        c.from,
        c.to,
        c.value,
        c.validAfter,
        c.validBefore,
        c.nonce,
        c.v,
        c.r,
        c.s,
    );
    let verify_fut = verify_call.call().into_future();
    let authorized = match traced!(
        verify_fut,
        tracing::info_span!("call_verifyTransferAuthorization",
            from = %c.from,
            to = %c.to,
            value = %c.value,
            nonce = %c.nonce,
            token_contract = %token,
            otel.kind = "client",
        )
    ) {
        Ok(authorized) => authorized,
        Err(alloy_contract::Error::TransportError(e)) if e.as_error_resp().is_some() => false,
        Err(e) => return Err(e.into()),
    };
    if !authorized {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmAuthorizationSignature,
            "token contract rejected the authorization signature",
        )
        .into());
    }
    if estimate.is_none() {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidEvmAuthorizationGasLimit,
            "transferWithAuthorization simulation reverted",
        )
        .into());
    }
    Ok(call)
}

/// Verifies a signed, not yet broadcast transaction. Returns the sender.
///
/// # Errors
///
/// Returns [`EvmError`] for the first failing check.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err))]
pub async fn verify_signed_transaction<P: Provider>(
    provider: &P,
    chain_id: u64,
    payload: &EvmSignedTransaction,
    requirements: &PaymentRequirements,
) -> Result<Address, EvmError> {
    let SignedEnvelope { envelope, sender } =
        parse_signed_transaction(&payload.signed_transaction)?;
    if envelope.chain_id() != Some(chain_id) {
        return Err(PaymentVerificationError::NetworkMismatch.into());
    }
    let pay_to = parse_address(&requirements.pay_to_address, "payToAddress")?;
    let token = requirements
        .token()
        .map(|token| parse_address(token, "tokenAddress"))
        .transpose()?;
    let intent = decode_transfer(envelope.to(), envelope.value(), envelope.input(), token)?;
    assert_transfer(intent, pay_to, requirements.amount_required.0)?;
    assert_enough_balance(provider, token, sender, intent.amount).await?;
    assert_resource_signer(&payload.signed_message, &requirements.resource, sender)?;
    Ok(sender)
}

/// Verifies an already broadcast transaction. Returns the sender.
///
/// # Errors
///
/// Returns [`EvmError`] for the first failing check.
#[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(tx = %payload.transaction_hash)))]
pub async fn verify_sent_transaction<P: Provider>(
    provider: &P,
    payload: &EvmSentTransaction,
    requirements: &PaymentRequirements,
) -> Result<Address, EvmError> {
    let hash = payload.transaction_hash;
    let tx_fut = provider.get_transaction_by_hash(hash).into_future();
    let transaction = traced!(
        tx_fut,
        tracing::info_span!("get_transaction", tx = %hash, otel.kind = "client")
    )?
    .ok_or_else(|| PaymentVerificationError::TransactionNotFound(hash.to_string()))?;
    let receipt_fut = provider.get_transaction_receipt(hash).into_future();
    let receipt: TransactionReceipt = traced!(
        receipt_fut,
        tracing::info_span!("get_transaction_receipt", tx = %hash, otel.kind = "client")
    )?
    .ok_or_else(|| PaymentVerificationError::TransactionNotFound(hash.to_string()))?;
    if !receipt.status() {
        return Err(EvmError::TransactionReverted(hash));
    }

    let sender = receipt.from;
    let pay_to = parse_address(&requirements.pay_to_address, "payToAddress")?;
    let token = requirements
        .token()
        .map(|token| parse_address(token, "tokenAddress"))
        .transpose()?;
    let intent = decode_transfer(
        transaction.to(),
        transaction.value(),
        transaction.input(),
        token,
    )?;
    assert_transfer(intent, pay_to, requirements.amount_required.0)?;
    if let Some(token) = token {
        assert_transfer_log(
            receipt.inner.logs().iter().map(|log| &log.inner),
            token,
            sender,
            pay_to,
            requirements.amount_required.0,
        )?;
    }
    assert_resource_signer(&payload.signed_message, &requirements.resource, sender)?;
    Ok(sender)
}

#[cfg(test)]
mod tests {
    use alloy_consensus::{SignableTransaction, TxEip1559};
    use alloy_eips::eip2718::Encodable2718;
    use alloy_primitives::{TxKind, address};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use h402::amount::TokenAmount;
    use h402::namespace::Namespace;
    use h402::proto::{AsPaymentProblem, EvmAuthorization};
    use serde_json::json;

    use super::*;
    use crate::testing::{
        RpcScript, authorization_node, raw, receipt_json, signed_transfer, transaction_json,
        transfer_log,
    };

    const TOKEN: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    const PAY_TO: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");

    const RESOURCE: &str = "https://api.example.com/premium";

    fn reason(error: PaymentVerificationError) -> ErrorReason {
        error.as_payment_problem().reason()
    }

    fn evm_reason(error: EvmError) -> ErrorReason {
        match error {
            EvmError::PaymentVerification(e) => reason(e),
            other => panic!("expected a rejected payment, got {other}"),
        }
    }

    fn token_requirements() -> PaymentRequirements {
        PaymentRequirements::new(
            Namespace::Evm,
            "8453",
            PAY_TO.to_string(),
            TokenAmount::from(1_000),
            RESOURCE,
        )
        .with_token(TOKEN.to_string(), 6)
    }

    fn resource_signature(signer: &PrivateKeySigner) -> Bytes {
        let signature = signer.sign_message_sync(RESOURCE.as_bytes()).unwrap();
        Bytes::from(signature.as_bytes().to_vec())
    }

    #[test]
    fn expiring_authorization_is_rejected() {
        let now = UnixTimestamp::now();
        let err = assert_time(UnixTimestamp::from_secs(0), now + 5).unwrap_err();
        assert_eq!(reason(err), ErrorReason::InvalidEvmAuthorizationValidBefore);
        assert!(assert_time(UnixTimestamp::from_secs(0), now + 60).is_ok());
    }

    #[test]
    fn future_authorization_is_rejected() {
        let now = UnixTimestamp::now();
        let err = assert_time(now + 30, now + 600).unwrap_err();
        assert_eq!(reason(err), ErrorReason::InvalidEvmAuthorizationValidAfter);
    }

    #[test]
    fn underpayment_is_an_insufficient_amount() {
        let err = assert_enough_value(
            U256::from(999),
            U256::from(1000),
            ErrorReason::InvalidEvmAuthorizationValue,
        )
        .unwrap_err();
        assert!(reason(err).is_insufficient_amount());
    }

    #[test]
    fn addresses_compare_case_insensitively() {
        let lower = parse_address("0x209693bc6afc0c5328ba36faf03c514ef312287c", "payTo").unwrap();
        assert_eq!(lower, PAY_TO);
        assert!(parse_address("ark1qq...", "payTo").is_err());
    }

    #[test]
    fn decodes_native_and_erc20_transfers() {
        let native = decode_transfer(Some(PAY_TO), U256::from(5), &[], None).unwrap();
        assert_eq!(native.recipient, PAY_TO);
        assert_eq!(native.amount, U256::from(5));

        let calldata = IERC20::transferCall {
            to: PAY_TO,
            amount: U256::from(1_000_000),
        }
        .abi_encode();
        let token = decode_transfer(Some(TOKEN), U256::ZERO, &calldata, Some(TOKEN)).unwrap();
        assert_eq!(token.recipient, PAY_TO);
        assert_eq!(token.amount, U256::from(1_000_000));

        let wrong_contract = decode_transfer(Some(PAY_TO), U256::ZERO, &calldata, Some(TOKEN));
        assert_eq!(
            reason(wrong_contract.unwrap_err()),
            ErrorReason::InvalidEvmTransactionRecipientMismatch
        );
        let garbage = decode_transfer(Some(TOKEN), U256::ZERO, &[1, 2, 3], Some(TOKEN));
        assert_eq!(reason(garbage.unwrap_err()), ErrorReason::InvalidPayload);
    }

    #[test]
    fn transfer_checks_recipient_then_amount() {
        let intent = TransferIntent {
            recipient: PAY_TO,
            amount: U256::from(10),
        };
        assert!(assert_transfer(intent, PAY_TO, U256::from(10)).is_ok());
        assert_eq!(
            reason(assert_transfer(intent, TOKEN, U256::from(10)).unwrap_err()),
            ErrorReason::InvalidEvmTransactionRecipientMismatch
        );
        let short = assert_transfer(intent, PAY_TO, U256::from(11)).unwrap_err();
        assert!(reason(short).is_insufficient_amount());
    }

    #[test]
    fn transfer_log_must_match_token_parties_and_amount() {
        let from = address!("0x857b06519E91e3A54538791bDbb0E22373e36b66");
        let logs = [
            transfer_log(PAY_TO, from, PAY_TO, 1_000),
            transfer_log(TOKEN, from, PAY_TO, 500),
        ];
        assert!(assert_transfer_log(&logs, TOKEN, from, PAY_TO, U256::from(500)).is_ok());
        let err = assert_transfer_log(&logs, TOKEN, from, PAY_TO, U256::from(600)).unwrap_err();
        assert_eq!(reason(err), ErrorReason::InvalidEvmTransactionTransferEvent);
        let err = assert_transfer_log(&logs, TOKEN, PAY_TO, PAY_TO, U256::from(1)).unwrap_err();
        assert_eq!(reason(err), ErrorReason::InvalidEvmTransactionTransferEvent);
    }

    #[test]
    fn resource_signature_recovers_the_sender() {
        let signer = PrivateKeySigner::random();
        let resource = "https://api.example.com/premium";
        let signature = signer.sign_message_sync(resource.as_bytes()).unwrap();
        let bytes = signature.as_bytes();
        assert!(assert_resource_signer(&bytes, resource, signer.address()).is_ok());
        let other = assert_resource_signer(&bytes, "https://api.example.com/other", signer.address());
        assert_eq!(
            reason(other.unwrap_err()),
            ErrorReason::InvalidEvmTransactionSignature
        );
        let malformed = assert_resource_signer(&[0u8; 3], resource, signer.address());
        assert!(malformed.is_err());
    }

    #[test]
    fn parses_signed_eip1559_transaction() {
        let signer = PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).unwrap();
        let tx = TxEip1559 {
            chain_id: 8453,
            nonce: 7,
            gas_limit: 60_000,
            max_fee_per_gas: 1_000_000_000,
            max_priority_fee_per_gas: 1_000_000,
            to: TxKind::Call(TOKEN),
            value: U256::ZERO,
            input: IERC20::transferCall {
                to: PAY_TO,
                amount: U256::from(42),
            }
            .abi_encode()
            .into(),
            ..Default::default()
        };
        let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
        let envelope: TxEnvelope = tx.into_signed(signature).into();
        let raw = envelope.encoded_2718();

        let parsed = parse_signed_transaction(&raw).unwrap();
        assert_eq!(parsed.sender, signer.address());
        assert_eq!(parsed.envelope.chain_id(), Some(8453));
        let intent = decode_transfer(
            parsed.envelope.to(),
            parsed.envelope.value(),
            parsed.envelope.input(),
            Some(TOKEN),
        )
        .unwrap();
        assert_eq!(intent.amount, U256::from(42));

        assert!(parse_signed_transaction(&raw[..raw.len() - 4]).is_err());
    }

    #[test]
    fn authorization_call_splits_signature() {
        let signer = PrivateKeySigner::random();
        let signature = signer.sign_hash_sync(&B256::repeat_byte(9)).unwrap();
        let payload = EvmAuthorizationPayload {
            signature: Bytes::from(signature.as_bytes().to_vec()),
            authorization: EvmAuthorization {
                from: signer.address(),
                to: PAY_TO,
                value: U256::from(1_000).into(),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before: UnixTimestamp::from_secs(4_000_000_000),
                nonce: B256::repeat_byte(1),
            },
        };
        let call = AuthorizationCall::new(TOKEN, &payload).unwrap();
        assert!(call.call.v == 27 || call.call.v == 28);
        assert_eq!(call.call.r, B256::from(signature.r()));
        let decoded =
            IEIP3009::transferWithAuthorizationCall::abi_decode(&call.calldata()).unwrap();
        assert_eq!(decoded.value, U256::from(1_000));
        assert_eq!(decoded.validBefore, U256::from(4_000_000_000u64));

        let mut bad = payload;
        bad.signature = Bytes::from(vec![0u8; 10]);
        assert_eq!(
            reason(AuthorizationCall::new(TOKEN, &bad).unwrap_err()),
            ErrorReason::InvalidEvmAuthorizationSignature
        );
    }

    #[test]
    fn gas_caps() {
        assert_eq!(block_gas_cap(30_000_000), 11_250_000);
        assert_eq!(price_gas_cap(1_000_000_000), 125_000_000_000_000);
        assert_eq!(price_gas_cap(u128::MAX), u128::MAX / 100);
    }

    fn signed_authorization(signer: &PrivateKeySigner) -> EvmAuthorizationPayload {
        let signature = signer.sign_hash_sync(&B256::repeat_byte(9)).unwrap();
        EvmAuthorizationPayload {
            signature: Bytes::from(signature.as_bytes().to_vec()),
            authorization: EvmAuthorization {
                from: signer.address(),
                to: PAY_TO,
                value: U256::from(1_000).into(),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before: UnixTimestamp::now() + 600,
                nonce: B256::repeat_byte(1),
            },
        }
    }

    async fn check_authorization(node: RpcScript) -> Result<AuthorizationCall, EvmError> {
        let signer = PrivateKeySigner::random();
        let (_node, provider) = node.serve().await;
        assert_valid_authorization(
            &provider,
            Address::repeat_byte(0xfa),
            &signed_authorization(&signer),
            &token_requirements(),
        )
        .await
    }

    #[tokio::test]
    async fn authorization_passes_every_onchain_check() {
        let call = check_authorization(authorization_node()).await.unwrap();
        assert_eq!(call.token, TOKEN);
        assert_eq!(call.call.to, PAY_TO);
        assert_eq!(call.call.value, U256::from(1_000));
    }

    #[tokio::test]
    async fn authorization_over_the_gas_cap_is_rejected() {
        // Without a block, a 1 wei gas price caps the call at 125_000 gas.
        let node = authorization_node()
            .on("eth_estimateGas", json!("0x1e8480"))
            .on("eth_gasPrice", json!("0x1"));
        let err = check_authorization(node).await.unwrap_err();
        assert_eq!(evm_reason(err), ErrorReason::InvalidEvmAuthorizationGasLimit);
    }

    #[tokio::test]
    async fn authorization_refused_by_the_token_is_rejected() {
        let node = authorization_node()
            .on_call(IEIP3009::verifyTransferAuthorizationCall::SELECTOR, false);
        let err = check_authorization(node).await.unwrap_err();
        assert_eq!(evm_reason(err), ErrorReason::InvalidEvmAuthorizationSignature);
    }

    #[tokio::test]
    async fn authorization_beyond_the_balance_is_insufficient_funds() {
        let node = authorization_node().on_call(IERC20::balanceOfCall::SELECTOR, U256::from(999));
        let err = check_authorization(node).await.unwrap_err();
        assert_eq!(evm_reason(err), ErrorReason::InsufficientFunds);
    }

    #[tokio::test]
    async fn signed_transfer_is_checked_against_chain_and_balance() {
        let signer = PrivateKeySigner::random();
        let payload = EvmSignedTransaction {
            signed_transaction: raw(&signed_transfer(&signer, 8453, TOKEN, PAY_TO, 1_000)),
            signed_message: resource_signature(&signer),
        };
        let (_node, provider) = RpcScript::default()
            .on_call(IERC20::balanceOfCall::SELECTOR, U256::from(1_000))
            .serve()
            .await;

        let sender = verify_signed_transaction(&provider, 8453, &payload, &token_requirements())
            .await
            .unwrap();
        assert_eq!(sender, signer.address());

        let err = verify_signed_transaction(&provider, 1, &payload, &token_requirements())
            .await
            .unwrap_err();
        assert_eq!(evm_reason(err), ErrorReason::InvalidNetwork);
    }

    async fn check_sent_transfer(logged_value: u64, success: bool) -> Result<Address, EvmError> {
        let signer = PrivateKeySigner::random();
        let envelope = signed_transfer(&signer, 8453, TOKEN, PAY_TO, 1_000);
        let hash = *envelope.tx_hash();
        let log = transfer_log(TOKEN, signer.address(), PAY_TO, logged_value);
        let (_node, provider) = RpcScript::default()
            .on(
                "eth_getTransactionByHash",
                transaction_json(envelope, signer.address()),
            )
            .on(
                "eth_getTransactionReceipt",
                receipt_json(hash, signer.address(), TOKEN, success, &[log]),
            )
            .serve()
            .await;
        let payload = EvmSentTransaction {
            transaction_hash: hash,
            signed_message: resource_signature(&signer),
        };
        let sender = verify_sent_transaction(&provider, &payload, &token_requirements()).await?;
        assert_eq!(sender, signer.address());
        Ok(sender)
    }

    #[tokio::test]
    async fn sent_transfer_is_verified_from_receipt_and_log() {
        assert!(check_sent_transfer(1_000, true).await.is_ok());
    }

    #[tokio::test]
    async fn sent_transfer_needs_a_matching_log() {
        let err = check_sent_transfer(500, true).await.unwrap_err();
        assert_eq!(evm_reason(err), ErrorReason::InvalidEvmTransactionTransferEvent);
    }

    #[tokio::test]
    async fn reverted_sent_transfer_is_rejected() {
        let err = check_sent_transfer(1_000, false).await.unwrap_err();
        assert!(matches!(err, EvmError::TransactionReverted(_)));
    }
}
