//! Balance-delta checks for Solana payments.
//!
//! These functions take an already fetched [`ConfirmedTransaction`] and do no
//! I/O. The handler fetches, these decide.

use alloy_primitives::U256;
use h402::proto::{Base58Signature, ErrorReason, PaymentRequirements, PaymentVerificationError};
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

use crate::rpc::{ConfirmedTransaction, TokenBalance};

/// Parses a payload signature.
///
/// # Errors
///
/// Returns `invalid_solana_signature` if the text is not a 64-byte base58 signature.
pub fn parse_signature(signature: &Base58Signature) -> Result<Signature, PaymentVerificationError> {
    signature.as_str().parse::<Signature>().map_err(|e| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidSolanaSignature,
            format!("invalid signature: {e}"),
        )
    })
}

/// Extracts the identifying (first) signature of a bincode wire transaction.
///
/// # Errors
///
/// Returns `invalid_solana_signature` if the bytes are not a transaction or
/// carry no signature.
pub fn wire_transaction_signature(bytes: &[u8]) -> Result<Signature, PaymentVerificationError> {
    let transaction = bincode::deserialize::<VersionedTransaction>(bytes).map_err(|e| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidSolanaSignature,
            format!("invalid wire transaction: {e}"),
        )
    })?;
    transaction.signatures.first().copied().ok_or_else(|| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidSolanaSignature,
            "wire transaction is not signed",
        )
    })
}

/// Fails with `invalid_transaction_state` if the transaction did not execute.
///
/// # Errors
///
/// Returns [`PaymentVerificationError::TransactionState`] carrying the execution error.
pub fn assert_executed(tx: &ConfirmedTransaction) -> Result<(), PaymentVerificationError> {
    match &tx.err {
        Some(err) => Err(PaymentVerificationError::TransactionState(format!(
            "transaction failed: {err}"
        ))),
        None => Ok(()),
    }
}

/// Lamports gained by `pay_to`, or `None` if it is not part of the transaction.
#[must_use]
pub fn native_received(tx: &ConfirmedTransaction, pay_to: &str) -> Option<u64> {
    let index = tx.account_keys.iter().position(|key| key == pay_to)?;
    let pre = tx.pre_balances.get(index).copied().unwrap_or_default();
    let post = tx.post_balances.get(index).copied().unwrap_or_default();
    Some(post.saturating_sub(pre))
}

fn is_token_program(program_id: Option<&str>) -> bool {
    program_id.is_some_and(|id| {
        id == spl_token::id().to_string() || id == spl_token_2022::id().to_string()
    })
}

fn counts_for(balance: &TokenBalance, pay_to: &str, mint: &str) -> bool {
    balance.owner.as_deref() == Some(pay_to)
        && balance.mint == mint
        && is_token_program(balance.program_id.as_deref())
}

/// Tokens of `mint` gained across every account owned by `pay_to`.
///
/// Returns `None` if `pay_to` owns no account of that mint in the transaction.
#[must_use]
pub fn token_received(tx: &ConfirmedTransaction, pay_to: &str, mint: &str) -> Option<U256> {
    let mut matched = false;
    let mut total = U256::ZERO;
    for post in tx
        .post_token_balances
        .iter()
        .filter(|balance| counts_for(balance, pay_to, mint))
    {
        matched = true;
        let pre = tx
            .pre_token_balances
            .iter()
            .find(|pre| pre.account_index == post.account_index && pre.mint == post.mint)
            .map_or(0, |pre| pre.amount);
        total += U256::from(post.amount.saturating_sub(pre));
    }
    matched.then_some(total)
}

/// Checks that the confirmed transaction pays the requirements.
///
/// Native SOL is expected when the requirements carry no token address.
///
/// # Errors
///
/// Returns `invalid_transaction_state` for a failed transaction,
/// `invalid_solana_recipient_mismatch` if the recipient is not touched, and
/// `invalid_solana_transaction_value` if it receives less than required.
pub fn assert_payment(
    tx: &ConfirmedTransaction,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    assert_executed(tx)?;
    let pay_to = requirements.pay_to_address.as_str();
    let received = match requirements.token() {
        None => native_received(tx, pay_to).map(U256::from),
        Some(mint) => token_received(tx, pay_to, mint),
    }
    .ok_or_else(|| {
        PaymentVerificationError::rejected(
            ErrorReason::InvalidSolanaRecipientMismatch,
            format!("transaction does not pay {pay_to}"),
        )
    })?;
    let required = requirements.amount_required.0;
    if received < required {
        return Err(PaymentVerificationError::rejected(
            ErrorReason::InvalidSolanaTransactionValue,
            format!("received {received}, required {required}"),
        ));
    }
    Ok(())
}
