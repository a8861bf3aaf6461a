//! Read access to confirmed Solana transactions.
//!
//! [`SolanaRpc`] is the seam between verification and the network. The
//! production implementation wraps the nonblocking [`RpcClient`]; tests swap
//! in canned transactions.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;

use solana_client::client_error::ClientErrorKind;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_signature::Signature;
use solana_transaction_status_client_types::option_serializer::OptionSerializer;
use solana_transaction_status_client_types::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionEncoding, UiTransactionTokenBalance,
};

use crate::error::SolanaError;

/// An SPL token balance of one account, before or after a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalance {
    /// Index into [`ConfirmedTransaction::account_keys`].
    pub account_index: u8,
    /// Mint address.
    pub mint: String,
    /// Owner of the token account.
    pub owner: Option<String>,
    /// Token program that holds the account.
    pub program_id: Option<String>,
    /// Raw amount in the mint's smallest unit.
    pub amount: u64,
}

/// The parts of a confirmed transaction that payment verification reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    /// Static keys followed by loaded writable and readonly addresses.
    /// The first key is the fee payer.
    pub account_keys: Vec<String>,
    /// Lamports per account before execution.
    pub pre_balances: Vec<u64>,
    /// Lamports per account after execution.
    pub post_balances: Vec<u64>,
    /// Token balances before execution.
    pub pre_token_balances: Vec<TokenBalance>,
    /// Token balances after execution.
    pub post_token_balances: Vec<TokenBalance>,
    /// Execution error, if the transaction failed.
    pub err: Option<String>,
}

impl ConfirmedTransaction {
    /// The fee payer.
    #[must_use]
    pub fn fee_payer(&self) -> Option<&str> {
        self.account_keys.first().map(String::as_str)
    }
}

/// Read-only Solana RPC operations used by verification.
pub trait SolanaRpc: Send + Sync {
    /// Fetches a transaction at `confirmed` commitment.
    ///
    /// Returns `Ok(None)` when the node does not know the signature.
    fn get_confirmed_transaction(
        &self,
        signature: &Signature,
    ) -> impl Future<Output = Result<Option<ConfirmedTransaction>, SolanaError>> + Send;
}

/// [`SolanaRpc`] backed by a nonblocking [`RpcClient`].
#[derive(Clone)]
pub struct SolanaChainProvider {
    rpc_client: Arc<RpcClient>,
}

impl Debug for SolanaChainProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolanaChainProvider")
            .field("rpc_url", &self.rpc_client.url())
            .finish()
    }
}

impl SolanaChainProvider {
    /// Connects to `rpc_url` at `confirmed` commitment.
    #[must_use]
    pub fn new(rpc_url: String) -> Self {
        let rpc_client = RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed());
        Self {
            rpc_client: Arc::new(rpc_client),
        }
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn from_client(rpc_client: Arc<RpcClient>) -> Self {
        Self { rpc_client }
    }
}

impl SolanaRpc for SolanaChainProvider {
    async fn get_confirmed_transaction(
        &self,
        signature: &Signature,
    ) -> Result<Option<ConfirmedTransaction>, SolanaError> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        match self
            .rpc_client
            .get_transaction_with_config(signature, config)
            .await
        {
            Ok(tx) => confirmed_transaction(tx).map(Some),
            // The node answers `null` for unknown signatures, which fails to deserialize.
            Err(e) if matches!(*e.kind, ClientErrorKind::SerdeJson(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn option<T>(value: OptionSerializer<T>) -> Option<T> {
    match value {
        OptionSerializer::Some(value) => Some(value),
        OptionSerializer::None | OptionSerializer::Skip => None,
    }
}

fn token_balances(
    balances: OptionSerializer<Vec<UiTransactionTokenBalance>>,
) -> Result<Vec<TokenBalance>, SolanaError> {
    option(balances)
        .unwrap_or_default()
        .into_iter()
        .map(|balance| {
            let amount = balance
                .ui_token_amount
                .amount
                .parse::<u64>()
                .map_err(|e| SolanaError::Response(format!("token amount: {e}")))?;
            Ok(TokenBalance {
                account_index: balance.account_index,
                mint: balance.mint,
                owner: option(balance.owner),
                program_id: option(balance.program_id),
                amount,
            })
        })
        .collect()
}

fn confirmed_transaction(
    tx: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<ConfirmedTransaction, SolanaError> {
    let meta = tx
        .transaction
        .meta
        .ok_or_else(|| SolanaError::Response("transaction has no status meta".into()))?;
    let mut account_keys = match tx.transaction.transaction {
        EncodedTransaction::Json(ui) => match ui.message {
            UiMessage::Raw(raw) => raw.account_keys,
            UiMessage::Parsed(parsed) => parsed
                .account_keys
                .into_iter()
                .map(|account| account.pubkey)
                .collect(),
        },
        _ => {
            return Err(SolanaError::Response(
                "transaction was not returned as JSON".into(),
            ));
        }
    };
    if let Some(loaded) = option(meta.loaded_addresses) {
        account_keys.extend(loaded.writable);
        account_keys.extend(loaded.readonly);
    }
    Ok(ConfirmedTransaction {
        account_keys,
        pre_balances: meta.pre_balances,
        post_balances: meta.post_balances,
        pre_token_balances: token_balances(meta.pre_token_balances)?,
        post_token_balances: token_balances(meta.post_token_balances)?,
        err: meta.err.map(|e| format!("{e:?}")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_payer_is_the_first_key() {
        let tx = ConfirmedTransaction {
            account_keys: vec!["payer".into(), "recipient".into()],
            ..ConfirmedTransaction::default()
        };
        assert_eq!(tx.fee_payer(), Some("payer"));
        assert_eq!(ConfirmedTransaction::default().fee_payer(), None);
    }

    #[test]
    fn skipped_fields_read_as_none() {
        assert_eq!(option::<u8>(OptionSerializer::Skip), None);
        assert_eq!(option(OptionSerializer::Some(3)), Some(3));
    }
}
