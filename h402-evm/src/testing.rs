//! A scripted JSON-RPC node and a stub settlement provider.

use std::collections::HashMap;
use std::sync::Mutex;

use alloy_consensus::transaction::Recovered;
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, B256, Bloom, Bytes, Log, LogData, TxHash, TxKind, U256, hex};
use alloy_provider::RootProvider;
use alloy_rpc_types_eth::{Transaction, TransactionReceipt};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolEvent, SolValue};
use alloy_transport::TransportErrorKind;
use serde_json::{Value, json};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use crate::contract::{IEIP3009, IERC20};
use crate::provider::{BroadcastError, FacilitatorCall, SettlementProvider};

/// Results keyed by RPC method, or by `eth_call:<selector>` for contract reads.
///
/// Anything unscripted answers with a JSON-RPC error, like a node rejecting the call.
#[derive(Clone, Debug, Default)]
pub(crate) struct RpcScript {
    results: HashMap<String, Value>,
}

impl RpcScript {
    pub(crate) fn on(mut self, method: &str, result: Value) -> Self {
        self.results.insert(method.to_owned(), result);
        self
    }

    pub(crate) fn on_call<T: SolValue>(self, selector: [u8; 4], output: T) -> Self {
        let key = format!("eth_call:{}", hex::encode_prefixed(selector));
        self.on(&key, json!(Bytes::from(output.abi_encode())))
    }

    /// Starts the node. Keep the server alive for as long as the provider is used.
    pub(crate) async fn serve(self) -> (MockServer, RootProvider) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(self)
            .mount(&server)
            .await;
        let provider = RootProvider::new_http(server.uri().parse().unwrap());
        (server, provider)
    }
}

impl Respond for RpcScript {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let call: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let method = call["method"].as_str().unwrap_or_default();
        let key = if method == "eth_call" {
            let tx = &call["params"][0];
            let input = tx["input"]
                .as_str()
                .or_else(|| tx["data"].as_str())
                .unwrap_or_default();
            format!("eth_call:{}", input.get(..10).unwrap_or(input).to_lowercase())
        } else {
            method.to_owned()
        };
        let body = match self.results.get(&key) {
            Some(result) => json!({"jsonrpc": "2.0", "id": call["id"], "result": result}),
            None => json!({
                "jsonrpc": "2.0",
                "id": call["id"],
                "error": {"code": -32000, "message": format!("no scripted result for {key}")},
            }),
        };
        ResponseTemplate::new(200).set_body_json(body)
    }
}

/// A node on which an authorization of 1000 from a funded payer passes every check.
pub(crate) fn authorization_node() -> RpcScript {
    RpcScript::default()
        .on_call(IERC20::balanceOfCall::SELECTOR, U256::from(5_000))
        .on("eth_estimateGas", json!("0xea60"))
        .on("eth_getBlockByNumber", Value::Null)
        .on("eth_gasPrice", json!("0x3b9aca00"))
        .on_call(IEIP3009::verifyTransferAuthorizationCall::SELECTOR, true)
}

/// An EIP-1559 `transfer(pay_to, amount)` call on `token`, signed by `signer`.
pub(crate) fn signed_transfer(
    signer: &PrivateKeySigner,
    chain_id: u64,
    token: Address,
    pay_to: Address,
    amount: u64,
) -> TxEnvelope {
    let tx = TxEip1559 {
        chain_id,
        nonce: 7,
        gas_limit: 60_000,
        max_fee_per_gas: 1_000_000_000,
        max_priority_fee_per_gas: 1_000_000,
        to: TxKind::Call(token),
        value: U256::ZERO,
        input: IERC20::transferCall {
            to: pay_to,
            amount: U256::from(amount),
        }
        .abi_encode()
        .into(),
        ..Default::default()
    };
    let signature = signer.sign_hash_sync(&tx.signature_hash()).unwrap();
    tx.into_signed(signature).into()
}

pub(crate) fn raw(envelope: &TxEnvelope) -> Bytes {
    envelope.encoded_2718().into()
}

/// `eth_getTransactionByHash` result for a mined `envelope`.
pub(crate) fn transaction_json(envelope: TxEnvelope, sender: Address) -> Value {
    let transaction = Transaction {
        inner: Recovered::new_unchecked(envelope, sender),
        block_hash: Some(B256::repeat_byte(0xbb)),
        block_number: Some(1),
        transaction_index: Some(0),
        effective_gas_price: Some(1_000_000_000),
    };
    serde_json::to_value(transaction).unwrap()
}

/// The ERC-20 `Transfer` event a token emits.
pub(crate) fn transfer_log(token: Address, from: Address, to: Address, value: u64) -> Log {
    let data: LogData = IERC20::Transfer {
        from,
        to,
        value: U256::from(value),
    }
    .encode_log_data();
    Log {
        address: token,
        data,
    }
}

/// `eth_getTransactionReceipt` result for a mined EIP-1559 transaction.
pub(crate) fn receipt_json(
    hash: TxHash,
    from: Address,
    to: Address,
    success: bool,
    logs: &[Log],
) -> Value {
    let logs: Vec<Value> = logs
        .iter()
        .enumerate()
        .map(|(index, log)| {
            json!({
                "address": log.address,
                "topics": log.data.topics(),
                "data": log.data.data,
                "blockHash": B256::repeat_byte(0xbb),
                "blockNumber": "0x1",
                "transactionHash": hash,
                "transactionIndex": "0x0",
                "logIndex": format!("{index:#x}"),
                "removed": false,
            })
        })
        .collect();
    json!({
        "type": "0x2",
        "status": if success { "0x1" } else { "0x0" },
        "cumulativeGasUsed": "0xea60",
        "logs": logs,
        "logsBloom": Bloom::default(),
        "transactionHash": hash,
        "transactionIndex": "0x0",
        "blockHash": B256::repeat_byte(0xbb),
        "blockNumber": "0x1",
        "gasUsed": "0xea60",
        "effectiveGasPrice": "0x3b9aca00",
        "from": from,
        "to": to,
        "contractAddress": null,
    })
}

pub(crate) fn receipt(hash: TxHash, from: Address, to: Address, success: bool) -> TransactionReceipt {
    serde_json::from_value(receipt_json(hash, from, to, success, &[])).unwrap()
}

/// Reads through a [`RootProvider`]; every broadcast is "mined" with a fixed receipt.
pub(crate) struct StubChain {
    reader: RootProvider,
    signer: Address,
    mined: Option<TransactionReceipt>,
    /// Calldata of facilitator calls and raw client transactions, in order.
    broadcasts: Mutex<Vec<Bytes>>,
}

impl StubChain {
    pub(crate) fn new(reader: RootProvider, mined: Option<TransactionReceipt>) -> Self {
        Self {
            reader,
            signer: Address::repeat_byte(0xfa),
            mined,
            broadcasts: Mutex::default(),
        }
    }

    /// No node behind the reader and every broadcast fails.
    pub(crate) fn offline() -> Self {
        Self::new(
            RootProvider::new_http("http://127.0.0.1:1".parse().unwrap()),
            None,
        )
    }

    pub(crate) fn broadcasts(&self) -> Vec<Bytes> {
        self.broadcasts.lock().unwrap().clone()
    }

    fn mine(&self, bytes: Bytes) -> Result<TransactionReceipt, BroadcastError> {
        self.broadcasts.lock().unwrap().push(bytes);
        self.mined
            .clone()
            .ok_or_else(|| TransportErrorKind::custom_str("offline").into())
    }
}

impl SettlementProvider for StubChain {
    type Reader = RootProvider;
    type Error = BroadcastError;

    fn reader(&self) -> &RootProvider {
        &self.reader
    }

    fn signer_address(&self) -> Address {
        self.signer
    }

    fn signer_addresses(&self) -> Vec<Address> {
        vec![self.signer]
    }

    async fn send_transaction(
        &self,
        call: FacilitatorCall,
    ) -> Result<TransactionReceipt, BroadcastError> {
        self.mine(call.calldata)
    }

    async fn send_raw_transaction(
        &self,
        raw: Bytes,
        _confirmations: u64,
    ) -> Result<TransactionReceipt, BroadcastError> {
        self.mine(raw)
    }
}
