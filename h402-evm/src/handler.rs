//! [`NamespaceHandler`] for EVM chains, dispatching on the payload type.

use alloy_primitives::Address;
use h402::facilitator::BoxFuture;
use h402::handler::{HandlerError, NamespaceHandler, payer_hint};
use h402::namespace::Namespace;
use h402::proto::{
    EvmPayload, PaymentKind, PaymentPayload, PaymentRequirements, PaymentVerificationError,
    PayloadVariant, SettleResponse, VerifyResponse,
};

use crate::error::EvmError;
use crate::provider::SettlementProvider;
use crate::settle::{settle_authorization, settle_signed_transaction};
use crate::verify::{assert_valid_authorization, verify_sent_transaction, verify_signed_transaction};

/// [`NamespaceHandler`] for one EVM chain.
///
/// The network id is the decimal EIP-155 chain id (`"8453"` for Base).
pub struct EvmHandler<P> {
    chain_id: u64,
    network_id: String,
    provider: P,
}

impl<P> std::fmt::Debug for EvmHandler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmHandler")
            .field("chain_id", &self.chain_id)
            .finish_non_exhaustive()
    }
}

impl<P> EvmHandler<P> {
    /// Creates a handler for `chain_id` backed by `provider`.
    pub fn new(chain_id: u64, provider: P) -> Self {
        Self {
            chain_id,
            network_id: chain_id.to_string(),
            provider,
        }
    }

    /// The served chain id.
    #[must_use]
    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

fn evm_payload(payload: &PaymentPayload) -> Result<&EvmPayload, PaymentVerificationError> {
    match &payload.payload {
        PayloadVariant::Evm(evm) => Ok(evm),
        PayloadVariant::Solana(_) | PayloadVariant::Arkade(_) => {
            Err(PaymentVerificationError::NamespaceMismatch)
        }
    }
}

impl<P> EvmHandler<P>
where
    P: SettlementProvider,
    EvmError: From<P::Error>,
{
    async fn verify_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, EvmError> {
        let provider = self.provider.reader();
        match evm_payload(payload)? {
            EvmPayload::Authorization(authorization) => {
                assert_valid_authorization(
                    provider,
                    self.provider.signer_address(),
                    authorization,
                    requirements,
                )
                .await?;
                Ok(VerifyResponse::valid(
                    Some(authorization.authorization.from.to_string()),
                    PaymentKind::Payload,
                    None,
                ))
            }
            EvmPayload::SignedTransaction(signed) => {
                let sender =
                    verify_signed_transaction(provider, self.chain_id, signed, requirements).await?;
                Ok(VerifyResponse::valid(
                    Some(sender.to_string()),
                    PaymentKind::Payload,
                    None,
                ))
            }
            EvmPayload::SignAndSendTransaction(sent) => {
                let sender = verify_sent_transaction(provider, sent, requirements).await?;
                Ok(VerifyResponse::valid(
                    Some(sender.to_string()),
                    PaymentKind::Transaction,
                    Some(sent.transaction_hash.to_string()),
                ))
            }
        }
    }

    async fn settle_inner(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<(String, Address), EvmError> {
        let provider = self.provider.reader();
        match evm_payload(payload)? {
            EvmPayload::Authorization(authorization) => {
                let call = assert_valid_authorization(
                    provider,
                    self.provider.signer_address(),
                    authorization,
                    requirements,
                )
                .await?;
                let hash = settle_authorization(&self.provider, &call).await?;
                Ok((hash.to_string(), authorization.authorization.from))
            }
            EvmPayload::SignedTransaction(signed) => {
                let sender =
                    verify_signed_transaction(provider, self.chain_id, signed, requirements).await?;
                let hash = settle_signed_transaction(&self.provider, &signed.signed_transaction)
                    .await?;
                Ok((hash.to_string(), sender))
            }
            EvmPayload::SignAndSendTransaction(_) => Err(PaymentVerificationError::NotSettleable(
                "signAndSendTransaction".into(),
            )
            .into()),
        }
    }
}

impl<P> NamespaceHandler for EvmHandler<P>
where
    P: SettlementProvider,
    EvmError: From<P::Error>,
{
    fn namespace(&self) -> Namespace {
        Namespace::Evm
    }

    fn network_id(&self) -> &str {
        &self.network_id
    }

    fn signers(&self) -> Vec<String> {
        self.provider
            .signer_addresses()
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn verify<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, VerifyResponse> {
        Box::pin(async move {
            match self.verify_inner(payload, requirements).await {
                Ok(response) => response,
                Err(e) => HandlerError::from(e).into_verify_response(payer_hint(payload)),
            }
        })
    }

    fn settle<'a>(
        &'a self,
        payload: &'a PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> BoxFuture<'a, SettleResponse> {
        Box::pin(async move {
            match self.settle_inner(payload, requirements).await {
                Ok((transaction, payer)) => SettleResponse::Success {
                    transaction,
                    namespace: Some(Namespace::Evm),
                    payer: Some(payer.to_string()),
                },
                Err(e) => {
                    HandlerError::from(e).into_settle_response(Namespace::Evm, payer_hint(payload))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{B256, Bytes, U256, address};
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use alloy_sol_types::SolCall;
    use h402::amount::TokenAmount;
    use h402::proto::{
        ErrorReason, EvmAuthorization, EvmAuthorizationPayload, EvmSentTransaction,
        EvmSignedTransaction, H402_VERSION,
    };
    use h402::timestamp::UnixTimestamp;

    use super::*;
    use crate::contract::{IEIP3009, IERC20};
    use crate::testing::{
        RpcScript, StubChain, authorization_node, raw, receipt, receipt_json, signed_transfer,
        transaction_json, transfer_log,
    };

    const TOKEN: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
    const PAY_TO: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");
    const FROM: Address = address!("0x857b06519E91e3A54538791bDbb0E22373e36b66");
    const RESOURCE: &str = "https://api.example.com/premium";

    fn handler() -> EvmHandler<StubChain> {
        EvmHandler::new(8453, StubChain::offline())
    }

    fn requirements() -> PaymentRequirements {
        PaymentRequirements::new(
            Namespace::Evm,
            "8453",
            PAY_TO.to_string(),
            TokenAmount::from(1_000),
            RESOURCE,
        )
        .with_token(TOKEN.to_string(), 6)
    }

    fn payload(evm: EvmPayload) -> PaymentPayload {
        PaymentPayload {
            h402_version: H402_VERSION,
            scheme: "exact".into(),
            namespace: Namespace::Evm,
            network_id: "8453".into(),
            resource: RESOURCE.into(),
            payload: PayloadVariant::Evm(evm),
        }
    }

    fn authorization(value: u64, valid_before: UnixTimestamp) -> PaymentPayload {
        payload(EvmPayload::Authorization(EvmAuthorizationPayload {
            signature: Bytes::from(vec![0x11; 65]),
            authorization: EvmAuthorization {
                from: FROM,
                to: PAY_TO,
                value: TokenAmount::from(value),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before,
                nonce: B256::repeat_byte(3),
            },
        }))
    }

    fn invalid_reason(response: &VerifyResponse) -> ErrorReason {
        match response {
            VerifyResponse::Invalid { reason, .. } => *reason,
            VerifyResponse::Valid { .. } => panic!("expected an invalid response"),
        }
    }

    #[tokio::test]
    async fn expiring_authorization_is_invalid_with_payer() {
        let response = handler()
            .verify(&authorization(1_000, UnixTimestamp::now() + 2), &requirements())
            .await;
        assert_eq!(
            invalid_reason(&response),
            ErrorReason::InvalidEvmAuthorizationValidBefore
        );
        assert_eq!(response.payer(), Some(FROM.to_string().as_str()));
    }

    #[tokio::test]
    async fn underpaying_authorization_is_invalid() {
        let response = handler()
            .verify(&authorization(999, UnixTimestamp::now() + 600), &requirements())
            .await;
        let reason = invalid_reason(&response);
        assert_eq!(reason, ErrorReason::InvalidEvmAuthorizationValue);
        assert!(reason.is_insufficient_amount());
    }

    #[tokio::test]
    async fn unreachable_rpc_is_an_unexpected_verify_error() {
        let response = handler()
            .verify(&authorization(1_000, UnixTimestamp::now() + 600), &requirements())
            .await;
        assert_eq!(invalid_reason(&response), ErrorReason::UnexpectedVerifyError);
    }

    #[tokio::test]
    async fn sent_transactions_cannot_be_settled() {
        let sent = payload(EvmPayload::SignAndSendTransaction(EvmSentTransaction {
            transaction_hash: B256::repeat_byte(0xab),
            signed_message: Bytes::from(vec![0x22; 65]),
        }));
        let response = handler().settle(&sent, &requirements()).await;
        assert!(matches!(
            response,
            SettleResponse::Error {
                reason: ErrorReason::InvalidScheme,
                namespace: Some(Namespace::Evm),
                ..
            }
        ));
    }

    #[test]
    fn network_id_is_the_decimal_chain_id() {
        let handler = handler();
        assert_eq!(handler.network_id(), "8453");
        assert_eq!(handler.signers(), vec![Address::repeat_byte(0xfa).to_string()]);
    }

    fn resource_signature(signer: &PrivateKeySigner) -> Bytes {
        let signature = signer.sign_message_sync(RESOURCE.as_bytes()).unwrap();
        Bytes::from(signature.as_bytes().to_vec())
    }

    fn signed_authorization(signer: &PrivateKeySigner) -> PaymentPayload {
        let signature = signer.sign_hash_sync(&B256::repeat_byte(9)).unwrap();
        payload(EvmPayload::Authorization(EvmAuthorizationPayload {
            signature: Bytes::from(signature.as_bytes().to_vec()),
            authorization: EvmAuthorization {
                from: signer.address(),
                to: PAY_TO,
                value: TokenAmount::from(1_000),
                valid_after: UnixTimestamp::from_secs(0),
                valid_before: UnixTimestamp::now() + 600,
                nonce: B256::repeat_byte(3),
            },
        }))
    }

    #[tokio::test]
    async fn sent_transaction_verifies_as_a_transaction() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_transfer(&signer, 8453, TOKEN, PAY_TO, 1_000);
        let hash = *envelope.tx_hash();
        let log = transfer_log(TOKEN, signer.address(), PAY_TO, 1_000);
        let (_node, reader) = RpcScript::default()
            .on(
                "eth_getTransactionByHash",
                transaction_json(envelope, signer.address()),
            )
            .on(
                "eth_getTransactionReceipt",
                receipt_json(hash, signer.address(), TOKEN, true, &[log]),
            )
            .serve()
            .await;
        let handler = EvmHandler::new(8453, StubChain::new(reader, None));
        let sent = payload(EvmPayload::SignAndSendTransaction(EvmSentTransaction {
            transaction_hash: hash,
            signed_message: resource_signature(&signer),
        }));

        let response = handler.verify(&sent, &requirements()).await;
        assert_eq!(
            response,
            VerifyResponse::valid(
                Some(signer.address().to_string()),
                PaymentKind::Transaction,
                Some(hash.to_string()),
            )
        );
    }

    #[tokio::test]
    async fn signed_transaction_is_verified_then_broadcast() {
        let signer = PrivateKeySigner::random();
        let envelope = signed_transfer(&signer, 8453, TOKEN, PAY_TO, 1_000);
        let hash = *envelope.tx_hash();
        let (_node, reader) = RpcScript::default()
            .on_call(IERC20::balanceOfCall::SELECTOR, U256::from(1_000))
            .serve()
            .await;
        let mined = receipt(hash, signer.address(), TOKEN, true);
        let handler = EvmHandler::new(8453, StubChain::new(reader, Some(mined)));
        let signed = payload(EvmPayload::SignedTransaction(EvmSignedTransaction {
            signed_transaction: raw(&envelope),
            signed_message: resource_signature(&signer),
        }));

        let verified = handler.verify(&signed, &requirements()).await;
        assert_eq!(
            verified,
            VerifyResponse::valid(Some(signer.address().to_string()), PaymentKind::Payload, None)
        );

        let settled = handler.settle(&signed, &requirements()).await;
        assert_eq!(
            settled,
            SettleResponse::Success {
                transaction: hash.to_string(),
                namespace: Some(Namespace::Evm),
                payer: Some(signer.address().to_string()),
            }
        );
        assert_eq!(handler.provider.broadcasts(), vec![raw(&envelope)]);
    }

    #[tokio::test]
    async fn authorization_is_reverified_then_broadcast_by_the_facilitator() {
        let signer = PrivateKeySigner::random();
        let (_node, reader) = authorization_node().serve().await;
        let mined_hash = B256::repeat_byte(0xcd);
        let mined = receipt(mined_hash, Address::repeat_byte(0xfa), TOKEN, true);
        let handler = EvmHandler::new(8453, StubChain::new(reader, Some(mined)));
        let authorization = signed_authorization(&signer);

        let settled = handler.settle(&authorization, &requirements()).await;
        assert_eq!(
            settled,
            SettleResponse::Success {
                transaction: mined_hash.to_string(),
                namespace: Some(Namespace::Evm),
                payer: Some(signer.address().to_string()),
            }
        );

        let broadcasts = handler.provider.broadcasts();
        assert_eq!(broadcasts.len(), 1);
        let call = IEIP3009::transferWithAuthorizationCall::abi_decode(&broadcasts[0]).unwrap();
        assert_eq!(call.from, signer.address());
        assert_eq!(call.to, PAY_TO);
        assert_eq!(call.nonce, B256::repeat_byte(3));
    }

    #[tokio::test]
    async fn reverted_settlement_is_an_invalid_transaction_state() {
        let signer = PrivateKeySigner::random();
        let (_node, reader) = authorization_node().serve().await;
        let mined = receipt(B256::repeat_byte(0xcd), Address::repeat_byte(0xfa), TOKEN, false);
        let handler = EvmHandler::new(8453, StubChain::new(reader, Some(mined)));

        let settled = handler
            .settle(&signed_authorization(&signer), &requirements())
            .await;
        assert!(matches!(
            settled,
            SettleResponse::Error {
                reason: ErrorReason::InvalidTransactionState,
                namespace: Some(Namespace::Evm),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn authorization_the_token_refuses_is_never_broadcast() {
        let signer = PrivateKeySigner::random();
        let (_node, reader) = authorization_node()
            .on_call(IEIP3009::verifyTransferAuthorizationCall::SELECTOR, false)
            .serve()
            .await;
        let handler = EvmHandler::new(8453, StubChain::new(reader, None));

        let settled = handler
            .settle(&signed_authorization(&signer), &requirements())
            .await;
        assert!(matches!(
            settled,
            SettleResponse::Error {
                reason: ErrorReason::InvalidEvmAuthorizationSignature,
                ..
            }
        ));
        assert!(handler.provider.broadcasts().is_empty());
    }
}
