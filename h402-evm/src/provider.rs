//! The facilitator's signing connection to one EVM chain.
//!
//! [`Eip155ChainProvider`] pays gas for `transferWithAuthorization` from one
//! of several facilitator keys, picked round-robin, and relays client-signed
//! transactions unchanged. Nonces come from [`NonceTracker`], which starts
//! each key from its pending transaction count so a restart never reuses a
//! nonce still sitting in the mempool.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy_network::{Ethereum, EthereumWallet, Network, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, NonceManager,
    WalletFiller,
};
use alloy_provider::{Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionReceipt, TransactionRequest};
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport::{TransportError, TransportResult};
use alloy_transport_http::Http;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
#[cfg(feature = "telemetry")]
use tracing::Instrument;
use url::Url;

/// Per-key nonce cache seeded from the `pending` transaction count.
///
/// After a failed send the chain state is unknown, so the key is
/// [`forget`](Self::forget)-ed and re-read on its next use.
#[derive(Clone, Debug, Default)]
pub struct NonceTracker {
    last_used: Arc<DashMap<Address, Arc<Mutex<Option<u64>>>>>,
}

impl NonceTracker {
    fn slot(&self, address: Address) -> Arc<Mutex<Option<u64>>> {
        Arc::clone(self.last_used.entry(address).or_default().value())
    }

    /// Drops the cached nonce of `address`.
    pub async fn forget(&self, address: Address) {
        let slot = self.last_used.get(&address).map(|slot| Arc::clone(slot.value()));
        if let Some(slot) = slot {
            slot.lock().await.take();
        }
    }
}

#[cfg_attr(target_family = "wasm", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_family = "wasm"), async_trait::async_trait)]
impl NonceManager for NonceTracker {
    async fn get_next_nonce<P, N>(&self, provider: &P, address: Address) -> TransportResult<u64>
    where
        P: Provider<N>,
        N: Network,
    {
        let slot = self.slot(address);
        let mut last_used = slot.lock().await;
        let next = match *last_used {
            Some(nonce) => nonce + 1,
            None => provider.get_transaction_count(address).pending().await?,
        };
        *last_used = Some(next);
        Ok(next)
    }
}

/// A contract call paid for by the facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorCall {
    /// Contract to call.
    pub to: Address,
    /// ABI-encoded input.
    pub calldata: Bytes,
    /// Blocks to wait for after inclusion.
    pub confirmations: u64,
}

/// Errors while broadcasting or awaiting a transaction.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// The node rejected the request or could not be reached.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// No receipt arrived in time.
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
}

/// Errors building an [`Eip155ChainProvider`].
#[derive(Debug, thiserror::Error)]
pub enum ProviderBuildError {
    /// The wallet holds no signer.
    #[error("at least one signer must be provided")]
    NoSigners,
    /// None of the configured RPC URLs is HTTP(S).
    #[error("no usable HTTP RPC endpoint")]
    NoTransports,
}

/// What [`EvmHandler`](crate::EvmHandler) needs from a chain connection.
///
/// Reads go through [`reader`](Self::reader); the two send methods own nonce
/// and signer bookkeeping.
pub trait SettlementProvider: Send + Sync + 'static {
    /// Provider used for reads and `eth_call`.
    type Reader: Provider + Send + Sync;
    /// Broadcast failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// The read side of the connection.
    fn reader(&self) -> &Self::Reader;

    /// The key the next [`send_transaction`](Self::send_transaction) will use.
    ///
    /// Reading it does not rotate keys, so a settlement simulates and sends
    /// from the same address.
    fn signer_address(&self) -> Address;

    /// Every facilitator key.
    fn signer_addresses(&self) -> Vec<Address>;

    /// Signs `call` with a facilitator key, broadcasts it and waits for the receipt.
    fn send_transaction(
        &self,
        call: FacilitatorCall,
    ) -> impl Future<Output = Result<TransactionReceipt, Self::Error>> + Send;

    /// Relays a client-signed EIP-2718 envelope and waits for the receipt.
    fn send_raw_transaction(
        &self,
        raw: Bytes,
        confirmations: u64,
    ) -> impl Future<Output = Result<TransactionReceipt, Self::Error>> + Send;
}

type Fillers = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<NonceTracker>, ChainIdFiller>>,
>;

/// The composed alloy provider: gas, blob gas, nonce and chain id fillers plus wallet signing.
pub type SigningProvider = FillProvider<
    JoinFill<JoinFill<Identity, Fillers>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Options for [`Eip155ChainProvider`].
#[derive(Debug, Clone, Copy)]
pub struct ChainProviderConfig {
    /// EIP-1559 fees; legacy `gasPrice` when `false`.
    pub eip1559: bool,
    /// Estimate against `latest` because blocks confirm as flashblocks.
    pub flashblocks: bool,
    /// Seconds to wait for a receipt.
    pub receipt_timeout_secs: u64,
}

impl Default for ChainProviderConfig {
    fn default() -> Self {
        Self {
            eip1559: true,
            flashblocks: false,
            receipt_timeout_secs: 30,
        }
    }
}

/// [`SettlementProvider`] over HTTP JSON-RPC with rotating facilitator keys.
#[derive(Debug)]
pub struct Eip155ChainProvider {
    inner: SigningProvider,
    config: ChainProviderConfig,
    signers: Arc<[Address]>,
    cursor: Arc<AtomicUsize>,
    nonces: NonceTracker,
}

impl Eip155ChainProvider {
    /// Builds an RPC client that fails over between `endpoints`.
    ///
    /// Each endpoint may carry a requests-per-second limit. Endpoints that
    /// are not HTTP(S) are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderBuildError::NoTransports`] if no HTTP(S) URL remains.
    pub fn rpc_client(endpoints: &[(Url, Option<u32>)]) -> Result<RpcClient, ProviderBuildError> {
        let transports = endpoints
            .iter()
            .filter(|(url, _)| matches!(url.scheme(), "http" | "https"))
            .map(|(url, rate_limit)| {
                #[cfg(feature = "telemetry")]
                tracing::info!(rpc_url = %url, rate_limit = ?rate_limit, "Using HTTP transport");
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(url.clone()))
            })
            .collect::<Vec<_>>();
        let count = NonZeroUsize::new(transports.len()).ok_or(ProviderBuildError::NoTransports)?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    /// Wraps `rpc_client`, signing with every key in `wallet`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderBuildError::NoSigners`] if the wallet is empty.
    pub fn new(
        rpc_client: RpcClient,
        wallet: EthereumWallet,
        config: ChainProviderConfig,
    ) -> Result<Self, ProviderBuildError> {
        let signers: Arc<[Address]> =
            NetworkWallet::<Ethereum>::signer_addresses(&wallet).collect();
        if signers.is_empty() {
            return Err(ProviderBuildError::NoSigners);
        }
        let nonces = NonceTracker::default();
        let fillers = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(NonceFiller::new(nonces.clone()), ChainIdFiller::default()),
            ),
        );
        let inner: SigningProvider = ProviderBuilder::default()
            .filler(fillers)
            .wallet(wallet)
            .connect_client(rpc_client);

        #[cfg(feature = "telemetry")]
        tracing::info!(signers = ?signers, eip1559 = config.eip1559, "Using EVM provider");

        Ok(Self {
            inner,
            config,
            signers,
            cursor: Arc::new(AtomicUsize::new(0)),
            nonces,
        })
    }

    fn current_signer(&self) -> Address {
        self.signers[self.cursor.load(Ordering::Relaxed) % self.signers.len()]
    }

    /// Takes the current key and moves the cursor past it.
    fn next_signer(&self) -> Address {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.signers.len();
        self.signers[index]
    }

    const fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.config.receipt_timeout_secs)
    }

    async fn prepare(
        &self,
        call: FacilitatorCall,
        from: Address,
    ) -> TransportResult<TransactionRequest> {
        let mut request = TransactionRequest::default()
            .with_to(call.to)
            .with_from(from)
            .with_input(call.calldata);

        if !self.config.eip1559 {
            let gas_price = self.inner.get_gas_price();
            #[cfg(feature = "telemetry")]
            let gas_price = gas_price.instrument(tracing::info_span!("get_gas_price"));
            request.set_gas_price(gas_price.await?);
        }

        let block = if self.config.flashblocks {
            BlockId::latest()
        } else {
            BlockId::pending()
        };
        let gas_limit = self.inner.estimate_gas(request.clone()).block(block).await?;
        request.set_gas_limit(gas_limit);
        Ok(request)
    }
}

impl SettlementProvider for Eip155ChainProvider {
    type Reader = SigningProvider;
    type Error = BroadcastError;

    fn reader(&self) -> &SigningProvider {
        &self.inner
    }

    fn signer_address(&self) -> Address {
        self.current_signer()
    }

    fn signer_addresses(&self) -> Vec<Address> {
        self.signers.to_vec()
    }

    async fn send_transaction(
        &self,
        call: FacilitatorCall,
    ) -> Result<TransactionReceipt, BroadcastError> {
        let from = self.next_signer();
        let confirmations = call.confirmations;
        let request = self.prepare(call, from).await?;

        let receipt = match self.inner.send_transaction(request).await {
            Ok(pending) => pending
                .with_required_confirmations(confirmations)
                .with_timeout(Some(self.receipt_timeout()))
                .get_receipt()
                .await
                .map_err(BroadcastError::from),
            Err(e) => Err(BroadcastError::from(e)),
        };
        if receipt.is_err() {
            self.nonces.forget(from).await;
        }
        receipt
    }

    async fn send_raw_transaction(
        &self,
        raw: Bytes,
        confirmations: u64,
    ) -> Result<TransactionReceipt, BroadcastError> {
        let receipt = self
            .inner
            .send_raw_transaction(&raw)
            .await?
            .with_required_confirmations(confirmations)
            .with_timeout(Some(self.receipt_timeout()))
            .get_receipt()
            .await?;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use alloy_signer_local::PrivateKeySigner;

    use super::*;

    #[test]
    fn rpc_client_requires_an_http_endpoint() {
        let ws: Url = "wss://rpc.example.com".parse().unwrap();
        assert!(matches!(
            Eip155ChainProvider::rpc_client(&[(ws, None)]),
            Err(ProviderBuildError::NoTransports)
        ));
    }

    #[tokio::test]
    async fn forgetting_an_unknown_key_is_a_noop() {
        let nonces = NonceTracker::default();
        nonces.forget(Address::ZERO).await;
        assert!(nonces.last_used.is_empty());
    }

    #[tokio::test]
    async fn forget_clears_a_cached_nonce() {
        let nonces = NonceTracker::default();
        *nonces.slot(Address::ZERO).lock().await = Some(7);
        nonces.forget(Address::ZERO).await;
        assert_eq!(*nonces.slot(Address::ZERO).lock().await, None);
    }

    #[tokio::test]
    async fn reading_the_signer_does_not_rotate_keys() {
        let first = PrivateKeySigner::random();
        let second = PrivateKeySigner::random();
        let (a, b) = (first.address(), second.address());
        let mut wallet = EthereumWallet::from(first);
        wallet.register_signer(second);
        let url: Url = "http://127.0.0.1:1".parse().unwrap();
        let client = Eip155ChainProvider::rpc_client(&[(url, None)]).unwrap();
        let provider =
            Eip155ChainProvider::new(client, wallet, ChainProviderConfig::default()).unwrap();

        let signers = provider.signer_addresses();
        assert_eq!(signers.len(), 2);
        assert!(signers.contains(&a) && signers.contains(&b));

        let peeked = provider.signer_address();
        assert_eq!(provider.signer_address(), peeked);
        assert_eq!(provider.next_signer(), peeked);
        let after = provider.signer_address();
        assert_ne!(after, peeked);
        assert_eq!(provider.next_signer(), after);
        assert_eq!(provider.signer_address(), peeked);
    }
}
