//! Builds the [`HandlerRegistry`] from configuration.
//!
//! EVM chains whose signer key is still an unresolved `$VAR` are skipped with
//! a warning, so a shared config file can list chains a deployment has no key
//! for.

use std::sync::Arc;

use h402::handler::HandlerRegistry;

use crate::config::FacilitatorConfig;
use crate::error::SetupError;

/// Creates one handler per configured network.
///
/// # Errors
///
/// Returns [`SetupError`] if a section holds a malformed chain id, URL or key.
pub fn build_registry(config: &FacilitatorConfig) -> Result<HandlerRegistry, SetupError> {
    let mut registry = HandlerRegistry::new();
    register_evm(&mut registry, config)?;
    register_solana(&mut registry, config);
    register_arkade(&mut registry, config)?;
    if registry.is_empty() {
        tracing::warn!("No networks configured; facilitator will report no supported kinds");
    }
    Ok(registry)
}

#[cfg(feature = "chain-evm")]
fn register_evm(registry: &mut HandlerRegistry, config: &FacilitatorConfig) -> Result<(), SetupError> {
    use alloy_network::EthereumWallet;
    use alloy_signer_local::PrivateKeySigner;
    use h402_evm::EvmHandler;
    use h402_evm::provider::{ChainProviderConfig, Eip155ChainProvider};
    use url::Url;

    for (network, chain) in &config.evm {
        let chain_id: u64 = network
            .parse()
            .map_err(|_| SetupError::InvalidChainId(network.clone()))?;

        let key = chain.signer_private_key.trim();
        if key.is_empty() || key.starts_with('$') {
            tracing::warn!(network = %network, "Skipping EVM chain: signer_private_key is not set");
            continue;
        }
        let signer: PrivateKeySigner = key.parse().map_err(|source| SetupError::SignerKey {
            network: network.clone(),
            source,
        })?;
        let signer_address = signer.address();

        let rpc_url = Url::parse(&chain.rpc_url).map_err(|e| SetupError::InvalidUrl {
            network: network.clone(),
            message: e.to_string(),
        })?;
        let provider_error = |source| SetupError::Provider {
            network: network.clone(),
            source,
        };
        let rpc_client = Eip155ChainProvider::rpc_client(&[(rpc_url, chain.rate_limit)])
            .map_err(provider_error)?;
        let provider = Eip155ChainProvider::new(
            rpc_client,
            EthereumWallet::from(signer),
            ChainProviderConfig {
                eip1559: chain.eip1559,
                flashblocks: chain.flashblocks,
                receipt_timeout_secs: chain.receipt_timeout_secs,
            },
        )
        .map_err(provider_error)?;

        tracing::info!(network = %network, signer = %signer_address, "Registered EVM chain");
        registry.register(Arc::new(EvmHandler::new(chain_id, provider)));
    }
    Ok(())
}

#[cfg(not(feature = "chain-evm"))]
fn register_evm(_: &mut HandlerRegistry, config: &FacilitatorConfig) -> Result<(), SetupError> {
    if !config.evm.is_empty() {
        tracing::warn!("EVM chains configured but the chain-evm feature is disabled");
    }
    Ok(())
}

#[cfg(feature = "chain-solana")]
fn register_solana(registry: &mut HandlerRegistry, config: &FacilitatorConfig) {
    use h402_svm::{SolanaChainProvider, SolanaHandler};

    for (network, cluster) in &config.solana {
        tracing::info!(network = %network, rpc_url = %cluster.rpc_url, "Registered Solana cluster");
        let rpc = SolanaChainProvider::new(cluster.rpc_url.clone());
        registry.register(Arc::new(SolanaHandler::new(network.clone(), rpc)));
    }
}

#[cfg(not(feature = "chain-solana"))]
fn register_solana(_: &mut HandlerRegistry, config: &FacilitatorConfig) {
    if !config.solana.is_empty() {
        tracing::warn!("Solana clusters configured but the chain-solana feature is disabled");
    }
}

#[cfg(feature = "chain-arkade")]
fn register_arkade(
    registry: &mut HandlerRegistry,
    config: &FacilitatorConfig,
) -> Result<(), SetupError> {
    use h402_arkade::ArkadeHandler;
    use h402_arkade::client::ArkServerClient;

    for (network, server) in &config.arkade {
        let client =
            ArkServerClient::try_new(&server.server_url).map_err(|e| SetupError::InvalidUrl {
                network: network.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(network = %network, server = %server.server_url, "Registered Ark server");
        registry.register(Arc::new(ArkadeHandler::new(network.clone(), client)));
    }
    Ok(())
}

#[cfg(not(feature = "chain-arkade"))]
fn register_arkade(_: &mut HandlerRegistry, config: &FacilitatorConfig) -> Result<(), SetupError> {
    if !config.arkade.is_empty() {
        tracing::warn!("Ark servers configured but the chain-arkade feature is disabled");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use h402::namespace::Namespace;

    use super::*;

    #[test]
    fn empty_config_builds_an_empty_registry() {
        let registry = build_registry(&FacilitatorConfig::default()).unwrap();
        assert!(registry.is_empty());
    }

    #[cfg(feature = "chain-evm")]
    #[test]
    fn unresolved_signer_key_skips_the_chain() {
        let config = FacilitatorConfig::parse(
            r#"
            [evm."8453"]
            rpc_url = "https://mainnet.base.org"
            signer_private_key = "$H402_TEST_UNSET_SIGNER_KEY"
            "#,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        assert!(registry.get(Namespace::Evm, "8453").is_none());
    }

    #[cfg(feature = "chain-evm")]
    #[test]
    fn non_numeric_chain_id_is_rejected() {
        let config = FacilitatorConfig::parse(
            r#"
            [evm.base]
            rpc_url = "https://mainnet.base.org"
            signer_private_key = "0x01"
            "#,
        )
        .unwrap();
        assert!(matches!(
            build_registry(&config),
            Err(SetupError::InvalidChainId(id)) if id == "base"
        ));
    }

    #[cfg(feature = "chain-evm")]
    #[test]
    fn malformed_signer_key_is_rejected() {
        let config = FacilitatorConfig::parse(
            r#"
            [evm."8453"]
            rpc_url = "https://mainnet.base.org"
            signer_private_key = "not-a-key"
            "#,
        )
        .unwrap();
        assert!(matches!(
            build_registry(&config),
            Err(SetupError::SignerKey { .. })
        ));
    }

    #[cfg(feature = "chain-arkade")]
    #[test]
    fn arkade_servers_are_registered_per_network() {
        let config = FacilitatorConfig::parse(
            r#"
            [arkade.mutinynet]
            server_url = "https://mutinynet.arkade.sh"
            "#,
        )
        .unwrap();
        let registry = build_registry(&config).unwrap();
        assert!(registry.get(Namespace::Arkade, "mutinynet").is_some());
        let supported = registry.supported_kinds();
        assert_eq!(supported.kinds.len(), 1);
        assert_eq!(supported.kinds[0].network_id, "mutinynet");
    }
}
