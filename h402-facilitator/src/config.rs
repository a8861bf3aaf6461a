//! Facilitator server configuration.
//!
//! Loaded from a TOML file whose string values may reference the process
//! environment as `$VAR` or `${VAR}`.
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//!
//! [evm."8453"]
//! rpc_url = "https://mainnet.base.org"
//! signer_private_key = "$SIGNER_KEY_BASE"
//!
//! [solana.mainnet]
//! rpc_url = "https://api.mainnet-beta.solana.com"
//!
//! [arkade.bitcoin]
//! server_url = "https://arkade.computer"
//! ```
//!
//! `HOST` and `PORT` override the file values.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Errors while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`FacilitatorConfig`].
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    /// An override variable holds an unusable value.
    #[error("invalid value {value:?} for {name}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// The variable pattern failed to compile.
    #[error(transparent)]
    Regex(#[from] regex::Error),
}

/// Top-level facilitator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorConfig {
    /// Bind address (default `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Bind port (default `4021`).
    #[serde(default = "default_port")]
    pub port: u16,
    /// EVM chains keyed by decimal chain id.
    #[serde(default)]
    pub evm: BTreeMap<String, EvmChainConfig>,
    /// Solana clusters keyed by network id.
    #[serde(default)]
    pub solana: BTreeMap<String, SolanaConfig>,
    /// Ark servers keyed by network id.
    #[serde(default)]
    pub arkade: BTreeMap<String, ArkadeConfig>,
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            evm: BTreeMap::new(),
            solana: BTreeMap::new(),
            arkade: BTreeMap::new(),
        }
    }
}

/// One EVM chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Requests per second allowed against `rpc_url`; unlimited when absent.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Hex private key the facilitator pays gas from.
    pub signer_private_key: String,
    /// EIP-1559 fees; legacy gas price when `false`.
    #[serde(default = "default_true")]
    pub eip1559: bool,
    /// The chain confirms on flashblocks.
    #[serde(default)]
    pub flashblocks: bool,
    /// Seconds to wait for a settlement receipt.
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
}

/// One Solana cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolanaConfig {
    /// JSON-RPC endpoint.
    pub rpc_url: String,
}

/// One Ark server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArkadeConfig {
    /// Base URL of the arkd REST API.
    pub server_url: String,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4021
}

const fn default_true() -> bool {
    true
}

const fn default_receipt_timeout() -> u64 {
    30
}

impl FacilitatorConfig {
    /// Loads `path`, or the defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if
    /// `HOST` / `PORT` are set to values that do not parse.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })?
        } else {
            String::new()
        };
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parses TOML after expanding environment references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the expanded text is not a valid configuration.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content, |name| std::env::var(name).ok())?;
        Ok(toml::from_str(&expanded)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = std::env::var("HOST") {
            self.host = host.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "HOST",
                value: host.clone(),
            })?;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "PORT",
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    /// Number of configured networks across all namespaces.
    #[must_use]
    pub fn network_count(&self) -> usize {
        self.evm.len() + self.solana.len() + self.arkade.len()
    }
}

/// Replaces `$VAR` and `${VAR}` with `lookup(VAR)`. Unresolved references stay as written.
fn expand_env_vars(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, regex::Error> {
    let pattern = Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")?;
    let expanded = pattern.replace_all(input, |caps: &Captures<'_>| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|name| lookup(name.as_str()))
            .unwrap_or_else(|| caps[0].to_owned())
    });
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "KEY" => Some("0xabc".into()),
            "RPC_HOST" => Some("rpc.example.com".into()),
            _ => None,
        }
    }

    #[test]
    fn expands_both_reference_forms() {
        let out = expand_env_vars("a=$KEY b=https://${RPC_HOST}/v1", env).unwrap();
        assert_eq!(out, "a=0xabc b=https://rpc.example.com/v1");
    }

    #[test]
    fn unresolved_references_are_kept() {
        let out = expand_env_vars("$MISSING ${ALSO_MISSING} $ 5$", env).unwrap();
        assert_eq!(out, "$MISSING ${ALSO_MISSING} $ 5$");
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = FacilitatorConfig::parse("").unwrap();
        assert_eq!(config, FacilitatorConfig::default());
        assert_eq!(config.port, 4021);
        assert_eq!(config.network_count(), 0);
    }

    #[test]
    fn parses_every_namespace_section() {
        let config = FacilitatorConfig::parse(
            r#"
            port = 8080

            [evm."84532"]
            rpc_url = "https://sepolia.base.org"
            signer_private_key = "0x01"
            eip1559 = false

            [solana.devnet]
            rpc_url = "https://api.devnet.solana.com"

            [arkade.mutinynet]
            server_url = "https://mutinynet.arkade.sh"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 8080);
        let chain = &config.evm["84532"];
        assert!(!chain.eip1559);
        assert!(!chain.flashblocks);
        assert_eq!(chain.receipt_timeout_secs, 30);
        assert_eq!(chain.rate_limit, None);
        assert_eq!(config.solana["devnet"].rpc_url, "https://api.devnet.solana.com");
        assert_eq!(config.arkade["mutinynet"].server_url, "https://mutinynet.arkade.sh");
        assert_eq!(config.network_count(), 3);
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let err = FacilitatorConfig::parse("[solana.devnet]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = FacilitatorConfig::load_from("/nonexistent/h402/config.toml");
        if std::env::var("HOST").is_err() && std::env::var("PORT").is_err() {
            assert_eq!(config.unwrap(), FacilitatorConfig::default());
        }
    }
}
