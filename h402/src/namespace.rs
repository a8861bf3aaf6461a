//! Chain namespaces.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The chain family a payment settles on.
///
/// The set is closed: every dispatch over namespaces is an exhaustive `match`,
/// so adding a family is a compile-time change across the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// EVM chains, identified by decimal chain id (`"8453"`).
    Evm,
    /// Solana clusters (`"mainnet"`, `"devnet"`).
    Solana,
    /// Bitcoin through an Ark server (`"bitcoin"`, `"mutinynet"`).
    Arkade,
}

impl Namespace {
    /// All namespaces, in declaration order.
    pub const ALL: [Self; 3] = [Self::Evm, Self::Solana, Self::Arkade];

    /// The lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Solana => "solana",
            Self::Arkade => "arkade",
        }
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known namespace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown namespace: {0}")]
pub struct UnknownNamespace(pub String);

impl FromStr for Namespace {
    type Err = UnknownNamespace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evm" => Ok(Self::Evm),
            "solana" => Ok(Self::Solana),
            "arkade" => Ok(Self::Arkade),
            other => Err(UnknownNamespace(other.to_owned())),
        }
    }
}
