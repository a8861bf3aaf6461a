//! Ark addresses.
//!
//! An Ark address is bech32m over `version || server_key || vtxo_taproot_key`,
//! both keys x-only (32 bytes). Mainnet uses the `ark` prefix and every test
//! network uses `tark`. Funds sent to the address are locked by a P2TR output
//! whose witness program is the VTXO taproot key.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use bech32::{Bech32m, Hrp};

const MAINNET_HRP: &str = "ark";
const TESTNET_HRP: &str = "tark";
const PAYLOAD_LEN: usize = 65;

/// Errors while parsing an Ark address.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    /// Not valid bech32m.
    #[error(transparent)]
    Bech32(#[from] bech32::DecodeError),
    /// Unknown human-readable prefix.
    #[error("unknown address prefix {0:?}")]
    Prefix(String),
    /// Wrong payload size.
    #[error("address payload must be {PAYLOAD_LEN} bytes, got {0}")]
    Length(usize),
    /// Unsupported address version.
    #[error("unsupported address version {0}")]
    Version(u8),
}

/// A decoded Ark address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArkAddress {
    mainnet: bool,
    server_key: [u8; 32],
    vtxo_taproot_key: [u8; 32],
}

impl ArkAddress {
    /// Builds an address from its parts.
    #[must_use]
    pub const fn new(mainnet: bool, server_key: [u8; 32], vtxo_taproot_key: [u8; 32]) -> Self {
        Self {
            mainnet,
            server_key,
            vtxo_taproot_key,
        }
    }

    /// `true` for the `ark` prefix.
    #[must_use]
    pub const fn is_mainnet(&self) -> bool {
        self.mainnet
    }

    /// The Ark server's x-only key.
    #[must_use]
    pub const fn server_key(&self) -> &[u8; 32] {
        &self.server_key
    }

    /// The x-only taproot key that locks the recipient's VTXOs.
    #[must_use]
    pub const fn vtxo_taproot_key(&self) -> &[u8; 32] {
        &self.vtxo_taproot_key
    }

    /// The P2TR locking script paying this address: `OP_1 <32-byte key>`.
    #[must_use]
    pub fn script_pubkey(&self) -> Vec<u8> {
        let mut script = Vec::with_capacity(34);
        script.push(0x51);
        script.push(0x20);
        script.extend_from_slice(&self.vtxo_taproot_key);
        script
    }
}

impl FromStr for ArkAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data) = bech32::decode(s)?;
        let mainnet = match hrp.to_lowercase().as_str() {
            MAINNET_HRP => true,
            TESTNET_HRP => false,
            other => return Err(AddressError::Prefix(other.to_owned())),
        };
        if data.len() != PAYLOAD_LEN {
            return Err(AddressError::Length(data.len()));
        }
        if data[0] != 0 {
            return Err(AddressError::Version(data[0]));
        }
        let mut server_key = [0u8; 32];
        server_key.copy_from_slice(&data[1..33]);
        let mut vtxo_taproot_key = [0u8; 32];
        vtxo_taproot_key.copy_from_slice(&data[33..]);
        Ok(Self::new(mainnet, server_key, vtxo_taproot_key))
    }
}

impl Display for ArkAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hrp = Hrp::parse_unchecked(if self.mainnet { MAINNET_HRP } else { TESTNET_HRP });
        let mut data = Vec::with_capacity(PAYLOAD_LEN);
        data.push(0);
        data.extend_from_slice(&self.server_key);
        data.extend_from_slice(&self.vtxo_taproot_key);
        let encoded = bech32::encode::<Bech32m>(hrp, &data).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}
