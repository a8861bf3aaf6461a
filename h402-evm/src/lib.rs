#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM (EIP-155) namespace support for the h402 payment protocol.
//!
//! Verifies and settles the three EVM payload types against any chain reachable
//! through an alloy JSON-RPC provider:
//!
//! - `authorization` - an EIP-3009 `transferWithAuthorization` signature that
//!   the facilitator broadcasts at settlement, paying gas from its own key
//! - `signedTransaction` - a signed but unsent transaction that the
//!   facilitator broadcasts with `eth_sendRawTransaction`
//! - `signAndSendTransaction` - a transaction the client already broadcast;
//!   verified against its receipt and `Transfer` log, never settled
//!
//! # Architecture
//!
//! - [`provider`] - [`Eip155ChainProvider`](provider::Eip155ChainProvider) with
//!   nonce management, signer rotation, and throttled fallback transports
//! - [`contract`] - Minimal Solidity bindings (ERC-3009, ERC-20)
//! - [`verify`] - Precondition checks shared by verification and settlement
//! - [`settle`] - Broadcasting and receipt handling
//! - [`EvmHandler`] - The [`NamespaceHandler`](h402::handler::NamespaceHandler) for one chain
//!
//! # Feature Flags
//!
//! - `telemetry` - `OpenTelemetry` tracing support

pub mod contract;
pub mod provider;
pub mod settle;
pub mod verify;

mod error;
mod handler;
#[cfg(test)]
mod testing;

pub use error::EvmError;
pub use handler::EvmHandler;
