#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana support for the h402 payment protocol.
//!
//! Every Solana payload refers to a transaction that lands on chain by the
//! time the facilitator looks at it, so verification reads the confirmed
//! transaction and compares balance deltas against the requirements:
//!
//! - native SOL: the lamport delta at the recipient's account index
//! - SPL tokens: the token-balance delta summed over accounts the recipient
//!   owns, restricted to the required mint under SPL Token or Token-2022
//!
//! Settlement re-runs verification. The facilitator never broadcasts Solana
//! transactions.
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod rpc;
pub mod verify;

mod error;
mod handler;

pub use error::SolanaError;
pub use handler::SolanaHandler;
pub use rpc::{ConfirmedTransaction, SolanaChainProvider, SolanaRpc, TokenBalance};
