#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Bitcoin payments over Arkade for the h402 payment protocol.
//!
//! An Ark transaction travels as a PSBT. Verification reads the PSBT's
//! unsigned transaction, requires a taproot signature on every input and sums
//! the outputs locked to the recipient's Ark address. Signed transactions are
//! settled by submitting them to the Ark server; transactions the client
//! already submitted are looked up through the Ark indexer.
//!
//! # Modules
//!
//! - [`address`] - Bech32m Ark addresses
//! - [`client`] - REST client for the Ark server
//! - [`psbt`] - The subset of BIP-174 needed to read Ark transactions
//! - [`verify`] - Output and signature checks
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation

pub mod address;
pub mod client;
pub mod psbt;
pub mod verify;

mod error;
mod handler;

pub use error::ArkadeError;
pub use handler::ArkadeHandler;
