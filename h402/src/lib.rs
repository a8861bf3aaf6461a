#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the h402 payment protocol.
//!
//! h402 extends HTTP 402 Payment Required with an `X-PAYMENT` request header
//! carrying a signed payment proof and an `X-PAYMENT-RESPONSE` response header
//! carrying a settlement receipt. Payments settle on EVM chains, Solana, or
//! Bitcoin via Arkade; each of those lives in its own crate and plugs in
//! through [`handler::NamespaceHandler`].
//!
//! # Modules
//!
//! - [`amount`] - Arbitrary-precision token amounts and human-readable normalization
//! - [`codec`] - `base64(JSON)` encoding of payment payloads
//! - [`facilitator`] - Core trait for payment verification and settlement
//! - [`handler`] - Per-namespace handlers and the registry that dispatches to them
//! - [`namespace`] - The closed set of supported chain namespaces
//! - [`proto`] - Wire format types, error taxonomy, and timestamps
//! - [`verify`] - Chain-agnostic payload/requirements matching
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod amount;
pub mod codec;
pub mod facilitator;
pub mod handler;
pub mod namespace;
pub mod proto;
pub mod timestamp;
pub mod verify;
