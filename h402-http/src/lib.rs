#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport layer for the h402 payment protocol.
//!
//! Provides the `X-PAYMENT-RESPONSE` header codec, header constants, and
//! (feature-gated) the resource-server side: route matching, a remote
//! facilitator client, and a tower middleware that gates routes on payment.
//!
//! # Modules
//!
//! - [`constants`] - HTTP header names and defaults
//! - [`headers`] - Base64 encoding/decoding of settlement receipts
//! - [`error`] - Header codec error types
//! - [`route`] - Route patterns and first-match lookup (feature: `server`)
//! - [`server`] - Payment middleware and facilitator client (feature: `server`)

pub mod constants;
pub mod error;
pub mod headers;

#[cfg(feature = "server")]
pub mod route;
#[cfg(feature = "server")]
pub mod server;
