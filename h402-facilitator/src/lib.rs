//! HTTP facilitator server for the h402 payment protocol.
//!
//! Serves `/verify`, `/settle`, `/supported` and `/health` over a
//! [`HandlerRegistry`](h402::handler::HandlerRegistry) assembled from a TOML
//! configuration: one handler per configured EVM chain, Solana cluster and
//! Ark server.
//!
//! # Feature Flags
//!
//! - `chain-evm`, `chain-solana`, `chain-arkade` - namespace support
//! - `telemetry` - OTLP export of spans and metrics

pub mod chains;
pub mod config;
pub mod error;
pub mod handlers;
pub mod telemetry;
pub mod util;
