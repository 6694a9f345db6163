//! wvproxy - Widevine license-session protocol engine.
//!
//! This crate provides:
//! - Widevine device (.wvd) parsing and export.
//! - A wire codec for the signed license protocol messages.
//! - License sessions that build signed challenges and unwrap content keys.
//! - An engine that swaps intercepted challenges, tracks in-flight sessions
//!   and records recovered keys (Widevine and ClearKey).
//!
//! Feature flags:
//! - `tracing`: route log output through `tracing` (default).
//! - `cli`: build the `wvproxy` binary.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// ClearKey JSON responses.
pub mod clearkey;
/// Signed envelope and license message codec.
pub mod codec;
/// YAML engine configuration.
pub mod config;
/// Widevine device (.wvd) parsing and serialization.
pub mod device;
/// Challenge interception and key recovery.
pub mod engine;
/// Common error types and Result alias.
pub mod error;
/// Decrypted key representation.
pub mod key;
/// Protobuf license protocol definitions.
pub mod license_protocol;
/// PSSH parsing and content identifiers.
pub mod pssh;
/// In-flight sessions keyed by request id.
pub mod registry;
/// Recovered key log.
pub mod results;
/// License session state machine.
pub mod session;
/// Shared helper utilities.
pub mod utils;

#[cfg(test)]
mod testing;

pub use engine::{Engine, Forward, ResponseOutcome, SharedEngine};
pub use error::{Error, Result};
