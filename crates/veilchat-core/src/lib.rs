//! # VeilChat Core Library
//!
//! A peer-to-peer end-to-end encryption engine combining two independent
//! cryptographic stacks over a shared identity layer:
//!
//! - **Noise transport sessions** (XX/IK/NK over Curve25519, ChaCha20-Poly1305
//!   and SHA-256) for authenticated, forward-secure pairwise channels with
//!   sliding-window replay protection.
//! - **Nostr private messaging**: canonical event hashing, BIP-340 Schnorr
//!   signatures, NIP-44 v2 encryption, NIP-17 seals and NIP-59 gift-wraps that
//!   hide the sender identity, plus the legacy NIP-04 path.
//!
//! Messages travel through a deduplicating relay multiplexer that fans out
//! over any number of websocket relays and survives individual relay outages.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │     relay (multiplexer, dedup)          │
//! ├─────────────────────────────────────────┤
//! │  nostr (events, NIP-04/17/44/59)        │
//! ├─────────────────────────────────────────┤
//! │  crypto (Noise sessions) │  identity    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The crypto and nostr layers are synchronous pure state machines; only the
//! relay multiplexer and the identity keystore perform I/O.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod nostr;
pub mod relay;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum Noise message size in bytes (64 KiB - 1)
pub const MAX_MESSAGE_SIZE: usize = 65535;
