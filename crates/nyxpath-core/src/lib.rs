// ============================================
// File: crates/nyxpath-core/src/lib.rs
// ============================================
//! # nyxpath Core - Onion Crypto & Path Protocol
//!
//! ## Creation Reason
//! Holds everything about circuits that is pure data or pure computation:
//! identities, per-hop layer crypto and the two wire formats. No I/O and no
//! async here.
//!
//! ## Main Functionality
//!
//! ### Crypto Module ([`crypto`])
//! - Router identity (`IdentityKeyPair`, Ed25519)
//! - Per-hop `SharedSecret` and XChaCha20 onion layers
//! - HKDF-SHA256 nonce-mutation derivation
//!
//! ### Protocol Module ([`protocol`])
//! - Bencode codec
//! - Routing messages (latency, confirm, discard, DHT, exit negotiation, ...)
//! - Link frames (relay cells, build commits)
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              nyxpath-router                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   nyxpath-core          nyxpath-transport           │
//! │   You are here                │                     │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             nyxpath-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL cryptographic code uses RustCrypto / dalek implementations
//! - ALL secrets MUST implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use crypto::{
    IdentityKeyPair, IdentityPublicKey, OnionCrypto, SharedSecret, TunnelNonce, XChaCha20Onion,
};
pub use error::{CoreError, Result};
pub use protocol::{BuildCommitRecord, LinkMessage, RelayCell, RoutingBody, RoutingMessage};
