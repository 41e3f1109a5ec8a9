// ============================================
// File: crates/nyxpath-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Groups the primitives the path layer needs: router identities, per-hop
//! shared secrets, the onion stream cipher and nonce-mutation derivation.
//!
//! ## Main Functionality
//! - [`keys`]: `IdentityKeyPair`, `IdentityPublicKey`, `SharedSecret`
//! - [`onion`]: `TunnelNonce`, `OnionCrypto`, `XChaCha20Onion`
//! - [`kdf`]: HKDF-SHA256 derivation of the per-hop nonce-mutation constant
//!
//! ## Layering
//! ```text
//!  client                    hop0            hop1            hop2
//!    │  X = E2(E1(E0(m)))     │               │               │
//!    │  nonce Y               │               │               │
//!    ├───────────────────────►│ peel E0 (Y)   │               │
//!    │                        ├──────────────►│ peel E1 (Y^x0)│
//!    │                        │               ├──────────────►│ peel E2 (Y^x0^x1)
//! ```
//! Each hop XORs the nonce with its own constant before forwarding, so every
//! layer uses a distinct nonce under a distinct key.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Layers are a length-preserving stream cipher (no tag); integrity comes
//!   from the bencode parse at the terminal and the exit signatures
//! - ALL secret types implement Zeroize
//!
//! ## Last Modified
//! v0.1.0 - Initial crypto implementation

pub mod kdf;
pub mod keys;
pub mod onion;

pub use keys::{IdentityKeyPair, IdentityPublicKey, SharedSecret};
pub use onion::{OnionCrypto, TunnelNonce, XChaCha20Onion};

// ============================================
// Constants
// ============================================

/// Size of Ed25519 public key in bytes.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Size of Ed25519 signature in bytes.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

/// Size of a per-hop shared secret (XChaCha20 key).
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of the XChaCha20 nonce carried in every relay cell.
pub const TUNNEL_NONCE_SIZE: usize = 24;

/// HKDF salt for nonce-mutation derivation.
pub const HKDF_SALT: &[u8] = b"nyxpath-v1";

/// HKDF info for the per-hop nonce-mutation constant.
pub const NONCE_XOR_INFO: &[u8] = b"nyxpath-nonce-xor";
