// ============================================
// File: crates/nyxpath-core/src/crypto/keys.rs
// ============================================
//! # Cryptographic Key Types
//!
//! ## Creation Reason
//! A router is named by its Ed25519 public key, and every hop of a circuit
//! holds a symmetric secret shared with the circuit owner. Both need the
//! usual hygiene (zeroize on drop, redacted debug output).
//!
//! ## Main Functionality
//! - `IdentityKeyPair`: long-term Ed25519 signing keys; its public half is
//!   the router's [`RouterId`]
//! - `IdentityPublicKey`: verifies exit-control signatures
//! - `SharedSecret`: per-hop XChaCha20 key
//!
//! ## Key Lifecycle
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  IdentityKeyPair (Long-term)                               │
//! │  ├─ Generated once by `keygen`, stored in the key file     │
//! │  └─ Signs exit grants, rejects and closes                  │
//! │                                                            │
//! │  SharedSecret (Per-hop, per-circuit)                       │
//! │  ├─ Produced by the hop key source when a build starts     │
//! │  ├─ Delivered to the hop in its commit record              │
//! │  └─ Dropped (and zeroed) with the circuit or transit hop   │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ALL secret types MUST implement Zeroize
//! - Compare secrets with `ct_eq`, never `==` on raw bytes
//!
//! ## Last Modified
//! v0.1.0 - Initial key type definitions

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use nyxpath_common::RouterId;

use super::{ED25519_PUBLIC_KEY_SIZE, ED25519_SIGNATURE_SIZE, SHARED_SECRET_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// IdentityKeyPair (Ed25519)
// ============================================

/// Long-term Ed25519 identity key pair.
///
/// # Example
/// ```
/// use nyxpath_core::crypto::IdentityKeyPair;
///
/// let identity = IdentityKeyPair::generate();
/// let signature = identity.sign(b"grant");
/// assert!(identity.public_key().verify(b"grant", &signature).is_ok());
/// ```
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generates a new random identity key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Creates an identity key pair from a 32-byte Ed25519 seed.
    ///
    /// # Errors
    /// Returns error if bytes length is incorrect.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut seed: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::key_generation(format!(
                "Invalid Ed25519 key size: expected 32, got {}",
                bytes.len()
            ))
        })?;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Self { signing_key })
    }

    /// Returns the public key component.
    #[must_use]
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// The router identity this key pair speaks for.
    #[must_use]
    pub fn router_id(&self) -> RouterId {
        RouterId::from_array(self.signing_key.verifying_key().to_bytes())
    }

    /// Signs a message, returning the 64-byte Ed25519 signature.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; ED25519_SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Exports the private seed for the key file.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print private key material
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

// ============================================
// IdentityPublicKey
// ============================================

/// Public component of an Ed25519 identity key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Creates a public key from raw bytes.
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid curve point.
    pub fn from_bytes(bytes: &[u8; ED25519_PUBLIC_KEY_SIZE]) -> Result<Self> {
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|_| CoreError::key_generation("Invalid Ed25519 public key"))?;
        Ok(Self(key))
    }

    /// Interprets a router id as the router's signing key.
    ///
    /// # Errors
    /// Returns error if the id is not a valid Ed25519 key.
    pub fn from_router_id(id: &RouterId) -> Result<Self> {
        Self::from_bytes(id.as_bytes())
    }

    /// Returns the raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Verifies a signature against this public key.
    ///
    /// # Errors
    /// Returns `SignatureVerification` error if verification fails.
    pub fn verify(&self, message: &[u8], signature: &[u8; ED25519_SIGNATURE_SIZE]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.0
            .verify(message, &sig)
            .map_err(|_| CoreError::SignatureVerification)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", hex::encode(&self.0.as_bytes()[..4]))
    }
}

/// Same hex form as the matching [`RouterId`].
impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.as_bytes()))
    }
}

impl Serialize for IdentityPublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        RouterId::from_array(self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentityPublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let id = RouterId::deserialize(deserializer)?;
        Self::from_router_id(&id).map_err(serde::de::Error::custom)
    }
}

// ============================================
// SharedSecret
// ============================================

/// Symmetric key shared between a circuit owner and one hop.
///
/// Keys the XChaCha20 layer for that hop and seeds the hop's
/// nonce-mutation constant (see [`super::kdf::derive_nonce_xor`]).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random secret.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; SHARED_SECRET_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }

    /// Constant-time equality.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sign_verify() {
        let identity = IdentityKeyPair::generate();
        let sig = identity.sign(b"exit grant");

        assert!(identity.public_key().verify(b"exit grant", &sig).is_ok());
        // Should reject a different message
        assert!(matches!(
            identity.public_key().verify(b"exit reject", &sig),
            Err(CoreError::SignatureVerification)
        ));
    }

    #[test]
    fn test_identity_roundtrip_bytes() {
        let identity = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_bytes(&identity.to_bytes()).unwrap();
        assert_eq!(identity.router_id(), restored.router_id());

        assert!(IdentityKeyPair::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_router_id_is_public_key() {
        let identity = IdentityKeyPair::generate();
        let id = identity.router_id();
        let pk = IdentityPublicKey::from_router_id(&id).unwrap();
        assert_eq!(pk, identity.public_key());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let identity = IdentityKeyPair::generate();
        let seed_hex = hex::encode(identity.to_bytes());
        assert!(!format!("{identity:?}").contains(&seed_hex));

        let secret = SharedSecret::from_bytes([7u8; 32]);
        assert_eq!(format!("{secret:?}"), "SharedSecret([REDACTED])");
    }

    #[test]
    fn test_shared_secret_ct_eq() {
        let a = SharedSecret::from_bytes([1u8; 32]);
        let b = SharedSecret::from_bytes([1u8; 32]);
        let c = SharedSecret::random();
        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_public_key_serde_json() {
        let identity = IdentityKeyPair::generate();
        let pk = identity.public_key();
        let json = serde_json::to_string(&pk).unwrap();
        // Should serialise exactly like the router id
        assert_eq!(json, serde_json::to_string(&identity.router_id()).unwrap());
        assert_eq!(pk.to_string(), identity.router_id().to_string());

        let back: IdentityPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}
