// ============================================
// File: crates/nyxpath-core/src/crypto/onion.rs
// ============================================
//! # Onion Layer Crypto
//!
//! ## Creation Reason
//! Every relay cell is wrapped in one XChaCha20 layer per hop. The same
//! keystream operation adds and removes a layer, so a hop does not need to
//! know which direction a cell travels to transform it.
//!
//! ## Main Functionality
//! - `TunnelNonce`: 24-byte nonce with XOR mutation
//! - `OnionCrypto`: layer transform trait
//! - `XChaCha20Onion`: production implementation
//!
//! ## ⚠️ Important Note for Next Developer
//! - The layer is length preserving; payload sizes leak only the padded size
//! - Never reuse (secret, nonce): the terminal picks a fresh random nonce
//!   per downstream message and the client per upstream message
//!
//! ## Last Modified
//! v0.1.0 - Initial onion crypto

use std::fmt;
use std::ops::{BitXor, BitXorAssign};

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{Key, XChaCha20, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{SharedSecret, TUNNEL_NONCE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// TunnelNonce
// ============================================

/// Nonce carried alongside every relay cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelNonce([u8; TUNNEL_NONCE_SIZE]);

impl TunnelNonce {
    /// Wraps raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TUNNEL_NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses from a slice of exactly 24 bytes.
    ///
    /// # Errors
    /// Returns `Malformed` on a length mismatch.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; TUNNEL_NONCE_SIZE] = bytes
            .try_into()
            .map_err(|_| CoreError::malformed(format!("nonce must be 24 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }

    /// All-zero nonce.
    #[must_use]
    pub const fn zero() -> Self {
        Self([0u8; TUNNEL_NONCE_SIZE])
    }

    /// Fresh random nonce.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; TUNNEL_NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TUNNEL_NONCE_SIZE] {
        &self.0
    }
}

impl BitXor for TunnelNonce {
    type Output = Self;

    fn bitxor(mut self, rhs: Self) -> Self {
        self ^= rhs;
        self
    }
}

impl BitXorAssign for TunnelNonce {
    fn bitxor_assign(&mut self, rhs: Self) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Debug for TunnelNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TunnelNonce({}...)", hex::encode(&self.0[..4]))
    }
}

// ============================================
// OnionCrypto Trait
// ============================================

/// Applies or removes one onion layer in place.
pub trait OnionCrypto: Send + Sync {
    /// XORs the keystream for `(secret, nonce)` into `buf`.
    ///
    /// # Errors
    /// Returns `Encryption` if the cipher cannot be initialised.
    fn apply_layer(&self, buf: &mut [u8], secret: &SharedSecret, nonce: &TunnelNonce)
        -> Result<()>;
}

/// XChaCha20 implementation of [`OnionCrypto`].
#[derive(Debug, Default, Clone, Copy)]
pub struct XChaCha20Onion;

impl XChaCha20Onion {
    /// Creates a new instance.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl OnionCrypto for XChaCha20Onion {
    fn apply_layer(
        &self,
        buf: &mut [u8],
        secret: &SharedSecret,
        nonce: &TunnelNonce,
    ) -> Result<()> {
        let mut cipher = XChaCha20::new(
            Key::from_slice(secret.as_bytes()),
            XNonce::from_slice(nonce.as_bytes()),
        );
        cipher
            .try_apply_keystream(buf)
            .map_err(|_| CoreError::encryption("keystream exhausted"))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_is_involution() {
        let onion = XChaCha20Onion::new();
        let secret = SharedSecret::random();
        let nonce = TunnelNonce::random();

        let original = b"onion routed payload".to_vec();
        let mut buf = original.clone();
        onion.apply_layer(&mut buf, &secret, &nonce).unwrap();
        assert_ne!(buf, original);

        onion.apply_layer(&mut buf, &secret, &nonce).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn test_three_layers_peel_in_order() {
        let onion = XChaCha20Onion::new();
        let secrets: Vec<_> = (0..3).map(|_| SharedSecret::random()).collect();
        let xors: Vec<_> = (0..3).map(|_| TunnelNonce::random()).collect();
        let start = TunnelNonce::random();

        let plain = vec![0xAB; 128];
        let mut buf = plain.clone();

        // Client: encrypt with Y, then mutate per hop
        let mut y = start;
        for (s, x) in secrets.iter().zip(&xors) {
            onion.apply_layer(&mut buf, s, &y).unwrap();
            y ^= *x;
        }

        // Hops: peel with the nonce they receive, forward Y ^ x
        let mut y = start;
        for (s, x) in secrets.iter().zip(&xors) {
            onion.apply_layer(&mut buf, s, &y).unwrap();
            y ^= *x;
        }
        assert_eq!(buf, plain);
    }

    #[test]
    fn test_nonce_xor_ops() {
        let a = TunnelNonce::from_bytes([0xF0; 24]);
        let b = TunnelNonce::from_bytes([0x0F; 24]);
        assert_eq!(a ^ b, TunnelNonce::from_bytes([0xFF; 24]));
        assert_eq!(a ^ a, TunnelNonce::zero());
    }

    #[test]
    fn test_nonce_from_slice_rejects_bad_length() {
        assert!(TunnelNonce::from_slice(&[0u8; 23]).is_err());
        assert!(TunnelNonce::from_slice(&[0u8; 24]).is_ok());
    }
}
