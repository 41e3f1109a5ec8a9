// ============================================
// File: crates/nyxpath-core/src/crypto/kdf.rs
// ============================================
//! # Key Derivation Functions
//!
//! ## Main Functionality
//! - `derive_nonce_xor`: per-hop nonce-mutation constant
//! - `hkdf_expand`: generic HKDF-SHA256 expansion
//!
//! ## Derivation
//! ```text
//! nonce_xor = HKDF-SHA256(
//!     ikm:  hop shared secret,
//!     salt: "nyxpath-v1",
//!     info: "nyxpath-nonce-xor"
//! )[0..24]
//! ```
//! Both the circuit owner and the hop hold the shared secret, so both sides
//! arrive at the same constant without it ever crossing the wire.
//!
//! ## Last Modified
//! v0.1.0 - Initial KDF implementation

use hkdf::Hkdf;
use sha2::Sha256;

use super::onion::TunnelNonce;
use super::{SharedSecret, HKDF_SALT, NONCE_XOR_INFO, TUNNEL_NONCE_SIZE};
use crate::error::{CoreError, Result};

// ============================================
// Key Derivation
// ============================================

/// Derives the nonce-mutation constant for one hop.
///
/// # Errors
/// Only fails if HKDF rejects the output length, which cannot happen for
/// 24 bytes; the `Result` keeps the signature aligned with `hkdf_expand`.
pub fn derive_nonce_xor(secret: &SharedSecret) -> Result<TunnelNonce> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret.as_bytes());
    let mut out = [0u8; TUNNEL_NONCE_SIZE];
    hk.expand(NONCE_XOR_INFO, &mut out)
        .map_err(|_| CoreError::KeyDerivation {
            reason: "HKDF expansion failed for nonce xor".into(),
        })?;
    Ok(TunnelNonce::from_bytes(out))
}

/// Derives key material of arbitrary length.
///
/// # Errors
/// Returns `KeyDerivation` if `output_len` exceeds 255 * 32 bytes.
pub fn hkdf_expand(
    secret: &[u8],
    salt: &[u8],
    info: &[u8],
    output_len: usize,
) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);

    let mut output = vec![0u8; output_len];
    hk.expand(info, &mut output)
        .map_err(|_| CoreError::KeyDerivation {
            reason: format!("HKDF expansion failed for {output_len} bytes"),
        })?;

    Ok(output)
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_xor_deterministic() {
        let secret = SharedSecret::from_bytes([0x42; 32]);
        let a = derive_nonce_xor(&secret).unwrap();
        let b = derive_nonce_xor(&secret).unwrap();
        assert_eq!(a, b);
        // Should not be all zeros
        assert_ne!(a, TunnelNonce::zero());
    }

    #[test]
    fn test_nonce_xor_differs_per_secret() {
        let a = derive_nonce_xor(&SharedSecret::from_bytes([1; 32])).unwrap();
        let b = derive_nonce_xor(&SharedSecret::from_bytes([2; 32])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hkdf_expand_lengths() {
        let out = hkdf_expand(b"ikm", b"salt", b"info", 64).unwrap();
        assert_eq!(out.len(), 64);
        assert!(hkdf_expand(b"ikm", b"salt", b"info", 255 * 32 + 1).is_err());
    }
}
