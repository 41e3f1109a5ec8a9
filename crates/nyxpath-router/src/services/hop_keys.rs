// ============================================
// File: crates/nyxpath-router/src/services/hop_keys.rs
// ============================================
//! # Hop Key Source
//!
//! ## Creation Reason
//! Each hop's layer key comes out of a key exchange with that router. The
//! exchange is not part of this crate; circuits only ask for the result.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RandomHopKeys` is only sound because build-commit records carry the
//!   secret to the hop directly. A real handshake implementation replaces
//!   it without touching circuit code.
//!
//! ## Last Modified
//! v0.1.0 - Initial hop key source

use nyxpath_common::RouterId;
use nyxpath_core::crypto::SharedSecret;

use crate::error::Result;

/// Produces the shared secret for one hop of a new circuit.
pub trait HopKeySource: Send + Sync {
    /// Negotiates (or looks up) the layer key for `router`.
    ///
    /// # Errors
    /// `HopKey` if no key could be agreed with the router.
    fn negotiate(&self, router: &RouterId) -> Result<SharedSecret>;
}

/// Fresh random secret per hop, delivered inside the commit record.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomHopKeys;

impl HopKeySource for RandomHopKeys {
    fn negotiate(&self, _router: &RouterId) -> Result<SharedSecret> {
        Ok(SharedSecret::random())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_keys_differ() {
        let router = RouterId::from_array([1; 32]);
        let a = RandomHopKeys.negotiate(&router).unwrap();
        let b = RandomHopKeys.negotiate(&router).unwrap();
        assert!(!a.ct_eq(&b));
    }
}
