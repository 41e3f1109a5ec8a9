// ============================================
// File: crates/nyxpath-router/src/path/hop.rs
// ============================================
//! # Hop Records
//!
//! ## Creation Reason
//! Key material and ids the circuit owner keeps for each hop it built.
//!
//! ## Hop Chain
//! ```text
//!   owner ──rx0│tx0──► R0 ──rx1│tx1──► R1 ──rx2│tx2──► R2 (terminal)
//!              └── rx1 == tx0        └── rx2 == tx1
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial hop records

use std::fmt;
use std::time::Duration;

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::kdf::derive_nonce_xor;
use nyxpath_core::crypto::{SharedSecret, TunnelNonce};
use nyxpath_core::protocol::BuildCommitRecord;

use crate::error::Result;

/// One hop of a circuit this router originated.
#[derive(Clone)]
pub struct HopRecord {
    /// Router at this hop
    pub router: RouterId,
    /// Id used between this hop and the next one upstream
    pub tx_id: PathId,
    /// Id used between this hop and the previous one
    pub rx_id: PathId,
    /// Layer key shared with `router`
    pub shared: SharedSecret,
    /// Nonce mutation applied after this hop's layer
    pub nonce_xor: TunnelNonce,
    /// How long the hop stays registered at `router`
    pub lifetime: Duration,
}

impl HopRecord {
    /// Creates a hop with fresh non-zero ids.
    ///
    /// # Errors
    /// If the nonce mutation cannot be derived from `shared`.
    pub fn new(router: RouterId, shared: SharedSecret, lifetime: Duration) -> Result<Self> {
        let nonce_xor = derive_nonce_xor(&shared)?;
        Ok(Self {
            router,
            tx_id: fresh_path_id(),
            rx_id: fresh_path_id(),
            shared,
            nonce_xor,
            lifetime,
        })
    }

    /// Commit record handed to this hop during the build.
    ///
    /// `upstream` is the next router, or `None` for the terminal hop, which
    /// then names itself.
    #[must_use]
    pub fn commit_record(&self, upstream: Option<RouterId>) -> BuildCommitRecord {
        BuildCommitRecord {
            tx_id: self.tx_id,
            rx_id: self.rx_id,
            upstream: upstream.unwrap_or(self.router),
            secret: self.shared.clone(),
            lifetime: self.lifetime,
        }
    }
}

impl fmt::Debug for HopRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HopRecord")
            .field("router", &self.router)
            .field("tx_id", &self.tx_id)
            .field("rx_id", &self.rx_id)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// Random path id, never all zeroes.
pub(crate) fn fresh_path_id() -> PathId {
    loop {
        let id = PathId::generate();
        if !id.is_zero() {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_commit_names_itself() {
        let router = RouterId::from_array([9; 32]);
        let hop = HopRecord::new(router, SharedSecret::random(), Duration::from_secs(60)).unwrap();

        let record = hop.commit_record(None);
        assert_eq!(record.upstream, router);
        assert_eq!(record.tx_id, hop.tx_id);
        assert_eq!(record.rx_id, hop.rx_id);

        let next = RouterId::from_array([7; 32]);
        assert_eq!(hop.commit_record(Some(next)).upstream, next);
    }

    #[test]
    fn test_ids_differ() {
        let hop = HopRecord::new(
            RouterId::from_array([1; 32]),
            SharedSecret::random(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_ne!(hop.tx_id, hop.rx_id);
        assert!(!hop.tx_id.is_zero());
    }
}
