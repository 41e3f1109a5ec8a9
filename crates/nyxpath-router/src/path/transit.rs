// ============================================
// File: crates/nyxpath-router/src/path/transit.rs
// ============================================
//! # Transit Hops
//!
//! ## Creation Reason
//! This router's position in a circuit someone else built. Created from a
//! single build-commit record; the relay step itself lives in
//! `handlers::relay`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A hop is terminal when its `upstream` is this router
//! - Nothing here is mutable except the send sequence
//!
//! ## Last Modified
//! v0.1.0 - Initial transit hop

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use nyxpath_common::time::unix_timestamp_millis;
use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::kdf::derive_nonce_xor;
use nyxpath_core::crypto::{SharedSecret, TunnelNonce};
use nyxpath_core::protocol::BuildCommitRecord;

use super::DEFAULT_PATH_LIFETIME;
use crate::error::Result;

/// Ids and neighbours of a transit hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransitHopInfo {
    /// Id towards `upstream`
    pub tx_id: PathId,
    /// Id towards `downstream`
    pub rx_id: PathId,
    /// Next router away from the owner
    pub upstream: RouterId,
    /// Previous router, towards the owner
    pub downstream: RouterId,
}

impl fmt::Display for TransitHopInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[tx={} rx={} upstream={} downstream={}]",
            self.tx_id,
            self.rx_id,
            self.upstream.short(),
            self.downstream.short()
        )
    }
}

/// A hop relayed for another router's circuit.
pub struct TransitHop {
    /// Ids and neighbours
    pub info: TransitHopInfo,
    shared: SharedSecret,
    nonce_xor: TunnelNonce,
    lifetime: Duration,
    created_at: Instant,
    created_ms: u64,
    sequence: AtomicU64,
}

impl TransitHop {
    /// Builds the hop described by `record`, reached from `downstream`.
    ///
    /// The requested lifetime is capped at `DEFAULT_PATH_LIFETIME`.
    ///
    /// # Errors
    /// If the nonce mutation cannot be derived.
    pub fn from_record(
        record: &BuildCommitRecord,
        downstream: RouterId,
        now: Instant,
    ) -> Result<Self> {
        Ok(Self {
            info: TransitHopInfo {
                tx_id: record.tx_id,
                rx_id: record.rx_id,
                upstream: record.upstream,
                downstream,
            },
            shared: record.secret.clone(),
            nonce_xor: derive_nonce_xor(&record.secret)?,
            lifetime: record.lifetime.min(DEFAULT_PATH_LIFETIME),
            created_at: now,
            created_ms: unix_timestamp_millis(),
            sequence: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn shared(&self) -> &SharedSecret {
        &self.shared
    }

    #[must_use]
    pub const fn nonce_xor(&self) -> TunnelNonce {
        self.nonce_xor
    }

    #[must_use]
    pub const fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Wall-clock creation time, as sent in path-confirm.
    #[must_use]
    pub const fn created_ms(&self) -> u64 {
        self.created_ms
    }

    #[must_use]
    pub fn expire_time(&self) -> Instant {
        self.created_at
            .checked_add(self.lifetime)
            .unwrap_or(self.created_at + DEFAULT_PATH_LIFETIME)
    }

    /// `now - created_at >= lifetime`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.lifetime
    }

    /// Returns `true` if `local` is the last hop of the circuit.
    #[must_use]
    pub fn is_terminal(&self, local: &RouterId) -> bool {
        self.info.upstream == *local
    }

    /// Sequence number for the next message this hop originates.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for TransitHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitHop")
            .field("info", &self.info)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(upstream: RouterId, lifetime: Duration) -> BuildCommitRecord {
        BuildCommitRecord {
            tx_id: PathId::generate(),
            rx_id: PathId::generate(),
            upstream,
            secret: SharedSecret::random(),
            lifetime,
        }
    }

    #[test]
    fn test_expiry_boundary() {
        let now = Instant::now();
        let hop = TransitHop::from_record(
            &record(RouterId::from_array([2; 32]), Duration::from_secs(10)),
            RouterId::from_array([1; 32]),
            now,
        )
        .unwrap();

        assert!(!hop.is_expired(now + Duration::from_secs(9)));
        // Should expire exactly at created_at + lifetime
        assert!(hop.is_expired(now + Duration::from_secs(10)));
        assert_eq!(hop.expire_time(), now + Duration::from_secs(10));
    }

    #[test]
    fn test_remote_lifetime_capped() {
        let now = Instant::now();
        let hop = TransitHop::from_record(
            &record(RouterId::from_array([2; 32]), Duration::from_millis(u64::MAX)),
            RouterId::from_array([1; 32]),
            now,
        )
        .unwrap();

        assert_eq!(hop.lifetime(), DEFAULT_PATH_LIFETIME);
        assert_eq!(hop.expire_time(), now + DEFAULT_PATH_LIFETIME);
        assert!(hop.is_expired(now + DEFAULT_PATH_LIFETIME));
    }

    #[test]
    fn test_terminal_and_sequence() {
        let local = RouterId::from_array([5; 32]);
        let hop = TransitHop::from_record(
            &record(local, Duration::from_secs(10)),
            RouterId::from_array([1; 32]),
            Instant::now(),
        )
        .unwrap();

        assert!(hop.is_terminal(&local));
        assert!(!hop.is_terminal(&RouterId::from_array([6; 32])));
        assert_eq!(hop.next_sequence(), 0);
        assert_eq!(hop.next_sequence(), 1);
    }
}
