// ============================================
// File: crates/nyxpath-router/src/services/exit.rs
// ============================================
//! # Exit Context
//!
//! ## Creation Reason
//! A terminal hop that grants exit access keeps one endpoint per client
//! path: who was granted, where traffic from the client queues up, and
//! what is waiting to go back down the circuit.
//!
//! ## Main Functionality
//! - `ExitContext`: grant / update / close decisions and endpoint table
//! - `ExitEndpoint`: per-path queues and replay state
//!
//! ## Endpoint Table
//! ```text
//! ┌──────────────────────┬─────────────────────────────────────────────┐
//! │ key: hop rx id       │ ExitEndpoint                                │
//! ├──────────────────────┼─────────────────────────────────────────────┤
//! │ 5f1c...              │ identity, expires_at, last counter,         │
//! │                      │ inbound queue (client → egress),            │
//! │                      │ outbound queue (egress → client)            │
//! └──────────────────────┴─────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Inbound packets carry an 8-byte big-endian counter; only strictly
//!   increasing counters are queued, everything else is dropped silently
//! - Actually putting inbound packets on a network is not done here
//!   (no TUN integration); they wait in the queue for `take_inbound`
//!
//! ## Last Modified
//! v0.1.0 - Initial exit context

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, trace};

use nyxpath_common::{PacketCounter, PathId};
use nyxpath_core::crypto::IdentityPublicKey;
use nyxpath_core::protocol::EXIT_FLAG_INTERNET;

// ============================================
// Constants
// ============================================

/// Size of the counter prefix on exit-traffic packets.
pub const EXIT_COUNTER_SIZE: usize = 8;

/// Packets queued per direction per endpoint before new ones are dropped.
const MAX_ENDPOINT_QUEUE: usize = 1024;

/// Backoff suggested to rejected clients.
pub const REJECT_BACKOFF: Duration = Duration::from_secs(30);

/// Exit session lifetime when the request does not ask for one.
const DEFAULT_EXIT_LIFETIME: Duration = Duration::from_secs(600);

// ============================================
// Policy
// ============================================

/// What this router is willing to offer as an exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitPolicy {
    /// Accept exit requests at all
    pub allow_exit: bool,
    /// Accept requests that ask for internet egress
    pub permit_internet: bool,
}

/// Answer to an obtain request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Endpoint created
    Granted,
    /// Refused; client should wait `backoff` before asking again
    Rejected {
        /// Suggested wait
        backoff: Duration,
    },
}

// ============================================
// ExitEndpoint
// ============================================

/// Exit session bound to one path.
#[derive(Debug)]
pub struct ExitEndpoint {
    /// Key the client signs exit control messages with
    pub identity: IdentityPublicKey,
    /// Internet egress was granted
    pub permit_internet: bool,
    /// When the session lapses
    pub expires_at: Instant,
    last_counter: PacketCounter,
    tx_counter: PacketCounter,
    inbound: VecDeque<(u64, Vec<u8>)>,
    outbound: VecDeque<Vec<u8>>,
    replays: u64,
}

impl ExitEndpoint {
    fn new(identity: IdentityPublicKey, permit_internet: bool, expires_at: Instant) -> Self {
        Self {
            identity,
            permit_internet,
            expires_at,
            last_counter: PacketCounter::new(),
            tx_counter: PacketCounter::new(),
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            replays: 0,
        }
    }

    /// Counter of the last inbound packet accepted.
    #[must_use]
    pub const fn last_counter(&self) -> u64 {
        self.last_counter.value()
    }

    /// Inbound packets dropped as replays.
    #[must_use]
    pub const fn replays(&self) -> u64 {
        self.replays
    }
}

/// Serialisable view of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ExitEndpointStatus {
    /// Hop rx id the endpoint is bound to
    pub path: PathId,
    /// Client identity
    pub identity: IdentityPublicKey,
    /// Internet egress granted
    pub permit_internet: bool,
    /// Inbound packets waiting
    pub inbound_queued: usize,
    /// Outbound packets waiting
    pub outbound_queued: usize,
    /// Replays dropped
    pub replays: u64,
}

// ============================================
// ExitContext
// ============================================

/// Exit endpoints served by this router.
pub struct ExitContext {
    policy: ExitPolicy,
    endpoints: DashMap<PathId, ExitEndpoint>,
}

impl ExitContext {
    #[must_use]
    pub fn new(policy: ExitPolicy) -> Self {
        Self {
            policy,
            endpoints: DashMap::new(),
        }
    }

    /// The policy this context applies.
    #[must_use]
    pub const fn policy(&self) -> ExitPolicy {
        self.policy
    }

    /// Decides an obtain request arriving on `path` and creates the
    /// endpoint when granted.
    pub fn obtain(
        &self,
        path: PathId,
        identity: IdentityPublicKey,
        flags: u64,
        lifetime_ms: u64,
        now: Instant,
    ) -> ExitDecision {
        let wants_internet = flags & EXIT_FLAG_INTERNET != 0;
        if !self.policy.allow_exit || (wants_internet && !self.policy.permit_internet) {
            debug!(path = %path, wants_internet, "Exit request rejected by policy");
            return ExitDecision::Rejected {
                backoff: REJECT_BACKOFF,
            };
        }

        let lifetime = if lifetime_ms == 0 {
            DEFAULT_EXIT_LIFETIME
        } else {
            Duration::from_millis(lifetime_ms).min(DEFAULT_EXIT_LIFETIME)
        };
        let replaced = self.endpoints.insert(
            path,
            ExitEndpoint::new(identity, wants_internet, now + lifetime),
        );
        if let Some(previous) = replaced {
            debug!(
                path = %path,
                previous = %previous.identity,
                dropped = previous.inbound.len() + previous.outbound.len(),
                "Exit endpoint replaced by a new grant"
            );
        }
        info!(path = %path, client = %identity, "Exit granted");
        ExitDecision::Granted
    }

    /// Moves the endpoint bound to `from` onto `to`.
    ///
    /// The client numbers packets per circuit, so the replay window starts
    /// over on the new path.
    ///
    /// Returns `false` if there was nothing to move.
    pub fn update(&self, from: &PathId, to: PathId) -> bool {
        let Some((_, mut endpoint)) = self.endpoints.remove(from) else {
            return false;
        };
        endpoint.last_counter = PacketCounter::new();
        debug!(from = %from, to = %to, "Exit endpoint moved");
        self.endpoints.insert(to, endpoint);
        true
    }

    /// Identity the endpoint on `path` was granted to.
    #[must_use]
    pub fn identity(&self, path: &PathId) -> Option<IdentityPublicKey> {
        self.endpoints.get(path).map(|e| e.identity)
    }

    /// Removes the endpoint on `path`.
    pub fn close(&self, path: &PathId) -> bool {
        let removed = self.endpoints.remove(path).is_some();
        if removed {
            info!(path = %path, "Exit closed");
        }
        removed
    }

    /// Returns `true` if `path` has an endpoint.
    #[must_use]
    pub fn has_endpoint(&self, path: &PathId) -> bool {
        self.endpoints.contains_key(path)
    }

    /// Number of endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Queues counter-prefixed packets from the client.
    ///
    /// Returns the number accepted, or `None` when `path` has no endpoint.
    pub fn queue_inbound(&self, path: &PathId, packets: &[Vec<u8>]) -> Option<usize> {
        let mut endpoint = self.endpoints.get_mut(path)?;
        let mut accepted = 0;
        for packet in packets {
            let Some((counter, body)) = split_counter(packet) else {
                continue;
            };
            if !counter.is_newer_than(&endpoint.last_counter) {
                endpoint.replays += 1;
                trace!(path = %path, counter = counter.value(), "Exit packet replay dropped");
                continue;
            }
            if endpoint.inbound.len() >= MAX_ENDPOINT_QUEUE {
                break;
            }
            endpoint.last_counter = counter;
            endpoint.inbound.push_back((counter.value(), body.to_vec()));
            accepted += 1;
        }
        Some(accepted)
    }

    /// Takes everything queued from the client on `path`.
    pub fn take_inbound(&self, path: &PathId) -> Vec<(u64, Vec<u8>)> {
        self.endpoints
            .get_mut(path)
            .map(|mut e| e.inbound.drain(..).collect())
            .unwrap_or_default()
    }

    /// Queues a packet to go back to the client on `path`.
    ///
    /// Returns `false` if there is no endpoint or its queue is full.
    pub fn queue_outbound(&self, path: &PathId, packet: Vec<u8>) -> bool {
        let Some(mut endpoint) = self.endpoints.get_mut(path) else {
            return false;
        };
        if endpoint.outbound.len() >= MAX_ENDPOINT_QUEUE {
            return false;
        }
        endpoint.outbound.push_back(packet);
        true
    }

    /// Drains the outbound queue of `path`, prefixing each packet with the
    /// next counter.
    pub fn drain_outbound(&self, path: &PathId) -> Vec<Vec<u8>> {
        let Some(mut endpoint) = self.endpoints.get_mut(path) else {
            return Vec::new();
        };
        let queued: Vec<Vec<u8>> = endpoint.outbound.drain(..).collect();
        queued
            .into_iter()
            .map(|packet| {
                let counter = endpoint.tx_counter.advance();
                let mut framed = Vec::with_capacity(EXIT_COUNTER_SIZE + packet.len());
                framed.extend_from_slice(&counter.to_be_bytes());
                framed.extend_from_slice(&packet);
                framed
            })
            .collect()
    }

    /// Paths with outbound packets waiting.
    #[must_use]
    pub fn pending_outbound(&self) -> Vec<PathId> {
        self.endpoints
            .iter()
            .filter(|e| !e.outbound.is_empty())
            .map(|e| *e.key())
            .collect()
    }

    /// Removes lapsed endpoints.
    pub fn expire(&self, now: Instant) -> usize {
        let before = self.endpoints.len();
        self.endpoints.retain(|_, e| e.expires_at > now);
        let removed = before - self.endpoints.len();
        if removed > 0 {
            debug!("Expired {} exit endpoints", removed);
        }
        removed
    }

    /// Snapshot of all endpoints.
    #[must_use]
    pub fn status(&self) -> Vec<ExitEndpointStatus> {
        self.endpoints
            .iter()
            .map(|e| ExitEndpointStatus {
                path: *e.key(),
                identity: e.identity,
                permit_internet: e.permit_internet,
                inbound_queued: e.inbound.len(),
                outbound_queued: e.outbound.len(),
                replays: e.replays,
            })
            .collect()
    }
}

impl std::fmt::Debug for ExitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitContext")
            .field("policy", &self.policy)
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

/// Splits an exit-traffic packet into counter and body.
///
/// Packets of `EXIT_COUNTER_SIZE` bytes or less carry nothing and yield `None`.
#[must_use]
pub fn split_counter(packet: &[u8]) -> Option<(PacketCounter, &[u8])> {
    if packet.len() <= EXIT_COUNTER_SIZE {
        return None;
    }
    let (head, body) = packet.split_at(EXIT_COUNTER_SIZE);
    let mut raw = [0u8; EXIT_COUNTER_SIZE];
    raw.copy_from_slice(head);
    Some((PacketCounter::from_raw(u64::from_be_bytes(raw)), body))
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use nyxpath_core::crypto::IdentityKeyPair;

    fn open_policy() -> ExitPolicy {
        ExitPolicy {
            allow_exit: true,
            permit_internet: true,
        }
    }

    fn packet(counter: u64, body: &[u8]) -> Vec<u8> {
        let mut p = counter.to_be_bytes().to_vec();
        p.extend_from_slice(body);
        p
    }

    #[test]
    fn test_policy_rejects() {
        let client = IdentityKeyPair::generate().public_key();
        let now = Instant::now();

        let closed = ExitContext::new(ExitPolicy::default());
        assert!(matches!(
            closed.obtain(PathId::generate(), client, 0, 0, now),
            ExitDecision::Rejected { .. }
        ));

        let no_internet = ExitContext::new(ExitPolicy {
            allow_exit: true,
            permit_internet: false,
        });
        assert!(matches!(
            no_internet.obtain(PathId::generate(), client, EXIT_FLAG_INTERNET, 0, now),
            ExitDecision::Rejected { .. }
        ));
        assert_eq!(
            no_internet.obtain(PathId::generate(), client, 0, 0, now),
            ExitDecision::Granted
        );
    }

    #[test]
    fn test_inbound_counters_strictly_increase() {
        let exit = ExitContext::new(open_policy());
        let path = PathId::generate();
        let client = IdentityKeyPair::generate().public_key();
        exit.obtain(path, client, EXIT_FLAG_INTERNET, 0, Instant::now());

        let accepted = exit
            .queue_inbound(
                &path,
                &[
                    packet(1, b"a"),
                    packet(3, b"b"),
                    packet(2, b"late"),
                    packet(3, b"dup"),
                    vec![0; 8],
                    packet(4, b"c"),
                ],
            )
            .unwrap();
        assert_eq!(accepted, 3);

        let queued = exit.take_inbound(&path);
        let counters: Vec<u64> = queued.iter().map(|(c, _)| *c).collect();
        assert_eq!(counters, vec![1, 3, 4]);
        assert_eq!(queued[1].1, b"b");
    }

    #[test]
    fn test_no_endpoint() {
        let exit = ExitContext::new(open_policy());
        assert!(exit.queue_inbound(&PathId::generate(), &[packet(1, b"x")]).is_none());
        assert!(!exit.queue_outbound(&PathId::generate(), b"x".to_vec()));
    }

    #[test]
    fn test_update_and_close() {
        let exit = ExitContext::new(open_policy());
        let old = PathId::generate();
        let new = PathId::generate();
        let client = IdentityKeyPair::generate().public_key();
        exit.obtain(old, client, 0, 0, Instant::now());

        assert_eq!(exit.queue_inbound(&old, &[packet(1, b"a"), packet(5, b"b")]), Some(2));

        assert!(exit.update(&old, new));
        assert!(!exit.has_endpoint(&old));
        assert_eq!(exit.identity(&new), Some(client));

        // Should accept the new circuit's counters, which start over at 1
        assert_eq!(exit.queue_inbound(&new, &[packet(1, b"c"), packet(2, b"d")]), Some(2));
        let counters: Vec<u64> = exit.take_inbound(&new).iter().map(|(c, _)| *c).collect();
        assert_eq!(counters, vec![1, 5, 1, 2]);
        assert_eq!(exit.queue_inbound(&new, &[packet(2, b"dup")]), Some(0));

        assert!(exit.close(&new));
        assert!(exit.is_empty());
    }

    #[test]
    fn test_obtain_again_replaces_endpoint() {
        let exit = ExitContext::new(open_policy());
        let path = PathId::generate();
        let first = IdentityKeyPair::generate().public_key();
        let second = IdentityKeyPair::generate().public_key();
        let now = Instant::now();
        exit.obtain(path, first, 0, 0, now);
        assert_eq!(exit.queue_inbound(&path, &[packet(9, b"old")]), Some(1));

        assert_eq!(exit.obtain(path, second, 0, 0, now), ExitDecision::Granted);
        assert_eq!(exit.len(), 1);
        assert_eq!(exit.identity(&path), Some(second));
        // Should start from a clean endpoint
        assert!(exit.take_inbound(&path).is_empty());
        assert_eq!(exit.queue_inbound(&path, &[packet(1, b"new")]), Some(1));
    }

    #[test]
    fn test_outbound_framing() {
        let exit = ExitContext::new(open_policy());
        let path = PathId::generate();
        exit.obtain(path, IdentityKeyPair::generate().public_key(), 0, 0, Instant::now());

        assert!(exit.queue_outbound(&path, b"one".to_vec()));
        assert!(exit.queue_outbound(&path, b"two".to_vec()));
        assert_eq!(exit.pending_outbound(), vec![path]);

        let framed = exit.drain_outbound(&path);
        assert_eq!(framed.len(), 2);
        let (c1, b1) = split_counter(&framed[0]).unwrap();
        let (c2, _) = split_counter(&framed[1]).unwrap();
        assert_eq!(b1, b"one");
        assert!(c2.is_newer_than(&c1));
        assert!(exit.pending_outbound().is_empty());
    }

    #[test]
    fn test_expire() {
        let exit = ExitContext::new(open_policy());
        let now = Instant::now();
        exit.obtain(PathId::generate(), IdentityKeyPair::generate().public_key(), 0, 1_000, now);
        assert_eq!(exit.expire(now), 0);
        assert_eq!(exit.expire(now + Duration::from_secs(2)), 1);
    }
}
