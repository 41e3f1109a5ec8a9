// ============================================
// File: crates/nyxpath-router/src/services/profiling.rs
// ============================================
//! # Router Profiling
//!
//! ## Creation Reason
//! Circuits that fail to build or die are evidence against the routers on
//! them. Hop selection consults these counters to avoid routers that keep
//! failing.
//!
//! ## Scoring Rules
//! ```text
//! path fail    : fails += 1 for every hop except the first
//!                (we hold a direct link to it, so it is not the suspect)
//! path success : fails /= 2, successes += hop count, for every hop
//! decay        : every 30s all counters are halved
//! bad router   : fails >= 4 && fails > 2 * successes
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Profiles live in memory only; a restart forgets them
//!
//! ## Last Modified
//! v0.1.0 - Initial profiling service

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use nyxpath_common::RouterId;

// ============================================
// Constants
// ============================================

/// Minimum failures before a router can be considered bad.
const BAD_FAIL_THRESHOLD: u64 = 4;

/// How often counters are halved.
const DECAY_INTERVAL: Duration = Duration::from_secs(30);

// ============================================
// Profiler Trait
// ============================================

/// Outcome reporting used by circuits.
pub trait Profiler: Send + Sync {
    /// The circuit through `hops` was confirmed.
    fn report_path_success(&self, hops: &[RouterId]);

    /// The circuit through `hops` timed out or died.
    fn report_path_fail(&self, hops: &[RouterId]);

    /// Returns `true` if `router` should not be picked for new circuits.
    fn is_bad(&self, router: &RouterId) -> bool;
}

// ============================================
// RouterProfile
// ============================================

/// Counters kept per router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterProfile {
    /// Weighted circuit successes
    pub successes: u64,
    /// Circuit failures
    pub fails: u64,
}

impl RouterProfile {
    /// Applies the bad-router rule.
    #[must_use]
    pub const fn is_bad(&self) -> bool {
        self.fails >= BAD_FAIL_THRESHOLD && self.fails > self.successes.saturating_mul(2)
    }

    fn decay(&mut self) {
        self.successes /= 2;
        self.fails /= 2;
    }
}

// ============================================
// RouterProfiling
// ============================================

/// In-memory [`Profiler`].
pub struct RouterProfiling {
    profiles: DashMap<RouterId, RouterProfile>,
    last_decay: Mutex<Instant>,
}

impl RouterProfiling {
    #[must_use]
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
            last_decay: Mutex::new(Instant::now()),
        }
    }

    /// Current counters for `router`.
    #[must_use]
    pub fn profile(&self, router: &RouterId) -> Option<RouterProfile> {
        self.profiles.get(router).map(|p| *p.value())
    }

    /// Number of profiled routers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Halves all counters if the decay interval has passed.
    ///
    /// Returns `true` if a decay happened.
    pub fn decay_if_due(&self, now: Instant) -> bool {
        let mut last = self.last_decay.lock();
        if now.saturating_duration_since(*last) < DECAY_INTERVAL {
            return false;
        }
        *last = now;
        drop(last);

        for mut entry in self.profiles.iter_mut() {
            entry.value_mut().decay();
        }
        self.profiles
            .retain(|_, p| p.successes > 0 || p.fails > 0);
        trace!(profiles = self.profiles.len(), "Router profiles decayed");
        true
    }
}

impl Default for RouterProfiling {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for RouterProfiling {
    fn report_path_success(&self, hops: &[RouterId]) {
        let weight = hops.len() as u64;
        for hop in hops {
            let mut profile = self.profiles.entry(*hop).or_default();
            profile.fails /= 2;
            profile.successes = profile.successes.saturating_add(weight);
        }
    }

    fn report_path_fail(&self, hops: &[RouterId]) {
        for hop in hops.iter().skip(1) {
            let mut profile = self.profiles.entry(*hop).or_default();
            profile.fails = profile.fails.saturating_add(1);
            if profile.is_bad() {
                debug!(router = %hop.short(), fails = profile.fails, "Router marked bad");
            }
        }
    }

    fn is_bad(&self, router: &RouterId) -> bool {
        self.profiles.get(router).is_some_and(|p| p.is_bad())
    }
}

impl std::fmt::Debug for RouterProfiling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterProfiling")
            .field("profiles", &self.profiles.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
