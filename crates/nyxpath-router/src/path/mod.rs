// ============================================
// File: crates/nyxpath-router/src/path/mod.rs
// ============================================
//! # Path Model
//!
//! ## Creation Reason
//! Everything about a single circuit: the hops we originate (`Circuit`),
//! the hops we relay for others (`TransitHop`), and the owner that keeps a
//! group of circuits alive (`PathSet`).
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`hop`]: per-hop key material of an originated circuit
//! - [`circuit`]: onion layering and the client-side state machine
//! - [`transit`]: bookkeeping for hops relayed for someone else
//! - [`pathset`]: circuit arena, maintenance and owner hooks
//!
//! ## Circuit State Machine
//! ```text
//!   ┌──────────┐  latency reply   ┌─────────────┐  now >= expiry  ┌─────────┐
//!   │ Building │ ───────────────► │ Established │ ──────────────► │ Expired │
//!   └────┬─────┘                  └──────┬──────┘                 └─────────┘
//!        │ 30s without reply             │ 10s silent (exit/service)
//!        ▼                               ▼
//!   ┌─────────────────────────────────────────┐
//!   │               Timeout                   │
//!   └─────────────────────────────────────────┘
//! ```
//! No state ever returns to `Building`.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers return `HandleOutcome` rather than errors: malformed or
//!   unwarranted traffic is dropped and logged, never answered
//!
//! ## Last Modified
//! v0.1.0 - Initial path model

pub mod circuit;
pub mod hop;
pub mod pathset;
pub mod transit;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::OnionCrypto;
use nyxpath_core::protocol::Value;
use nyxpath_transport::LinkSender;

use crate::services::{DhtHandler, Profiler};

// Re-export primary types
pub use circuit::{Circuit, CircuitStatus};
pub use hop::HopRecord;
pub use pathset::{LoggingHooks, PathSet, PathSetConfig, PathSetHooks};
pub use transit::{TransitHop, TransitHopInfo};

// ============================================
// Constants
// ============================================

/// How long a circuit may stay `Building`.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(30);

/// Silence after which an exit or service circuit is considered dead.
pub const ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between latency probes on an established circuit.
pub const LATENCY_INTERVAL: Duration = Duration::from_secs(5);

/// Default hop lifetime.
pub const DEFAULT_PATH_LIFETIME: Duration = Duration::from_secs(600);

/// Most hops a circuit may have.
pub const MAX_HOPS: usize = 8;

/// A timed-out circuit is kept this long after its last message before
/// it is removed.
pub const PATH_REANIMATION_TIMEOUT: Duration = Duration::from_secs(45);

/// Window used by `expires_soon` when picking circuits for new traffic.
pub const EXPIRES_SOON_DELTA: Duration = Duration::from_secs(5);

// ============================================
// PathStatus
// ============================================

/// Lifecycle state of an originated circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    /// Commit sent, waiting for confirm and first latency reply
    Building,
    /// Usable
    Established,
    /// Build or liveness timeout
    Timeout,
    /// Lifetime ran out
    Expired,
}

impl PathStatus {
    /// Returns `true` if moving from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Building, Self::Established | Self::Timeout)
                | (Self::Established, Self::Timeout | Self::Expired)
        )
    }

    /// Returns `true` for states a circuit never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Timeout | Self::Expired)
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Established => write!(f, "established"),
            Self::Timeout => write!(f, "timeout"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

// ============================================
// PathRoles
// ============================================

/// Role bitmask of a circuit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PathRoles(u8);

impl PathRoles {
    /// No roles.
    pub const NONE: Self = Self(0);
    /// Carries exit traffic.
    pub const EXIT: Self = Self(1);
    /// Carries hidden-service traffic.
    pub const SERVICE: Self = Self(1 << 1);
    /// Plain client circuit.
    pub const CLIENT: Self = Self(1 << 2);

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Role names, for status output.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::EXIT) {
            names.push("exit");
        }
        if self.contains(Self::SERVICE) {
            names.push("service");
        }
        if self.contains(Self::CLIENT) {
            names.push("client");
        }
        names
    }
}

impl std::ops::BitOr for PathRoles {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PathRoles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PathRoles({})", self.names().join("|"))
    }
}

impl Serialize for PathRoles {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.names().serialize(serializer)
    }
}

// ============================================
// Handler Outcomes
// ============================================

/// Why an inbound message or cell was not acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// No path under that id for that sender
    NoSuchPath,
    /// Could not be decoded
    Malformed,
    /// Layer crypto failed
    Crypto,
    /// Not valid in the circuit's current state
    WrongState,
    /// Latency reply for a probe we did not send
    TokenMismatch,
    /// Exit signature did not verify
    BadSignature,
    /// Exit reply for a transaction we did not start
    TxMismatch,
    /// Traffic for a role the circuit does not hold
    MissingRole,
    /// A kind this side never legitimately receives
    Unwarranted,
    /// Could not be forwarded
    SendFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSuchPath => "no such path",
            Self::Malformed => "malformed",
            Self::Crypto => "crypto failure",
            Self::WrongState => "wrong state",
            Self::TokenMismatch => "token mismatch",
            Self::BadSignature => "bad signature",
            Self::TxMismatch => "transaction mismatch",
            Self::MissingRole => "missing role",
            Self::Unwarranted => "unwarranted",
            Self::SendFailed => "send failed",
        };
        f.write_str(s)
    }
}

/// Result of handing a message or cell to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Acted on
    Accepted,
    /// Ignored, with the reason
    Dropped(DropReason),
}

impl HandleOutcome {
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

// ============================================
// Circuit Events
// ============================================

/// Side effects a circuit reports to its owning `PathSet`.
///
/// Collected while the arena lock is held and dispatched to
/// [`PathSetHooks`] after it is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitEvent {
    /// First latency reply received
    Ready,
    /// Never confirmed within `BUILD_TIMEOUT`
    BuildTimeout,
    /// Went silent while established
    PathDied,
    /// Terminal hop could not deliver data for `path_id`
    DataDropped {
        /// Path the data was addressed to
        path_id: PathId,
    },
    /// Hidden-service frame for the owner
    HiddenServiceFrame(Vec<u8>),
    /// Inner DHT messages, answered by the DHT once the arena is unlocked
    Dht(Vec<Value>),
    /// Exit traffic for the owner
    ExitTraffic {
        /// Packet counter
        counter: u64,
        /// Packet without its counter prefix
        packet: Vec<u8>,
    },
    /// Exit granted
    ExitGranted {
        /// Obtain transaction
        tx_id: u64,
    },
    /// Exit refused
    ExitRejected {
        /// Obtain transaction
        tx_id: u64,
        /// Suggested wait
        backoff_ms: u64,
    },
    /// Exit session moved onto this circuit
    ExitUpdated {
        /// Update transaction
        tx_id: u64,
    },
    /// Exit closed by the terminal hop
    ExitClosed,
}

// ============================================
// PathEnv
// ============================================

/// Collaborators shared by every circuit, relay and endpoint on a router.
#[derive(Clone)]
pub struct PathEnv {
    /// This router
    pub local: RouterId,
    /// Outbound frames
    pub link: Arc<dyn LinkSender>,
    /// Hop layer cipher
    pub onion: Arc<dyn OnionCrypto>,
    /// Build and liveness outcomes
    pub profiler: Arc<dyn Profiler>,
    /// Tunnelled DHT
    pub dht: Arc<dyn DhtHandler>,
}

impl fmt::Debug for PathEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathEnv")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
