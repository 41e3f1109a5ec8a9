// ============================================
// File: crates/nyxpath-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Path ids and router ids flow through every layer (link frames, relay
//! cells, registry keys, routing messages) and need one strongly typed
//! representation instead of loose byte arrays.
//!
//! ## Main Functionality
//! - `PathId`: 16 random bytes naming one direction-endpoint of a hop
//! - `RouterId`: 32-byte ed25519 public key identifying a router
//! - `PacketCounter`: strictly increasing counter for exit traffic
//!
//! ## Main Logical Flow
//! 1. `PathId`s are generated per hop when a circuit is constructed
//! 2. They travel in relay cells and build-commit records
//! 3. The registry keys both of its tables on them
//!
//! ## ⚠️ Important Note for Next Developer
//! - `PathId` must come from the thread CSPRNG; collisions would merge paths
//! - Both ids are `Copy`: they are public identifiers, not secrets
//! - Human readable form is lowercase hex for both types
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

// ============================================
// Constants
// ============================================

/// Size of a `PathId` in bytes.
pub const PATH_ID_SIZE: usize = 16;

/// Size of a `RouterId` in bytes.
pub const ROUTER_ID_SIZE: usize = 32;

// ============================================
// IdParseError
// ============================================

/// Error type for id parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdParseError {
    /// Hex decoding failed
    InvalidHex(String),
    /// Decoded bytes have wrong length
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual decoded length
        actual: usize,
    },
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex(msg) => write!(f, "Invalid hex: {msg}"),
            Self::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for IdParseError {}

// ============================================
// PathId
// ============================================

/// Identifier for one direction-endpoint of a hop.
///
/// Every hop in a circuit has a `txID` and an `rxID`; the `txID` of hop `i`
/// is the `rxID` of hop `i + 1`.
///
/// # Wire Format
/// ```text
/// ┌────────────────────────────────────┐
/// │         Path ID (16 bytes)         │
/// └────────────────────────────────────┘
/// ```
///
/// # Example
/// ```
/// use nyxpath_common::types::PathId;
///
/// let id = PathId::generate();
/// let restored = PathId::from_bytes(id.as_bytes()).unwrap();
/// assert_eq!(id, restored);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PathId([u8; PATH_ID_SIZE]);

impl PathId {
    /// Creates a `PathId` from raw bytes, `None` if the length is not 16.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; PATH_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Wraps a fixed-size array.
    #[must_use]
    pub const fn from_array(bytes: [u8; PATH_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generates a new random `PathId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; PATH_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; PATH_ID_SIZE] {
        &self.0
    }

    /// Returns `true` for the all-zero id, which is never generated.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PathId({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PathId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| IdParseError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes).ok_or(IdParseError::InvalidLength {
            expected: PATH_ID_SIZE,
            actual: bytes.len(),
        })
    }
}

impl Serialize for PathId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for PathId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_bytes(&bytes)
                .ok_or_else(|| serde::de::Error::invalid_length(bytes.len(), &"16 bytes"))
        }
    }
}

impl AsRef<[u8]> for PathId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// RouterId
// ============================================

/// Identity of a router: its ed25519 public key.
///
/// Exit negotiation verifies signatures directly against the terminal
/// hop's `RouterId`, so it must stay the raw public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouterId([u8; ROUTER_ID_SIZE]);

impl RouterId {
    /// Creates a `RouterId` from raw bytes, `None` if the length is not 32.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; ROUTER_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Wraps a fixed-size array.
    #[must_use]
    pub const fn from_array(bytes: [u8; ROUTER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ROUTER_ID_SIZE] {
        &self.0
    }

    /// Short hex prefix used in log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouterId({}...)", self.short())
    }
}

impl fmt::Display for RouterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for RouterId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| IdParseError::InvalidHex(e.to_string()))?;
        Self::from_bytes(&bytes).ok_or(IdParseError::InvalidLength {
            expected: ROUTER_ID_SIZE,
            actual: bytes.len(),
        })
    }
}

impl Serialize for RouterId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for RouterId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let bytes = <Vec<u8>>::deserialize(deserializer)?;
            Self::from_bytes(&bytes)
                .ok_or_else(|| serde::de::Error::invalid_length(bytes.len(), &"32 bytes"))
        }
    }
}

impl AsRef<[u8]> for RouterId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

// ============================================
// Counter
// ============================================

/// Counter prefixed to every exit-traffic packet.
///
/// Receivers only accept a packet whose counter is strictly newer than the
/// last one accepted on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct PacketCounter(u64);

impl PacketCounter {
    /// Creates a new counter with value 0.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Creates a counter from a raw u64 value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the counter as big-endian bytes (exit-traffic wire order).
    #[must_use]
    pub const fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Advances the counter and returns the new value, saturating at `u64::MAX`.
    pub fn advance(&mut self) -> Self {
        self.0 = self.0.saturating_add(1);
        *self
    }

    /// Checks if this counter is greater than another.
    #[must_use]
    pub const fn is_newer_than(&self, other: &Self) -> bool {
        self.0 > other.0
    }
}

impl From<u64> for PacketCounter {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PacketCounter> for u64 {
    fn from(counter: PacketCounter) -> Self {
        counter.0
    }
}

// ============================================
// Tests
// ============================================
