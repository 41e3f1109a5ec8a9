// ============================================
// File: crates/nyxpath-common/src/lib.rs
// ============================================
//! # nyxpath Common - Shared Types Library
//!
//! ## Creation Reason
//! Holds the identifiers and time helpers that every nyxpath crate needs,
//! so path ids and router ids have exactly one definition.
//!
//! ## Main Functionality
//! - [`types`]: `PathId`, `RouterId`, `PacketCounter`
//! - [`time`]: millisecond helpers for message fields
//! - [`error`]: `CommonError` and the crate `Result` alias
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               nyxpath-router                        │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   nyxpath-core         nyxpath-transport            │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             nyxpath-common  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Leaf crate: no internal dependencies, keep external ones small
//! - `PathId` is 16 random bytes and must come from a CSPRNG
//! - `RouterId` is the router's ed25519 public key, not a hash of it
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use types::{PacketCounter, PathId, RouterId, PATH_ID_SIZE, ROUTER_ID_SIZE};
