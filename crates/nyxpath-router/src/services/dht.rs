// ============================================
// File: crates/nyxpath-router/src/services/dht.rs
// ============================================
//! # Tunnelled DHT Boundary
//!
//! ## Creation Reason
//! DHT lookups may travel inside circuits (`M` messages). The DHT itself is
//! a separate subsystem; circuits and terminal hops only hand the inner
//! messages over and send back whatever it answers.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `handle` is called from the relay path; it must not block
//!
//! ## Last Modified
//! v0.1.0 - Initial DHT boundary

use tracing::trace;

use nyxpath_common::PathId;
use nyxpath_core::protocol::Value;

/// DHT collaborator reached through circuits.
pub trait DhtHandler: Send + Sync {
    /// Handles one inner DHT message that arrived on `path`.
    ///
    /// Returns a reply to send back along the same path, if any.
    fn handle(&self, path: PathId, msg: &Value) -> Option<Value>;
}

/// Drops every DHT message. Used when the router runs without a DHT.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDht;

impl DhtHandler for NullDht {
    fn handle(&self, path: PathId, _msg: &Value) -> Option<Value> {
        trace!(path = %path, "DHT message dropped, no DHT attached");
        None
    }
}
