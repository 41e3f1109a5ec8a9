// ============================================
// File: crates/nyxpath-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! The path core addresses neighbours by router id, never by socket address.
//! These traits are the seam between that core and whatever actually moves
//! bytes (UDP in production, an in-memory hub in tests).
//!
//! ## Main Functionality
//! - `LinkTransport`: async frame transport keyed by `RouterId`
//! - `InboundFrame`: a received frame plus its authenticated sender
//! - `LinkSender`: synchronous, non-blocking send used from handler code
//!
//! ## ⚠️ Important Note for Next Developer
//! - `LinkSender::send_to` must never block or await; it is called while
//!   relay crypto runs inline on the receive task
//! - `InboundFrame::from` is the sender the anti-spoofing checks rely on;
//!   implementations must only report a sender they have authenticated
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use nyxpath_common::RouterId;

use crate::error::Result;

// ============================================
// InboundFrame
// ============================================

/// A frame received from a neighbouring router.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    /// Router the frame came from
    pub from: RouterId,
    /// Raw link frame
    pub payload: Bytes,
    /// When the frame was received
    pub received_at: Instant,
}

impl InboundFrame {
    /// Creates a frame stamped with the current time.
    #[must_use]
    pub fn new(from: RouterId, payload: Bytes) -> Self {
        Self {
            from,
            payload,
            received_at: Instant::now(),
        }
    }
}

// ============================================
// LinkTransport Trait
// ============================================

/// Async transport carrying link frames between routers.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Waits for the next inbound frame.
    ///
    /// # Errors
    /// `ShuttingDown` once the transport is closed, or a receive failure.
    async fn recv(&self) -> Result<InboundFrame>;

    /// Sends a frame to a neighbouring router.
    ///
    /// # Errors
    /// `UnknownPeer` if there is no route to `to`, or a send failure.
    async fn send(&self, to: &RouterId, payload: Bytes) -> Result<()>;

    /// Router id this transport speaks for.
    fn local_id(&self) -> RouterId;

    /// Closes the transport; pending and future operations fail.
    ///
    /// # Errors
    /// Implementation specific.
    async fn shutdown(&self) -> Result<()>;

    /// Returns `true` until `shutdown` has been called.
    fn is_active(&self) -> bool;
}

// ============================================
// LinkSender Trait
// ============================================

/// Fire-and-forget outbound interface used by path handlers.
pub trait LinkSender: Send + Sync {
    /// Queues a frame for `to`.
    ///
    /// # Errors
    /// `QueueFull` when the queue is full, `ShuttingDown` when closed.
    fn send_to(&self, to: &RouterId, frame: Bytes) -> Result<()>;

    /// Asks the link to keep its session with `router` alive until `until`.
    fn persist_session(&self, router: &RouterId, until: Instant);
}
