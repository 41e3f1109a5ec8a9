// ============================================
// File: crates/nyxpath-transport/src/outbound.rs
// ============================================
//! # Outbound Frame Queue
//!
//! ## Creation Reason
//! Path handlers run synchronously (relay crypto inline on the receive
//! task) but the transport is async. The queue bridges the two: handlers
//! `try_send` and return immediately, a writer task does the awaiting.
//!
//! ## Main Functionality
//! - `OutboundQueue`: bounded queue implementing `LinkSender`
//! - `OutboundWriter`: drains the queue into a `LinkTransport`
//! - Session persistence hints (`persist_session`)
//!
//! ## Flow
//! ```text
//! handler ── send_to() ──► [ bounded mpsc ] ──► writer task ──► LinkTransport::send
//!               │                                    │
//!          QueueFull / ShuttingDown           failure: warn! + counter
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Frames are never retried; a failed send is logged and counted
//!
//! ## Last Modified
//! v0.1.0 - Initial outbound queue

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use nyxpath_common::RouterId;

use crate::error::{Result, TransportError};
use crate::traits::{LinkSender, LinkTransport};

// ============================================
// OutboundFrame
// ============================================

/// A frame waiting for the writer task.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Destination router
    pub to: RouterId,
    /// Encoded link frame
    pub frame: Bytes,
}

// ============================================
// OutboundStats
// ============================================

/// Counters for the outbound path.
#[derive(Debug, Default)]
pub struct OutboundStats {
    /// Frames accepted by `send_to`
    pub queued: AtomicU64,
    /// Frames rejected because the queue was full
    pub dropped: AtomicU64,
    /// Frames the transport accepted
    pub sent: AtomicU64,
    /// Frames the transport failed to send
    pub failed: AtomicU64,
}

impl OutboundStats {
    /// Point-in-time copy.
    #[must_use]
    pub fn snapshot(&self) -> OutboundStatsSnapshot {
        OutboundStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`OutboundStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutboundStatsSnapshot {
    /// Frames accepted by `send_to`
    pub queued: u64,
    /// Frames rejected because the queue was full
    pub dropped: u64,
    /// Frames the transport accepted
    pub sent: u64,
    /// Frames the transport failed to send
    pub failed: u64,
}

// ============================================
// OutboundQueue
// ============================================

/// Bounded outbound queue; the `LinkSender` handed to path code.
pub struct OutboundQueue {
    tx: mpsc::Sender<OutboundFrame>,
    persist: DashMap<RouterId, Instant>,
    stats: Arc<OutboundStats>,
}

impl OutboundQueue {
    /// Creates a queue holding at most `capacity` frames, plus the writer
    /// that must be run to drain it.
    #[must_use]
    pub fn new(capacity: usize) -> (Arc<Self>, OutboundWriter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(OutboundStats::default());
        let queue = Arc::new(Self {
            tx,
            persist: DashMap::new(),
            stats: Arc::clone(&stats),
        });
        (queue, OutboundWriter { rx, stats })
    }

    /// Time until which the session with `router` should be kept.
    #[must_use]
    pub fn persisted_until(&self, router: &RouterId) -> Option<Instant> {
        self.persist.get(router).map(|e| *e.value())
    }

    /// Drops persistence hints that have passed.
    pub fn prune_persist(&self, now: Instant) -> usize {
        let before = self.persist.len();
        self.persist.retain(|_, until| *until > now);
        before - self.persist.len()
    }

    /// Outbound counters.
    #[must_use]
    pub fn stats(&self) -> OutboundStatsSnapshot {
        self.stats.snapshot()
    }
}

impl LinkSender for OutboundQueue {
    fn send_to(&self, to: &RouterId, frame: Bytes) -> Result<()> {
        match self.tx.try_send(OutboundFrame { to: *to, frame }) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(TransportError::queue_full("outbound queue"))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::ShuttingDown),
        }
    }

    fn persist_session(&self, router: &RouterId, until: Instant) {
        self.persist
            .entry(*router)
            .and_modify(|current| {
                if until > *current {
                    *current = until;
                }
            })
            .or_insert(until);
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("capacity", &self.tx.max_capacity())
            .field("persisted", &self.persist.len())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

// ============================================
// OutboundWriter
// ============================================

/// Receiving half of an [`OutboundQueue`].
pub struct OutboundWriter {
    rx: mpsc::Receiver<OutboundFrame>,
    stats: Arc<OutboundStats>,
}

impl OutboundWriter {
    /// Drains frames into `transport` until shutdown or until every queue
    /// handle is dropped.
    pub async fn run(
        mut self,
        transport: Arc<dyn LinkTransport>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        debug!("Outbound writer started");
        loop {
            tokio::select! {
                next = self.rx.recv() => {
                    let Some(OutboundFrame { to, frame }) = next else {
                        break;
                    };
                    let len = frame.len();
                    match transport.send(&to, frame).await {
                        Ok(()) => {
                            self.stats.sent.fetch_add(1, Ordering::Relaxed);
                            trace!(peer = %to.short(), len, "Frame sent");
                        }
                        Err(e) => {
                            self.stats.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(peer = %to.short(), error = %e, "Frame delivery failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("Outbound writer stopped");
    }
}

// ============================================
// Tests
// ============================================
