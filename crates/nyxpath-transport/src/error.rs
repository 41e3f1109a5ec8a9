// ============================================
// File: crates/nyxpath-transport/src/error.rs
// ============================================
//! # Transport Errors
//!
//! ## Creation Reason
//! Errors raised while moving link frames between routers.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `QueueFull` is what a caller sees when the outbound queue is full;
//!   it is transient and the frame is simply lost
//! - Peers are named by their short id (`RouterId::short`), never the full key
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use nyxpath_common::error::CommonError;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Link layer failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The UDP socket could not be bound.
    #[error("Cannot bind link socket on {addr}: {reason}")]
    BindFailed {
        /// Listen address
        addr: SocketAddr,
        /// OS message
        reason: String,
    },

    /// Another process holds the listen address.
    #[error("Listen address {addr} is taken")]
    AddressInUse {
        /// Listen address
        addr: SocketAddr,
    },

    /// A frame could not be handed to the socket or peer inbox.
    #[error("Frame to {dest} not sent: {reason}")]
    SendFailed {
        /// Short router id or socket address
        dest: String,
        /// Cause
        reason: String,
    },

    /// The receive side failed.
    #[error("Link receive failed: {reason}")]
    ReceiveFailed {
        /// Cause
        reason: String,
    },

    /// No address or inbox is known for the router.
    #[error("No link to router {peer}")]
    UnknownPeer {
        /// Short router id
        peer: String,
    },

    /// A peer or listen address string did not parse.
    #[error("Unparseable socket address {addr:?}")]
    InvalidAddress {
        /// The string given
        addr: String,
    },

    /// A bounded outbound queue refused a frame.
    #[error("{queue} is full")]
    QueueFull {
        /// Queue name
        queue: String,
    },

    /// The link is closing or closed.
    #[error("Link is shutting down")]
    ShuttingDown,

    /// System I/O failure.
    #[error("I/O error while {context}")]
    Io {
        /// What was being done
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Wrapped common error.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl TransportError {
    /// `BindFailed` constructor.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// `SendFailed` constructor.
    pub fn send_failed(dest: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SendFailed {
            dest: dest.into(),
            reason: reason.into(),
        }
    }

    /// `UnknownPeer` constructor.
    pub fn unknown_peer(peer: impl Into<String>) -> Self {
        Self::UnknownPeer { peer: peer.into() }
    }

    /// `QueueFull` constructor.
    pub fn queue_full(queue: impl Into<String>) -> Self {
        Self::QueueFull {
            queue: queue.into(),
        }
    }

    /// `Io` constructor.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if a later send of the same frame may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SendFailed { .. } | Self::ReceiveFailed { .. } | Self::QueueFull { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` for socket and peer failures, as opposed to local state.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::BindFailed { .. }
                | Self::AddressInUse { .. }
                | Self::SendFailed { .. }
                | Self::ReceiveFailed { .. }
                | Self::UnknownPeer { .. }
        )
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::io("using the link socket", err)
    }
}
