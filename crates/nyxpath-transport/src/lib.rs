// ============================================
// File: crates/nyxpath-transport/src/lib.rs
// ============================================
//! # nyxpath Transport - Link Layer
//!
//! ## Creation Reason
//! Moves opaque link frames between neighbouring routers. The path core
//! above never sees sockets, only router ids.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `LinkTransport` and `LinkSender` seams
//! - [`udp`]: UDP implementation with a static peer table
//! - [`memory`]: in-process hub for multi-router tests
//! - [`outbound`]: bounded queue between sync handlers and async links
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              nyxpath-router                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   nyxpath-core         nyxpath-transport            │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             nyxpath-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! path handlers ──► OutboundQueue ──► writer task ──► LinkTransport ──► neighbour
//! neighbour ──► LinkTransport::recv ──► InboundFrame ──► router dispatch
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always program against the traits; tests swap in `MemoryNetwork`
//! - `InboundFrame::from` must be authenticated by the implementation
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod outbound;
pub mod traits;
pub mod udp;

// Re-export primary types
pub use error::{Result, TransportError};
pub use memory::{MemoryLink, MemoryNetwork};
pub use outbound::{OutboundQueue, OutboundStatsSnapshot, OutboundWriter};
pub use traits::{InboundFrame, LinkSender, LinkTransport};
pub use udp::UdpLink;
