// ============================================
// File: crates/nyxpath-router/src/lib.rs
// ============================================
//! # nyxpath Router Library
//!
//! ## Creation Reason
//! The path core of an onion router: circuits this router originates,
//! hops it relays for others, the registry that tells them apart and the
//! runtime that connects them to a link transport.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML router configuration
//! - [`path`]: circuits, transit hops and path sets
//! - [`registry`]: path id index with sender-checked resolution
//! - [`handlers`]: link dispatch, relay step, terminal endpoint
//! - [`services`]: profiling, DHT boundary, exit context, hop keys
//! - [`router`]: task orchestration
//! - [`error`]: router error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         nyxpath Router                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│   Router    │────►│ LinkDispatcher  │    │
//! │  └─────────────┘     └──────┬──────┘     └────────┬────────┘    │
//! │                             │                     │             │
//! │         ┌───────────────────┼─────────────────────┤             │
//! │         ▼                   ▼                     ▼             │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │  PathSet    │◄────│ PathRegistry│────►│ TransitHop /    │    │
//! │  │  (circuits) │ Weak│             │     │ EndpointHandler │    │
//! │  └─────────────┘     └─────────────┘     └─────────────────┘    │
//! │                                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                     nyxpath-transport                           │
//! │        OutboundQueue ──► writer task ──► LinkTransport          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Per-hop key exchange is outside this crate (`HopKeySource`)
//! - No TUN integration: exit traffic is queued, not put on a network
//!
//! ## Last Modified
//! v0.1.0 - Initial router library

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod path;
pub mod registry;
pub mod router;
pub mod services;

// Re-export primary types
pub use config::RouterConfig;
pub use error::{Result, RouterError};
pub use path::{Circuit, PathRoles, PathSet, PathSetHooks, PathStatus};
pub use registry::PathRegistry;
pub use router::{Router, RouterStats};
