// ============================================
// File: crates/nyxpath-router/src/handlers/mod.rs
// ============================================
//! # Link Handlers
//!
//! ## Creation Reason
//! Everything that happens to a frame after the transport hands it over:
//! dispatch by link message type, the per-hop relay step and the terminal
//! hop endpoint.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`dispatch`]: link frame decoding and sender-checked resolution
//! - [`relay`]: one-layer peel / add and forwarding
//! - [`endpoint`]: routing messages for circuits ending here
//!
//! ## Data Flow
//! ```text
//! Upstream cell (towards the terminal hop):
//!   1. Resolve id among hops whose downstream is the sender
//!   2. Peel this hop's layer
//!   3. Forward {txID, Y ^ x} upstream, or decode at the terminal hop
//!
//! Downstream cell (towards the owner):
//!   1. Resolve id among own circuits whose first hop is the sender,
//!      then hops whose upstream is the sender
//!   2. Own circuit: peel every layer and handle the message
//!   3. Transit hop: add this hop's layer, forward {rxID, Y ^ x}
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers run on the receive task; they must not block or await
//! - A cell whose sender does not match the recorded neighbour is
//!   treated as an unknown path
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod dispatch;
pub mod endpoint;
pub mod relay;

pub use dispatch::LinkDispatcher;
pub use endpoint::{EndpointEvent, EndpointHandler};
pub use relay::{relay_downstream, relay_upstream, send_from_terminal, UpstreamStep};
