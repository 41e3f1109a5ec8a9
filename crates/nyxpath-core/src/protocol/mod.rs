// ============================================
// File: crates/nyxpath-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines both wire layers of the path protocol: link frames between
//! neighbouring routers, and routing messages carried end-to-end inside a
//! circuit.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`bencode`]: value model and canonical codec
//! - [`routing`]: `RoutingMessage` and its tagged bodies
//! - [`exit`]: exit negotiation bodies plus signing
//! - [`link`]: `LinkMessage` (relay cells, build commits) binary codec
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Link layer (per neighbour)                                 │
//! │    BuildCommit ── records[0] consumed, rest forwarded ──►   │
//! │    RelayUpstream / RelayDownstream {path id, nonce, onion}  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Routing layer (owner ⇄ terminal hop, inside the onion)     │
//! │    bencoded dict, "A" tag, padded to 128-byte multiples     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - ANY routing field change requires a `ROUTING_VERSION` bump
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod bencode;
pub mod exit;
pub mod link;
pub mod routing;

pub use bencode::Value;
pub use exit::{
    sign_exit, verify_exit, verify_obtain, CloseExit, GrantExit, ObtainExit, RejectExit,
    UpdateExit, UpdateExitVerify, EXIT_FLAG_INTERNET,
};
pub use link::{BuildCommitRecord, Codec, LinkCodec, LinkMessage, LinkMessageType, RelayCell};
pub use routing::{
    pad_random, PathConfirm, PathLatency, PathTransfer, RoutingBody, RoutingMessage,
    MESSAGE_PAD_SIZE, ROUTING_VERSION,
};
