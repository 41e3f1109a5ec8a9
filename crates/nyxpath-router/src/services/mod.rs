// ============================================
// File: crates/nyxpath-router/src/services/mod.rs
// ============================================
//! # Router Services
//!
//! ## Creation Reason
//! Collaborators the path code talks to through narrow interfaces, kept
//! apart from the circuit and relay logic so each can be replaced or
//! faked in tests.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`profiling`]: per-router success / failure scoring
//! - [`dht`]: boundary to the DHT for tunnelled `M` messages
//! - [`exit`]: exit endpoints served by this router
//! - [`hop_keys`]: boundary to the per-hop key exchange
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐   ┌─────────────────────────────────┐ │
//! │  │  RouterProfiling │   │      ExitContext                │ │
//! │  │  - path success  │   │  - grant / reject / close       │ │
//! │  │  - path fail     │   │  - inbound replay filter        │ │
//! │  │  - bad routers   │   │  - outbound queue               │ │
//! │  └──────────────────┘   └─────────────────────────────────┘ │
//! │                                                             │
//! │  ┌──────────────────┐   ┌─────────────────────────────────┐ │
//! │  │  DhtHandler      │   │      HopKeySource               │ │
//! │  │  (external)      │   │      (external handshake)       │ │
//! │  └──────────────────┘   └─────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All services are Send + Sync and called from the relay path;
//!   none of them may block
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod dht;
pub mod exit;
pub mod hop_keys;
pub mod profiling;

// Re-export primary types
pub use dht::{DhtHandler, NullDht};
pub use exit::{ExitContext, ExitDecision, ExitPolicy};
pub use hop_keys::{HopKeySource, RandomHopKeys};
pub use profiling::{Profiler, RouterProfile, RouterProfiling};
