// ============================================
// File: crates/nyxpath-router/src/handlers/dispatch.rs
// ============================================
//! # Link Dispatcher
//!
//! ## Creation Reason
//! Single entry point for frames arriving from the link layer. Decodes the
//! link message, resolves the path id against the registry with the
//! sender's position taken into account and hands the cell to whoever owns
//! it.
//!
//! ## Dispatch Table
//! ```text
//! RelayUpstream   {id} from S ─► transit hop with downstream == S
//!                                 ├─ forwarded to upstream
//!                                 └─ terminal ─► EndpointHandler
//! RelayDownstream {id} from S ─► own circuit with first hop == S
//!                                 └─ else transit hop with upstream == S
//! BuildCommit          from S ─► registry.forward_build_commit
//!                                 └─ terminal ─► PathConfirm back down
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial dispatcher

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use nyxpath_common::RouterId;
use nyxpath_core::protocol::{BuildCommitRecord, LinkMessage, RelayCell};
use nyxpath_transport::InboundFrame;

use super::endpoint::EndpointHandler;
use super::relay::{relay_downstream, relay_upstream, UpstreamStep};
use crate::path::{DropReason, HandleOutcome, PathEnv};
use crate::registry::{PathRegistry, Resolved};

/// Routes inbound link frames.
pub struct LinkDispatcher {
    env: PathEnv,
    registry: Arc<PathRegistry>,
    endpoint: Arc<EndpointHandler>,
}

impl LinkDispatcher {
    #[must_use]
    pub fn new(env: PathEnv, registry: Arc<PathRegistry>, endpoint: Arc<EndpointHandler>) -> Self {
        Self {
            env,
            registry,
            endpoint,
        }
    }

    /// Handles one inbound frame.
    pub fn handle_frame(&self, frame: InboundFrame, now: Instant) -> HandleOutcome {
        let from = frame.from;
        let msg = match LinkMessage::from_bytes(frame.payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(from = %from, error = %e, "Undecodable link frame");
                return HandleOutcome::Dropped(DropReason::Malformed);
            }
        };

        let outcome = match msg {
            LinkMessage::RelayUpstream(cell) => self.on_upstream(from, &cell, now),
            LinkMessage::RelayDownstream(cell) => self.on_downstream(from, &cell, now),
            LinkMessage::BuildCommit(records) => self.on_build_commit(from, records, now),
        };
        if let HandleOutcome::Dropped(reason) = outcome {
            trace!(from = %from, %reason, "Link frame dropped");
        }
        outcome
    }

    fn on_upstream(&self, from: RouterId, cell: &RelayCell, now: Instant) -> HandleOutcome {
        let Some(Resolved::Transit(hop)) = self.registry.resolve_for_downstream(&from, &cell.path_id) else {
            return HandleOutcome::Dropped(DropReason::NoSuchPath);
        };
        match relay_upstream(&self.env, &hop, cell) {
            Ok(UpstreamStep::Forwarded) => HandleOutcome::Accepted,
            Ok(UpstreamStep::Terminal(plaintext)) => self.endpoint.handle(&hop, &plaintext, now),
            Err(e) => {
                debug!(hop = %hop.info, error = %e, "Upstream relay failed");
                HandleOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }

    fn on_downstream(&self, from: RouterId, cell: &RelayCell, now: Instant) -> HandleOutcome {
        match self.registry.resolve_for_upstream(&from, &cell.path_id) {
            Some(Resolved::Own { owner, key }) => owner.handle_downstream(key, cell, now),
            Some(Resolved::Transit(hop)) => match relay_downstream(&self.env, &hop, cell) {
                Ok(()) => HandleOutcome::Accepted,
                Err(e) => {
                    debug!(hop = %hop.info, error = %e, "Downstream relay failed");
                    HandleOutcome::Dropped(DropReason::SendFailed)
                }
            },
            None => HandleOutcome::Dropped(DropReason::NoSuchPath),
        }
    }

    fn on_build_commit(
        &self,
        from: RouterId,
        records: Vec<BuildCommitRecord>,
        now: Instant,
    ) -> HandleOutcome {
        let outcome = match self
            .registry
            .forward_build_commit(from, records, self.env.link.as_ref(), now)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(from = %from, error = %e, "Build commit refused");
                return HandleOutcome::Dropped(DropReason::Malformed);
            }
        };
        if outcome.terminal {
            if let Err(e) = self.endpoint.confirm_path(&outcome.hop) {
                warn!(hop = %outcome.hop.info, error = %e, "Path confirm not sent");
                return HandleOutcome::Dropped(DropReason::SendFailed);
            }
        }
        HandleOutcome::Accepted
    }
}

impl std::fmt::Debug for LinkDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkDispatcher")
            .field("local", &self.env.local)
            .finish_non_exhaustive()
    }
}
