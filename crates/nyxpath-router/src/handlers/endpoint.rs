// ============================================
// File: crates/nyxpath-router/src/handlers/endpoint.rs
// ============================================
//! # Terminal Hop Endpoint
//!
//! ## Creation Reason
//! When this router is the last hop of someone's circuit, the peeled
//! upstream plaintext is a routing message addressed to us. This handler
//! answers it: latency echoes, exit negotiation, exit traffic, transfers
//! onto other paths and tunnelled DHT.
//!
//! ## Message Handling
//! ```text
//! ┌────────────────────┬──────────────────────────────────────────────┐
//! │ L latency          │ echo token                                   │
//! │ O obtain-exit      │ verify, ask ExitContext, signed G or J       │
//! │ U update-exit      │ verify against stored identity, V or J       │
//! │ C close-exit       │ verify, remove endpoint, signed C            │
//! │ I transfer-traffic │ queue on endpoint, or D if there is none     │
//! │ T path-transfer    │ H onto target path, or D if there is none    │
//! │ D data-discard     │ echoed back                                  │
//! │ M dht              │ DhtHandler, reply if any                     │
//! │ anything else      │ dropped as unwarranted                       │
//! └────────────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Exit endpoints are keyed by the hop's rxID
//! - Every handled message is published on the endpoint event channel;
//!   nobody has to listen
//!
//! ## Last Modified
//! v0.1.0 - Initial endpoint handler

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use nyxpath_common::time::duration_millis;
use nyxpath_common::PathId;
use nyxpath_core::crypto::IdentityKeyPair;
use nyxpath_core::protocol::{
    verify_exit, verify_obtain, CloseExit, GrantExit, ObtainExit, PathConfirm, PathLatency,
    PathTransfer, RejectExit, RoutingBody, RoutingMessage, UpdateExit, UpdateExitVerify, Value,
};

use super::relay::{send_from_terminal, send_signed_from_terminal};
use crate::error::Result;
use crate::path::{DropReason, HandleOutcome, PathEnv, TransitHop};
use crate::registry::{PathRegistry, Resolved};
use crate::services::exit::REJECT_BACKOFF;
use crate::services::{ExitContext, ExitDecision};

/// Capacity of the endpoint event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A message handled at this router as terminal hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEvent {
    /// rxID of the hop it arrived on
    pub path_id: PathId,
    /// Message kind
    pub kind: &'static str,
    /// Sender's sequence number
    pub sequence: u64,
    /// What the handler did
    pub outcome: HandleOutcome,
}

/// Handles routing messages for circuits that end at this router.
pub struct EndpointHandler {
    env: PathEnv,
    registry: Arc<PathRegistry>,
    exit: Arc<ExitContext>,
    identity: Arc<IdentityKeyPair>,
    events: broadcast::Sender<EndpointEvent>,
}

impl EndpointHandler {
    #[must_use]
    pub fn new(
        env: PathEnv,
        registry: Arc<PathRegistry>,
        exit: Arc<ExitContext>,
        identity: Arc<IdentityKeyPair>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            env,
            registry,
            exit,
            identity,
            events,
        }
    }

    /// Subscribes to handled-message events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EndpointEvent> {
        self.events.subscribe()
    }

    /// Tells the owner its circuit is built.
    ///
    /// # Errors
    /// Send errors.
    pub fn confirm_path(&self, hop: &TransitHop) -> Result<()> {
        let confirm = PathConfirm {
            lifetime_ms: duration_millis(hop.lifetime()),
            created_ms: hop.created_ms(),
        };
        send_from_terminal(&self.env, hop, RoutingBody::PathConfirm(confirm))
    }

    /// Decodes and handles one upstream plaintext that ended at `hop`.
    pub fn handle(&self, hop: &TransitHop, plaintext: &[u8], now: Instant) -> HandleOutcome {
        let msg = match RoutingMessage::decode(plaintext) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(hop = %hop.info, error = %e, "Dropping undecodable message at endpoint");
                return HandleOutcome::Dropped(DropReason::Malformed);
            }
        };
        trace!(hop = %hop.info, kind = msg.body.kind(), seq = msg.sequence, "Endpoint message");

        let outcome = match &msg.body {
            RoutingBody::PathLatency(latency) => self.handle_latency(hop, latency),
            RoutingBody::ObtainExit(obtain) => self.handle_obtain(hop, &msg, obtain, now),
            RoutingBody::UpdateExit(update) => self.handle_update(hop, &msg, update),
            RoutingBody::CloseExit(_) => self.handle_close(hop, &msg),
            RoutingBody::TransferTraffic(packets) => self.handle_traffic(hop, packets),
            RoutingBody::PathTransfer(transfer) => self.handle_transfer(hop, transfer),
            RoutingBody::DataDiscard { path_id } => {
                self.reply(hop, RoutingBody::DataDiscard { path_id: *path_id })
            }
            RoutingBody::Dht(inner) => self.handle_dht(hop, inner),
            RoutingBody::PathConfirm(_)
            | RoutingBody::GrantExit(_)
            | RoutingBody::RejectExit(_)
            | RoutingBody::UpdateExitVerify(_)
            | RoutingBody::HiddenService(_) => {
                warn!(hop = %hop.info, kind = msg.body.kind(), "Unwarranted message at endpoint");
                HandleOutcome::Dropped(DropReason::Unwarranted)
            }
        };

        if let HandleOutcome::Dropped(reason) = outcome {
            debug!(hop = %hop.info, kind = msg.body.kind(), %reason, "Endpoint message dropped");
        }
        let _ = self.events.send(EndpointEvent {
            path_id: hop.info.rx_id,
            kind: msg.body.kind(),
            sequence: msg.sequence,
            outcome,
        });
        outcome
    }

    /// Sends queued exit traffic back down the circuits it belongs to.
    ///
    /// Returns the number of packets sent.
    pub fn flush_exit_outbound(&self) -> usize {
        let mut sent = 0;
        for path in self.exit.pending_outbound() {
            let Some(Resolved::Transit(hop)) = self.registry.resolve_handler(&path) else {
                continue;
            };
            let packets = self.exit.drain_outbound(&path);
            let count = packets.len();
            match send_from_terminal(&self.env, &hop, RoutingBody::TransferTraffic(packets)) {
                Ok(()) => sent += count,
                Err(e) => debug!(path = %path, error = %e, "Exit traffic not sent"),
            }
        }
        sent
    }

    // ========================================
    // Handlers
    // ========================================

    fn handle_latency(&self, hop: &TransitHop, latency: &PathLatency) -> HandleOutcome {
        if latency.token == 0 {
            return HandleOutcome::Dropped(DropReason::Malformed);
        }
        let echo = PathLatency {
            token: 0,
            echo: latency.token,
        };
        self.reply(hop, RoutingBody::PathLatency(echo))
    }

    fn handle_obtain(
        &self,
        hop: &TransitHop,
        msg: &RoutingMessage,
        obtain: &ObtainExit,
        now: Instant,
    ) -> HandleOutcome {
        let Ok(client) = verify_obtain(msg) else {
            return HandleOutcome::Dropped(DropReason::BadSignature);
        };
        let decision = self.exit.obtain(
            hop.info.rx_id,
            client,
            obtain.flags,
            obtain.expires_ms,
            now,
        );
        let body = match decision {
            ExitDecision::Granted => RoutingBody::GrantExit(GrantExit::new(obtain.tx_id)),
            ExitDecision::Rejected { backoff } => {
                RoutingBody::RejectExit(RejectExit::new(obtain.tx_id, duration_millis(backoff)))
            }
        };
        self.reply_signed(hop, body)
    }

    fn handle_update(&self, hop: &TransitHop, msg: &RoutingMessage, update: &UpdateExit) -> HandleOutcome {
        let Some(client) = self.exit.identity(&update.path_id) else {
            let reject = RejectExit::new(update.tx_id, duration_millis(REJECT_BACKOFF));
            return self.reply_signed(hop, RoutingBody::RejectExit(reject));
        };
        if verify_exit(msg, &client).is_err() {
            return HandleOutcome::Dropped(DropReason::BadSignature);
        }
        if self.exit.update(&update.path_id, hop.info.rx_id) {
            self.reply(hop, RoutingBody::UpdateExitVerify(UpdateExitVerify { tx_id: update.tx_id }))
        } else {
            let reject = RejectExit::new(update.tx_id, duration_millis(REJECT_BACKOFF));
            self.reply_signed(hop, RoutingBody::RejectExit(reject))
        }
    }

    fn handle_close(&self, hop: &TransitHop, msg: &RoutingMessage) -> HandleOutcome {
        let Some(client) = self.exit.identity(&hop.info.rx_id) else {
            return HandleOutcome::Dropped(DropReason::WrongState);
        };
        if verify_exit(msg, &client).is_err() {
            return HandleOutcome::Dropped(DropReason::BadSignature);
        }
        self.exit.close(&hop.info.rx_id);
        self.reply_signed(hop, RoutingBody::CloseExit(CloseExit::new()))
    }

    fn handle_traffic(&self, hop: &TransitHop, packets: &[Vec<u8>]) -> HandleOutcome {
        if let Some(accepted) = self.exit.queue_inbound(&hop.info.rx_id, packets) {
            trace!(hop = %hop.info, accepted, offered = packets.len(), "Exit traffic queued");
            return HandleOutcome::Accepted;
        }
        self.discard(hop, hop.info.rx_id)
    }

    fn handle_transfer(&self, hop: &TransitHop, transfer: &PathTransfer) -> HandleOutcome {
        match self.registry.resolve_handler(&transfer.path_id) {
            Some(Resolved::Own { owner, key }) => {
                if owner.deliver_hidden_service(key, transfer.frame.clone()) {
                    HandleOutcome::Accepted
                } else {
                    self.discard(hop, transfer.path_id)
                }
            }
            Some(Resolved::Transit(target)) => {
                let body = RoutingBody::HiddenService(transfer.frame.clone());
                match send_from_terminal(&self.env, &target, body) {
                    Ok(()) => HandleOutcome::Accepted,
                    Err(e) => {
                        debug!(target = %target.info, error = %e, "Transfer not forwarded");
                        HandleOutcome::Dropped(DropReason::SendFailed)
                    }
                }
            }
            None => self.discard(hop, transfer.path_id),
        }
    }

    fn handle_dht(&self, hop: &TransitHop, inner: &[Value]) -> HandleOutcome {
        let replies: Vec<Value> = inner
            .iter()
            .filter_map(|m| self.env.dht.handle(hop.info.rx_id, m))
            .collect();
        if replies.is_empty() {
            return HandleOutcome::Accepted;
        }
        self.reply(hop, RoutingBody::Dht(replies))
    }

    // ========================================
    // Replies
    // ========================================

    /// Tells the owner data for `target` could not be delivered.
    fn discard(&self, hop: &TransitHop, target: PathId) -> HandleOutcome {
        match self.reply(hop, RoutingBody::DataDiscard { path_id: target }) {
            HandleOutcome::Accepted => HandleOutcome::Dropped(DropReason::NoSuchPath),
            dropped => dropped,
        }
    }

    fn reply(&self, hop: &TransitHop, body: RoutingBody) -> HandleOutcome {
        match send_from_terminal(&self.env, hop, body) {
            Ok(()) => HandleOutcome::Accepted,
            Err(e) => {
                debug!(hop = %hop.info, error = %e, "Endpoint reply not sent");
                HandleOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }

    fn reply_signed(&self, hop: &TransitHop, body: RoutingBody) -> HandleOutcome {
        match send_signed_from_terminal(&self.env, hop, body, &self.identity) {
            Ok(()) => HandleOutcome::Accepted,
            Err(e) => {
                debug!(hop = %hop.info, error = %e, "Signed endpoint reply not sent");
                HandleOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }
}

impl std::fmt::Debug for EndpointHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHandler")
            .field("local", &self.env.local)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================
