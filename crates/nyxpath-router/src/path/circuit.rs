// ============================================
// File: crates/nyxpath-router/src/path/circuit.rs
// ============================================
//! # Circuit
//!
//! ## Creation Reason
//! A circuit this router originated: the hop chain, the onion layering in
//! both directions and the client-side handling of every routing message
//! that can come back down it.
//!
//! ## Main Functionality
//! - `Circuit::new`: random linked ids, derived nonce mutations
//! - `send_upstream` / `recv_downstream`: onion layering
//! - `handle_message`: per-kind client handlers, returning `HandleOutcome`
//! - `tick`: build timeout, latency probes, liveness and expiry
//! - exit negotiation: `obtain_exit`, `update_exit`, `close_exit`
//!
//! ## Nonce Chain
//! ```text
//!  upstream (owner):   Y ─enc h0─► Y^x0 ─enc h1─► Y^x0^x1 ─enc h2─►
//!                      cell carries the initial Y
//!
//!  downstream (owner): N ─^x0─► dec h0 ─^x1─► dec h1 ─^x2─► dec h2
//!                      N = Y^x2^x1^x0 where Y was picked by the terminal
//! ```
//! Both directions walk the hops in the same order.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Handlers never call owner hooks directly; they push `CircuitEvent`s
//!   which the `PathSet` drains after releasing its lock
//! - Status only moves forward (see `PathStatus::can_transition_to`)
//!
//! ## Last Modified
//! v0.1.0 - Initial circuit

use std::mem;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use nyxpath_common::error::CommonError;
use nyxpath_common::time::duration_millis;
use nyxpath_common::{PacketCounter, PathId, RouterId};
use nyxpath_core::crypto::{IdentityKeyPair, IdentityPublicKey, OnionCrypto, SharedSecret, TunnelNonce};
use nyxpath_core::protocol::{
    sign_exit, verify_exit, BuildCommitRecord, CloseExit, LinkMessage, ObtainExit, PathLatency,
    RelayCell, RoutingBody, RoutingMessage, UpdateExit,
};

use super::hop::HopRecord;
use super::{
    CircuitEvent, DropReason, HandleOutcome, PathEnv, PathRoles, PathStatus, ALIVE_TIMEOUT,
    BUILD_TIMEOUT, LATENCY_INTERVAL, MAX_HOPS, PATH_REANIMATION_TIMEOUT,
};
use crate::error::{Result, RouterError};
use crate::services::exit::split_counter;

/// Smallest latency ever stored; zero means "not measured yet".
const MIN_LATENCY: Duration = Duration::from_millis(1);

// ============================================
// Introduction
// ============================================

/// How the terminal hop of a circuit is reached.
#[derive(Debug, Clone, Copy)]
pub struct Introduction {
    /// Terminal router
    pub router: RouterId,
    /// Terminal hop's txID
    pub path_id: PathId,
    /// Last measured round trip; zero until the first latency reply
    pub latency: Duration,
    /// When the circuit stops being usable
    pub expiry: Instant,
}

// ============================================
// Circuit
// ============================================

/// An originated circuit.
pub struct Circuit {
    hops: Vec<HopRecord>,
    intro: Introduction,
    status: PathStatus,
    roles: PathRoles,
    build_started: Instant,
    last_recv: Instant,
    last_latency_test: Option<Instant>,
    latency_token: u64,
    confirmed: bool,
    ready_fired: bool,
    exit_tx: Option<u64>,
    update_tx: Option<u64>,
    last_exit_counter: PacketCounter,
    exit_tx_counter: PacketCounter,
    sequence: u64,
    events: Vec<CircuitEvent>,
    name: String,
}

impl Circuit {
    /// Creates a `Building` circuit over `hops`, in order from the first
    /// hop to the terminal one.
    ///
    /// # Errors
    /// - `HopCount` for 0 or more than `MAX_HOPS` hops
    /// - key derivation failure for a hop secret
    pub fn new(
        hops: Vec<(RouterId, SharedSecret)>,
        lifetime: Duration,
        roles: PathRoles,
        now: Instant,
    ) -> Result<Self> {
        if hops.is_empty() || hops.len() > MAX_HOPS {
            return Err(CommonError::HopCount {
                count: hops.len(),
                max: MAX_HOPS,
            }
            .into());
        }

        let mut records = hops
            .into_iter()
            .map(|(router, shared)| HopRecord::new(router, shared, lifetime))
            .collect::<Result<Vec<_>>>()?;
        for idx in 1..records.len() {
            records[idx].rx_id = records[idx - 1].tx_id;
        }

        let first = &records[0];
        let last = &records[records.len() - 1];
        let intro = Introduction {
            router: last.router,
            path_id: last.tx_id,
            latency: Duration::ZERO,
            expiry: now + first.lifetime,
        };
        let name = format!("TX={} RX={}", first.tx_id, first.rx_id);

        Ok(Self {
            hops: records,
            intro,
            status: PathStatus::Building,
            roles,
            build_started: now,
            last_recv: now,
            last_latency_test: None,
            latency_token: 0,
            confirmed: false,
            ready_fired: false,
            exit_tx: None,
            update_tx: None,
            last_exit_counter: PacketCounter::new(),
            exit_tx_counter: PacketCounter::new(),
            sequence: 0,
            events: Vec::new(),
            name,
        })
    }

    // ========================================
    // Accessors
    // ========================================

    #[must_use]
    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    /// Id used towards the first hop; also the `PathSet` key.
    #[must_use]
    pub fn tx_id(&self) -> PathId {
        self.hops[0].tx_id
    }

    /// Id the first hop uses when sending back to us.
    #[must_use]
    pub fn rx_id(&self) -> PathId {
        self.hops[0].rx_id
    }

    #[must_use]
    pub fn first_hop(&self) -> RouterId {
        self.hops[0].router
    }

    #[must_use]
    pub fn terminal(&self) -> RouterId {
        self.intro.router
    }

    /// rxID of the terminal hop; exit sessions are keyed by it.
    #[must_use]
    pub fn terminal_rx_id(&self) -> PathId {
        self.hops[self.hops.len() - 1].rx_id
    }

    #[must_use]
    pub const fn intro(&self) -> &Introduction {
        &self.intro
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PathStatus {
        self.status
    }

    #[must_use]
    pub const fn roles(&self) -> PathRoles {
        self.roles
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn hop_routers(&self) -> Vec<RouterId> {
        self.hops.iter().map(|h| h.router).collect()
    }

    /// Hop routers joined with `" -> "`.
    #[must_use]
    pub fn hops_string(&self) -> String {
        self.hops
            .iter()
            .map(|h| h.router.short())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// One commit record per hop, first hop first.
    #[must_use]
    pub fn commit_records(&self) -> Vec<BuildCommitRecord> {
        self.hops
            .iter()
            .enumerate()
            .map(|(idx, hop)| hop.commit_record(self.hops.get(idx + 1).map(|next| next.router)))
            .collect()
    }

    // ========================================
    // Queries
    // ========================================

    /// Established, measured and not past its expiry.
    #[must_use]
    pub fn is_ready(&self, now: Instant) -> bool {
        self.status == PathStatus::Established
            && !self.intro.latency.is_zero()
            && now < self.intro.expiry
    }

    /// Returns `true` if the circuit expires within `delta` of `now`.
    #[must_use]
    pub fn expires_soon(&self, now: Instant, delta: Duration) -> bool {
        now + delta >= self.intro.expiry
    }

    /// Returns `true` once the owner should drop the circuit.
    ///
    /// A timed-out circuit lingers for `PATH_REANIMATION_TIMEOUT` after the
    /// last message it received so late replies are still matched.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.status {
            PathStatus::Building => false,
            PathStatus::Established => now >= self.intro.expiry,
            PathStatus::Timeout => now >= self.last_recv + PATH_REANIMATION_TIMEOUT,
            PathStatus::Expired => true,
        }
    }

    /// Serialisable snapshot.
    #[must_use]
    pub fn status(&self, now: Instant) -> CircuitStatus {
        CircuitStatus {
            name: self.name.clone(),
            tx_id: self.tx_id(),
            rx_id: self.rx_id(),
            status: self.status,
            roles: self.roles,
            hops: self.hop_routers(),
            terminal: self.intro.router,
            intro_path: self.intro.path_id,
            latency_ms: duration_millis(self.intro.latency),
            expires_in_ms: duration_millis(self.intro.expiry.saturating_duration_since(now)),
            ready: self.is_ready(now),
        }
    }

    /// Takes the events raised since the last call.
    pub fn take_events(&mut self) -> Vec<CircuitEvent> {
        mem::take(&mut self.events)
    }

    // ========================================
    // Onion Layering
    // ========================================

    /// Applies every hop layer to `buf`, walking the nonce chain from `nonce`.
    ///
    /// # Errors
    /// Layer cipher failure.
    pub fn encrypt_upstream(
        &self,
        buf: &mut [u8],
        nonce: TunnelNonce,
        onion: &dyn OnionCrypto,
    ) -> Result<()> {
        let mut n = nonce;
        for hop in &self.hops {
            onion.apply_layer(buf, &hop.shared, &n)?;
            n ^= hop.nonce_xor;
        }
        Ok(())
    }

    /// Onion-wraps `payload` and sends it to the first hop.
    ///
    /// # Errors
    /// Layer cipher failure, or the link refusing the frame. Not retried.
    pub fn send_upstream(&self, mut payload: Vec<u8>, nonce: TunnelNonce, env: &PathEnv) -> Result<()> {
        self.encrypt_upstream(&mut payload, nonce, env.onion.as_ref())?;
        let cell = RelayCell {
            path_id: self.tx_id(),
            nonce,
            payload: Bytes::from(payload),
        };
        env.link
            .send_to(&self.first_hop(), LinkMessage::RelayUpstream(cell).to_bytes())?;
        Ok(())
    }

    /// Peels every layer off a downstream cell and handles the message.
    pub fn recv_downstream(
        &mut self,
        payload: &[u8],
        nonce: TunnelNonce,
        now: Instant,
        env: &PathEnv,
    ) -> HandleOutcome {
        let mut buf = payload.to_vec();
        let mut n = nonce;
        for hop in &self.hops {
            n ^= hop.nonce_xor;
            if let Err(e) = env.onion.apply_layer(&mut buf, &hop.shared, &n) {
                debug!(path = %self.name, error = %e, "Downstream layer failed");
                return HandleOutcome::Dropped(DropReason::Crypto);
            }
        }

        match RoutingMessage::decode(&buf) {
            Ok(msg) => self.handle_message(msg, now, env),
            Err(e) => {
                debug!(path = %self.name, error = %e, "Dropping undecodable downstream message");
                HandleOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Stamps the next sequence number on `body` and sends it upstream.
    ///
    /// # Errors
    /// See [`Circuit::send_upstream`].
    pub fn send_routing_message(&mut self, body: RoutingBody, env: &PathEnv) -> Result<()> {
        let msg = RoutingMessage::new(body).with_sequence(self.next_sequence());
        self.transmit(&msg, env)
    }

    fn send_signed(&mut self, body: RoutingBody, identity: &IdentityKeyPair, env: &PathEnv) -> Result<()> {
        let mut msg = RoutingMessage::new(body).with_sequence(self.next_sequence());
        sign_exit(&mut msg, identity)?;
        self.transmit(&msg, env)
    }

    fn transmit(&self, msg: &RoutingMessage, env: &PathEnv) -> Result<()> {
        trace!(path = %self.name, kind = msg.body.kind(), seq = msg.sequence, "Sending routing message");
        self.send_upstream(msg.encode_padded(), TunnelNonce::random(), env)
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    // ========================================
    // Periodic Work
    // ========================================

    /// Advances timers. Called from the `PathSet` tick.
    pub fn tick(&mut self, now: Instant, env: &PathEnv) {
        match self.status {
            PathStatus::Building => {
                if now.saturating_duration_since(self.build_started) >= BUILD_TIMEOUT {
                    warn!(path = %self.name, hops = %self.hops_string(), "Path build timed out");
                    env.profiler.report_path_fail(&self.hop_routers());
                    self.transition(PathStatus::Timeout);
                    self.events.push(CircuitEvent::BuildTimeout);
                }
            }
            PathStatus::Established => {
                if now >= self.intro.expiry {
                    info!(path = %self.name, "Path expired");
                    self.transition(PathStatus::Expired);
                    return;
                }

                if self.roles.intersects(PathRoles::EXIT | PathRoles::SERVICE)
                    && now.saturating_duration_since(self.last_recv) >= ALIVE_TIMEOUT
                {
                    warn!(path = %self.name, "Path went silent, marking dead");
                    env.profiler.report_path_fail(&self.hop_routers());
                    self.transition(PathStatus::Timeout);
                    self.events.push(CircuitEvent::PathDied);
                    return;
                }

                let since_probe = self
                    .last_latency_test
                    .map_or(Duration::MAX, |t| now.saturating_duration_since(t));
                // A probe unanswered for ALIVE_TIMEOUT is abandoned.
                if self.latency_token != 0 && since_probe >= ALIVE_TIMEOUT {
                    self.latency_token = 0;
                }
                if self.latency_token == 0 && since_probe >= LATENCY_INTERVAL {
                    self.send_latency_probe(now, env);
                }
            }
            PathStatus::Timeout | PathStatus::Expired => {}
        }
    }

    fn transition(&mut self, next: PathStatus) {
        if self.status.can_transition_to(next) {
            debug!(path = %self.name, from = %self.status, to = %next, "Path status change");
            self.status = next;
        }
    }

    fn send_latency_probe(&mut self, now: Instant, env: &PathEnv) {
        let token = nonzero_u64();
        self.latency_token = token;
        self.last_latency_test = Some(now);
        let probe = RoutingBody::PathLatency(PathLatency { token, echo: 0 });
        if let Err(e) = self.send_routing_message(probe, env) {
            debug!(path = %self.name, error = %e, "Latency probe not sent");
            self.latency_token = 0;
        }
    }

    // ========================================
    // Message Handlers
    // ========================================

    /// Dispatches one decrypted routing message by kind.
    pub fn handle_message(&mut self, msg: RoutingMessage, now: Instant, env: &PathEnv) -> HandleOutcome {
        trace!(path = %self.name, kind = msg.body.kind(), seq = msg.sequence, "Routing message");

        let outcome = match &msg.body {
            RoutingBody::PathConfirm(_) => self.handle_confirm(now, env),
            RoutingBody::PathLatency(latency) => self.handle_latency(latency.echo, now),
            RoutingBody::DataDiscard { path_id } => {
                self.events.push(CircuitEvent::DataDropped { path_id: *path_id });
                HandleOutcome::Accepted
            }
            RoutingBody::Dht(inner) => self.handle_dht(inner),
            RoutingBody::GrantExit(grant) => self.handle_exit_reply(&msg, grant.tx_id, None),
            RoutingBody::RejectExit(reject) => {
                self.handle_exit_reply(&msg, reject.tx_id, Some(reject.backoff_ms))
            }
            RoutingBody::UpdateExitVerify(verify) => self.handle_update_verify(verify.tx_id),
            RoutingBody::CloseExit(_) => self.handle_close(&msg),
            RoutingBody::TransferTraffic(packets) => self.handle_traffic(packets),
            RoutingBody::HiddenService(frame) => {
                self.events.push(CircuitEvent::HiddenServiceFrame(frame.clone()));
                HandleOutcome::Accepted
            }
            RoutingBody::ObtainExit(_) | RoutingBody::UpdateExit(_) | RoutingBody::PathTransfer(_) => {
                warn!(path = %self.name, kind = msg.body.kind(), "Unwarranted message on client path");
                HandleOutcome::Dropped(DropReason::Unwarranted)
            }
        };

        match outcome {
            HandleOutcome::Accepted => self.last_recv = now,
            HandleOutcome::Dropped(reason) => {
                debug!(path = %self.name, kind = msg.body.kind(), %reason, "Message dropped");
            }
        }
        outcome
    }

    fn handle_confirm(&mut self, now: Instant, env: &PathEnv) -> HandleOutcome {
        if self.status != PathStatus::Building || self.confirmed {
            return HandleOutcome::Dropped(DropReason::WrongState);
        }
        self.confirmed = true;
        self.intro.expiry = self.build_started + self.hops[0].lifetime;
        info!(
            path = %self.name,
            hops = %self.hops_string(),
            build_ms = duration_millis(now.saturating_duration_since(self.build_started)),
            "Path confirmed"
        );
        env.profiler.report_path_success(&self.hop_routers());
        env.link.persist_session(&self.first_hop(), self.intro.expiry);
        self.send_latency_probe(now, env);
        HandleOutcome::Accepted
    }

    fn handle_latency(&mut self, echo: u64, now: Instant) -> HandleOutcome {
        if self.latency_token == 0 || echo != self.latency_token {
            return HandleOutcome::Dropped(DropReason::TokenMismatch);
        }
        self.latency_token = 0;

        let rtt = self
            .last_latency_test
            .map_or(Duration::ZERO, |sent| now.saturating_duration_since(sent));
        self.intro.latency = rtt.max(MIN_LATENCY);

        if self.status == PathStatus::Building {
            self.transition(PathStatus::Established);
            info!(path = %self.name, latency_ms = duration_millis(self.intro.latency), "Path established");
        }
        if !self.ready_fired {
            self.ready_fired = true;
            self.events.push(CircuitEvent::Ready);
        }
        HandleOutcome::Accepted
    }

    fn handle_dht(&mut self, inner: &[nyxpath_core::protocol::Value]) -> HandleOutcome {
        if !inner.is_empty() {
            self.events.push(CircuitEvent::Dht(inner.to_vec()));
        }
        HandleOutcome::Accepted
    }

    fn verify_terminal(&self, msg: &RoutingMessage) -> bool {
        IdentityPublicKey::from_router_id(&self.intro.router)
            .and_then(|key| verify_exit(msg, &key))
            .is_ok()
    }

    /// Grant (`backoff == None`) or reject.
    fn handle_exit_reply(&mut self, msg: &RoutingMessage, tx_id: u64, backoff: Option<u64>) -> HandleOutcome {
        if self.exit_tx != Some(tx_id) {
            return HandleOutcome::Dropped(DropReason::TxMismatch);
        }
        if !self.verify_terminal(msg) {
            return HandleOutcome::Dropped(DropReason::BadSignature);
        }
        self.exit_tx = None;

        match backoff {
            None => {
                self.roles.insert(PathRoles::EXIT);
                info!(path = %self.name, tx_id, "Exit granted");
                self.events.push(CircuitEvent::ExitGranted { tx_id });
            }
            Some(backoff_ms) => {
                info!(path = %self.name, tx_id, backoff_ms, "Exit rejected");
                self.events.push(CircuitEvent::ExitRejected { tx_id, backoff_ms });
            }
        }
        HandleOutcome::Accepted
    }

    fn handle_update_verify(&mut self, tx_id: u64) -> HandleOutcome {
        if self.update_tx != Some(tx_id) {
            return HandleOutcome::Dropped(DropReason::TxMismatch);
        }
        self.update_tx = None;
        self.roles.insert(PathRoles::EXIT);
        self.events.push(CircuitEvent::ExitUpdated { tx_id });
        HandleOutcome::Accepted
    }

    fn handle_close(&mut self, msg: &RoutingMessage) -> HandleOutcome {
        if !self.verify_terminal(msg) {
            return HandleOutcome::Dropped(DropReason::BadSignature);
        }
        self.roles.remove(PathRoles::EXIT);
        info!(path = %self.name, "Exit closed by remote");
        self.events.push(CircuitEvent::ExitClosed);
        HandleOutcome::Accepted
    }

    fn handle_traffic(&mut self, packets: &[Vec<u8>]) -> HandleOutcome {
        if !self.roles.intersects(PathRoles::EXIT | PathRoles::SERVICE) {
            return HandleOutcome::Dropped(DropReason::MissingRole);
        }
        for packet in packets {
            let Some((counter, body)) = split_counter(packet) else {
                continue;
            };
            if !counter.is_newer_than(&self.last_exit_counter) {
                trace!(path = %self.name, counter = counter.value(), "Stale exit counter");
                continue;
            }
            self.last_exit_counter = counter;
            self.events.push(CircuitEvent::ExitTraffic {
                counter: counter.value(),
                packet: body.to_vec(),
            });
        }
        HandleOutcome::Accepted
    }

    // ========================================
    // Exit Negotiation (client side)
    // ========================================

    /// Sends a signed obtain-exit request and returns its transaction id.
    ///
    /// # Errors
    /// `PathState` unless established, otherwise send errors.
    pub fn obtain_exit(
        &mut self,
        identity: &IdentityKeyPair,
        flags: u64,
        expires_ms: u64,
        env: &PathEnv,
    ) -> Result<u64> {
        self.require_established("established")?;
        let tx_id = nonzero_u64();
        let body = RoutingBody::ObtainExit(ObtainExit::new(&identity.public_key(), tx_id, flags, expires_ms));
        self.send_signed(body, identity, env)?;
        self.exit_tx = Some(tx_id);
        debug!(path = %self.name, tx_id, "Exit requested");
        Ok(tx_id)
    }

    /// Asks the terminal hop to move the exit session bound to `old_path`
    /// onto this circuit.
    ///
    /// # Errors
    /// `PathState` unless established, otherwise send errors.
    pub fn update_exit(&mut self, identity: &IdentityKeyPair, old_path: PathId, env: &PathEnv) -> Result<u64> {
        self.require_established("established")?;
        let tx_id = nonzero_u64();
        self.send_signed(RoutingBody::UpdateExit(UpdateExit::new(old_path, tx_id)), identity, env)?;
        self.update_tx = Some(tx_id);
        Ok(tx_id)
    }

    /// Drops the exit role and tells the terminal hop.
    ///
    /// # Errors
    /// `NoExit` if the circuit holds no exit, otherwise send errors.
    pub fn close_exit(&mut self, identity: &IdentityKeyPair, env: &PathEnv) -> Result<()> {
        if !self.roles.contains(PathRoles::EXIT) {
            return Err(RouterError::NoExit(self.tx_id()));
        }
        self.roles.remove(PathRoles::EXIT);
        info!(path = %self.name, "Closing exit");
        self.send_signed(RoutingBody::CloseExit(CloseExit::new()), identity, env)
    }

    /// Sends packets to the exit, each prefixed with the next counter.
    ///
    /// # Errors
    /// `NoExit` without the exit role, otherwise send errors.
    pub fn send_exit_traffic(&mut self, packets: Vec<Vec<u8>>, env: &PathEnv) -> Result<()> {
        if !self.roles.contains(PathRoles::EXIT) {
            return Err(RouterError::NoExit(self.tx_id()));
        }
        let framed = packets
            .into_iter()
            .map(|packet| {
                let mut out = self.exit_tx_counter.advance().to_be_bytes().to_vec();
                out.extend_from_slice(&packet);
                out
            })
            .collect();
        self.send_routing_message(RoutingBody::TransferTraffic(framed), env)
    }

    fn require_established(&self, required: &str) -> Result<()> {
        if self.status == PathStatus::Established {
            Ok(())
        } else {
            Err(RouterError::path_state(self.name.clone(), self.status, required))
        }
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("roles", &self.roles)
            .field("hops", &self.hops.len())
            .finish_non_exhaustive()
    }
}

/// Random token, never zero.
fn nonzero_u64() -> u64 {
    loop {
        let v: u64 = rand::random();
        if v != 0 {
            return v;
        }
    }
}

// ============================================
// CircuitStatus
// ============================================

/// Diagnostic snapshot of a circuit.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub tx_id: PathId,
    pub rx_id: PathId,
    pub status: PathStatus,
    pub roles: PathRoles,
    pub hops: Vec<RouterId>,
    pub terminal: RouterId,
    pub intro_path: PathId,
    pub latency_ms: u64,
    pub expires_in_ms: u64,
    pub ready: bool,
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use nyxpath_core::crypto::XChaCha20Onion;
    use nyxpath_core::protocol::{GrantExit, PathConfirm, RejectExit};
    use nyxpath_transport::LinkSender;

    use crate::path::transit::TransitHop;
    use crate::services::{NullDht, RouterProfiling};

    /// Link that records every frame instead of sending it.
    #[derive(Default)]
    pub(crate) struct RecordingLink {
        pub frames: Mutex<Vec<(RouterId, Bytes)>>,
        pub persisted: Mutex<Vec<(RouterId, Instant)>>,
    }

    impl LinkSender for RecordingLink {
        fn send_to(&self, to: &RouterId, frame: Bytes) -> nyxpath_transport::Result<()> {
            self.frames.lock().push((*to, frame));
            Ok(())
        }

        fn persist_session(&self, router: &RouterId, until: Instant) {
            self.persisted.lock().push((*router, until));
        }
    }

    pub(crate) fn test_env(link: Arc<RecordingLink>) -> (PathEnv, Arc<RouterProfiling>) {
        let profiler = Arc::new(RouterProfiling::new());
        let env = PathEnv {
            local: RouterId::from_array([0xAA; 32]),
            link,
            onion: Arc::new(XChaCha20Onion::new()),
            profiler: profiler.clone(),
            dht: Arc::new(NullDht),
        };
        (env, profiler)
    }

    fn routers(n: u8) -> Vec<(RouterId, SharedSecret)> {
        (1..=n)
            .map(|i| (RouterId::from_array([i; 32]), SharedSecret::random()))
            .collect()
    }

    fn circuit(n: u8, roles: PathRoles, now: Instant) -> Circuit {
        Circuit::new(routers(n), Duration::from_secs(600), roles, now).unwrap()
    }

    /// Confirms `c` and answers the probe, leaving it established.
    fn establish(c: &mut Circuit, now: Instant, env: &PathEnv) {
        let confirm = PathConfirm { lifetime_ms: 600_000, created_ms: 0 };
        assert!(c
            .handle_message(RoutingMessage::new(RoutingBody::PathConfirm(confirm)), now, env)
            .is_accepted());
        let echo = c.latency_token;
        let reply = RoutingBody::PathLatency(PathLatency { token: 0, echo });
        assert!(c
            .handle_message(RoutingMessage::new(reply), now + Duration::from_millis(20), env)
            .is_accepted());
    }

    #[test]
    fn test_hop_chain_linked() {
        let now = Instant::now();
        for n in 1..=8u8 {
            let c = circuit(n, PathRoles::CLIENT, now);
            let hops = c.hops();
            for i in 0..hops.len() - 1 {
                assert_eq!(hops[i].tx_id, hops[i + 1].rx_id);
            }
            assert_eq!(c.intro().path_id, hops[hops.len() - 1].tx_id);
            assert_eq!(c.state(), PathStatus::Building);
        }
    }

    #[test]
    fn test_hop_count_bounds() {
        let now = Instant::now();
        for n in [0u8, 9] {
            let err = Circuit::new(routers(n), Duration::from_secs(1), PathRoles::CLIENT, now).unwrap_err();
            assert!(matches!(err, RouterError::Common(CommonError::HopCount { .. })));
        }
    }

    #[test]
    fn test_commit_records() {
        let c = circuit(3, PathRoles::CLIENT, Instant::now());
        let records = c.commit_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].upstream, c.hops()[1].router);
        assert_eq!(records[1].upstream, c.hops()[2].router);
        // Should name itself as upstream on the terminal hop
        assert_eq!(records[2].upstream, c.hops()[2].router);
    }

    #[test]
    fn test_onion_round_trip() {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link.clone());
        let now = Instant::now();
        let mut c = circuit(3, PathRoles::CLIENT, now);
        let transit: Vec<TransitHop> = c
            .commit_records()
            .iter()
            .map(|r| TransitHop::from_record(r, RouterId::from_array([0; 32]), now).unwrap())
            .collect();

        // Upstream: every hop peels one layer
        let payload = b"onion payload".to_vec();
        let nonce = TunnelNonce::random();
        c.send_upstream(payload.clone(), nonce, &env).unwrap();
        let (to, frame) = link.frames.lock().pop().unwrap();
        assert_eq!(to, c.first_hop());
        let LinkMessage::RelayUpstream(cell) = LinkMessage::from_bytes(frame).unwrap() else {
            panic!("expected upstream cell");
        };
        assert_eq!(cell.path_id, c.tx_id());
        let mut buf = cell.payload.to_vec();
        let mut y = cell.nonce;
        for hop in &transit {
            env.onion.apply_layer(&mut buf, hop.shared(), &y).unwrap();
            y ^= hop.nonce_xor();
        }
        assert_eq!(buf, payload);

        // Downstream: terminal first, each hop adds its layer
        let msg = RoutingMessage::new(RoutingBody::DataDiscard { path_id: c.tx_id() });
        let mut buf = msg.encode_padded();
        let mut y = TunnelNonce::random();
        for hop in transit.iter().rev() {
            env.onion.apply_layer(&mut buf, hop.shared(), &y).unwrap();
            y ^= hop.nonce_xor();
        }
        assert!(c.recv_downstream(&buf, y, now, &env).is_accepted());
        assert_eq!(
            c.take_events(),
            vec![CircuitEvent::DataDropped { path_id: c.tx_id() }]
        );
    }

    #[test]
    fn test_garbage_downstream_dropped() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let mut c = circuit(2, PathRoles::CLIENT, Instant::now());
        let outcome = c.recv_downstream(&[0x42; 128], TunnelNonce::random(), Instant::now(), &env);
        assert_eq!(outcome, HandleOutcome::Dropped(DropReason::Malformed));
        assert!(c.take_events().is_empty());
    }

    #[test]
    fn test_build_timeout_fires_once() {
        let (env, profiler) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(3, PathRoles::CLIENT, now);

        c.tick(now + Duration::from_secs(29), &env);
        assert_eq!(c.state(), PathStatus::Building);

        c.tick(now + BUILD_TIMEOUT, &env);
        c.tick(now + BUILD_TIMEOUT + Duration::from_secs(1), &env);
        assert_eq!(c.state(), PathStatus::Timeout);
        assert_eq!(c.take_events(), vec![CircuitEvent::BuildTimeout]);

        // Should report the failure against the non-first hops
        assert_eq!(profiler.profile(&c.hops()[1].router).unwrap().fails, 1);

        assert!(!c.is_expired(now + BUILD_TIMEOUT));
        assert!(c.is_expired(now + PATH_REANIMATION_TIMEOUT));
    }

    #[test]
    fn test_confirm_then_latency_establishes() {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link.clone());
        let now = Instant::now();
        let mut c = circuit(3, PathRoles::CLIENT, now);

        establish(&mut c, now, &env);
        assert_eq!(c.state(), PathStatus::Established);
        assert!(c.is_ready(now + Duration::from_secs(1)));
        assert_eq!(c.intro().latency, Duration::from_millis(20));
        assert_eq!(c.take_events(), vec![CircuitEvent::Ready]);
        assert_eq!(link.persisted.lock()[0].0, c.first_hop());

        // Should reject a second confirm
        let confirm = PathConfirm { lifetime_ms: 1, created_ms: 0 };
        assert_eq!(
            c.handle_message(RoutingMessage::new(RoutingBody::PathConfirm(confirm)), now, &env),
            HandleOutcome::Dropped(DropReason::WrongState)
        );
    }

    #[test]
    fn test_latency_token_mismatch() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(2, PathRoles::CLIENT, now);
        let confirm = PathConfirm { lifetime_ms: 600_000, created_ms: 0 };
        c.handle_message(RoutingMessage::new(RoutingBody::PathConfirm(confirm)), now, &env);

        let wrong = c.latency_token.wrapping_add(1);
        let reply = RoutingBody::PathLatency(PathLatency { token: 0, echo: wrong });
        assert_eq!(
            c.handle_message(RoutingMessage::new(reply), now, &env),
            HandleOutcome::Dropped(DropReason::TokenMismatch)
        );
        assert_eq!(c.state(), PathStatus::Building);
        assert!(c.intro().latency.is_zero());
        assert!(c.take_events().is_empty());
    }

    #[test]
    fn test_latency_floor() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(1, PathRoles::CLIENT, now);
        let confirm = PathConfirm { lifetime_ms: 600_000, created_ms: 0 };
        c.handle_message(RoutingMessage::new(RoutingBody::PathConfirm(confirm)), now, &env);
        let reply = RoutingBody::PathLatency(PathLatency { token: 0, echo: c.latency_token });
        c.handle_message(RoutingMessage::new(reply), now, &env);

        // Should never store a zero latency
        assert_eq!(c.intro().latency, MIN_LATENCY);
    }

    fn terminal_circuit(terminal: &IdentityKeyPair, now: Instant) -> Circuit {
        let hops = vec![
            (RouterId::from_array([1; 32]), SharedSecret::random()),
            (terminal.router_id(), SharedSecret::random()),
        ];
        Circuit::new(hops, Duration::from_secs(600), PathRoles::CLIENT, now).unwrap()
    }

    fn signed(body: RoutingBody, key: &IdentityKeyPair) -> RoutingMessage {
        let mut msg = RoutingMessage::new(body);
        sign_exit(&mut msg, key).unwrap();
        msg
    }

    #[test]
    fn test_exit_grant_validation() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let terminal = IdentityKeyPair::generate();
        let client = IdentityKeyPair::generate();
        let mut c = terminal_circuit(&terminal, now);
        establish(&mut c, now, &env);
        c.take_events();

        let tx = c.obtain_exit(&client, 0, 0, &env).unwrap();

        // Should drop a grant for another transaction
        let other_tx = signed(RoutingBody::GrantExit(GrantExit::new(tx ^ 1)), &terminal);
        assert_eq!(
            c.handle_message(other_tx, now, &env),
            HandleOutcome::Dropped(DropReason::TxMismatch)
        );

        // Should drop a grant signed by someone else
        let forged = signed(RoutingBody::GrantExit(GrantExit::new(tx)), &client);
        assert_eq!(
            c.handle_message(forged, now, &env),
            HandleOutcome::Dropped(DropReason::BadSignature)
        );
        assert!(!c.roles().contains(PathRoles::EXIT));

        let grant = signed(RoutingBody::GrantExit(GrantExit::new(tx)), &terminal);
        assert!(c.handle_message(grant, now, &env).is_accepted());
        assert!(c.roles().contains(PathRoles::EXIT));
        assert_eq!(c.take_events(), vec![CircuitEvent::ExitGranted { tx_id: tx }]);

        // Should only clear the exit role on remote close
        let close = signed(RoutingBody::CloseExit(CloseExit::new()), &terminal);
        assert!(c.handle_message(close, now, &env).is_accepted());
        assert_eq!(c.roles(), PathRoles::CLIENT);
    }

    #[test]
    fn test_exit_reject() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let terminal = IdentityKeyPair::generate();
        let client = IdentityKeyPair::generate();
        let mut c = terminal_circuit(&terminal, now);
        establish(&mut c, now, &env);
        c.take_events();

        let tx = c.obtain_exit(&client, 0, 0, &env).unwrap();
        let reject = signed(RoutingBody::RejectExit(RejectExit::new(tx, 5000)), &terminal);
        assert!(c.handle_message(reject, now, &env).is_accepted());
        assert!(!c.roles().contains(PathRoles::EXIT));
        assert_eq!(
            c.take_events(),
            vec![CircuitEvent::ExitRejected { tx_id: tx, backoff_ms: 5000 }]
        );

        // Should not accept a grant once the request was answered
        let late = signed(RoutingBody::GrantExit(GrantExit::new(tx)), &terminal);
        assert_eq!(
            c.handle_message(late, now, &env),
            HandleOutcome::Dropped(DropReason::TxMismatch)
        );
    }

    fn counted(counter: u64, body: &[u8]) -> Vec<u8> {
        let mut packet = counter.to_be_bytes().to_vec();
        packet.extend_from_slice(body);
        packet
    }

    #[test]
    fn test_exit_traffic_counters() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(2, PathRoles::CLIENT, now);
        let packets = vec![counted(1, b"a")];

        // Should refuse traffic without exit or service role
        assert_eq!(
            c.handle_message(RoutingMessage::new(RoutingBody::TransferTraffic(packets)), now, &env),
            HandleOutcome::Dropped(DropReason::MissingRole)
        );

        let mut c = circuit(2, PathRoles::EXIT, now);
        let packets = vec![
            counted(1, b"a"),
            counted(3, b"b"),
            counted(2, b"stale"),
            counted(3, b"replay"),
            7u64.to_be_bytes().to_vec(),
        ];
        assert!(c
            .handle_message(RoutingMessage::new(RoutingBody::TransferTraffic(packets)), now, &env)
            .is_accepted());
        assert_eq!(
            c.take_events(),
            vec![
                CircuitEvent::ExitTraffic { counter: 1, packet: b"a".to_vec() },
                CircuitEvent::ExitTraffic { counter: 3, packet: b"b".to_vec() },
            ]
        );
    }

    #[test]
    fn test_unwarranted_messages() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(2, PathRoles::CLIENT, now);
        let key = IdentityKeyPair::generate();
        let obtain = RoutingBody::ObtainExit(ObtainExit::new(&key.public_key(), 1, 0, 0));
        assert_eq!(
            c.handle_message(RoutingMessage::new(obtain), now, &env),
            HandleOutcome::Dropped(DropReason::Unwarranted)
        );
        let update = RoutingBody::UpdateExit(UpdateExit::new(PathId::generate(), 1));
        assert_eq!(
            c.handle_message(RoutingMessage::new(update), now, &env),
            HandleOutcome::Dropped(DropReason::Unwarranted)
        );
    }

    #[test]
    fn test_alive_timeout_for_exit_path() {
        let (env, _) = test_env(Arc::new(RecordingLink::default()));
        let now = Instant::now();
        let mut c = circuit(2, PathRoles::EXIT, now);
        establish(&mut c, now, &env);
        c.take_events();

        c.tick(now + Duration::from_secs(5), &env);
        assert_eq!(c.state(), PathStatus::Established);

        // Should not count dropped messages as signs of life
        let stale = RoutingMessage::new(RoutingBody::PathConfirm(PathConfirm {
            lifetime_ms: 600_000,
            created_ms: 0,
        }));
        let outcome = c.handle_message(stale, now + Duration::from_secs(8), &env);
        assert_eq!(outcome, HandleOutcome::Dropped(DropReason::WrongState));
        let forged = RoutingMessage::new(RoutingBody::PathLatency(PathLatency { token: 0, echo: 7 }));
        assert!(!c.handle_message(forged, now + Duration::from_secs(9), &env).is_accepted());

        c.tick(now + Duration::from_secs(11), &env);
        assert_eq!(c.state(), PathStatus::Timeout);
        assert_eq!(c.take_events(), vec![CircuitEvent::PathDied]);
    }

    #[test]
    fn test_client_path_probes_and_expires() {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link.clone());
        let now = Instant::now();
        let mut c = Circuit::new(routers(2), Duration::from_secs(60), PathRoles::CLIENT, now).unwrap();
        establish(&mut c, now, &env);
        let sent = link.frames.lock().len();

        // Should send a fresh probe after the interval, and not die while silent
        c.tick(now + Duration::from_secs(30), &env);
        assert_eq!(c.state(), PathStatus::Established);
        assert_eq!(link.frames.lock().len(), sent + 1);

        assert!(c.expires_soon(now + Duration::from_secs(56), Duration::from_secs(5)));
        c.tick(now + Duration::from_secs(60), &env);
        assert_eq!(c.state(), PathStatus::Expired);
        assert!(c.is_expired(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_status_snapshot_serializes() {
        let now = Instant::now();
        let c = circuit(2, PathRoles::CLIENT | PathRoles::SERVICE, now);
        let json = serde_json::to_value(c.status(now)).unwrap();
        assert_eq!(json["status"], "building");
        assert_eq!(json["roles"], serde_json::json!(["service", "client"]));
        assert_eq!(json["hops"].as_array().unwrap().len(), 2);
        assert_eq!(c.name(), format!("TX={} RX={}", c.tx_id(), c.rx_id()));
    }
}
