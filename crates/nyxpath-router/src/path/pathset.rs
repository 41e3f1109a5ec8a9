// ============================================
// File: crates/nyxpath-router/src/path/pathset.rs
// ============================================
//! # Path Set
//!
//! ## Creation Reason
//! Owner of a group of originated circuits. Builds them, keeps enough of
//! them alive, routes downstream cells into them and reports what happened
//! to whoever owns the set through `PathSetHooks`.
//!
//! ## Main Functionality
//! - `PathSet::build`: negotiate keys, register, send the build commit
//! - `PathSet::handle_downstream`: feed a cell to the circuit it belongs to
//! - `PathSet::tick` / `maintain` / `expire_paths`: periodic upkeep
//! - lookups: by terminal router, closest terminal to a key
//! - client exit API: obtain, update, close, send traffic
//!
//! ## Ownership
//! ```text
//! ┌──────────────────────────┐         ┌───────────────────────────────┐
//! │ PathSet (Arc)            │ ◄─Weak─ │ PathRegistry own table        │
//! │  Mutex<HashMap<tx, Circuit>>       │  tx ─► (owner, first hop, tx) │
//! │                          │         │  rx ─► (owner, first hop, tx) │
//! └──────────────────────────┘         └───────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Hooks run after the arena lock is released; they may call back into
//!   the set or the registry
//! - Expired circuits are removed by the registry sweep, which also drops
//!   their index entries
//!
//! ## Last Modified
//! v0.1.0 - Initial path set

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::{debug, info, trace, warn};

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::IdentityKeyPair;
use nyxpath_core::protocol::{LinkMessage, RelayCell, RoutingBody, Value};

use super::circuit::{Circuit, CircuitStatus};
use super::{
    CircuitEvent, DropReason, HandleOutcome, PathEnv, PathRoles, PathStatus,
    DEFAULT_PATH_LIFETIME, EXPIRES_SOON_DELTA,
};
use crate::error::{Result, RouterError};
use crate::registry::PathRegistry;
use crate::services::HopKeySource;

// ============================================
// Hooks
// ============================================

/// Callbacks from a `PathSet` to its owner. Every callback gets the
/// circuit's txID.
pub trait PathSetHooks: Send + Sync {
    /// First latency reply arrived; the circuit is usable.
    fn on_build_success(&self, _path: PathId) {}

    /// The circuit never confirmed.
    fn on_build_timeout(&self, _path: PathId) {}

    /// An established exit or service circuit went silent.
    fn on_path_died(&self, _path: PathId) {}

    /// The terminal hop could not deliver data addressed to `_target`.
    fn on_data_drop(&self, _path: PathId, _target: PathId) {}

    fn on_hidden_service_frame(&self, _path: PathId, _frame: Vec<u8>) {}

    /// Exit traffic with its counter.
    fn on_exit_traffic(&self, _path: PathId, _counter: u64, _packet: Vec<u8>) {}

    fn on_exit_granted(&self, _path: PathId, _tx_id: u64) {}

    fn on_exit_rejected(&self, _path: PathId, _tx_id: u64, _backoff_ms: u64) {}

    fn on_exit_updated(&self, _path: PathId, _tx_id: u64) {}

    fn on_exit_closed(&self, _path: PathId) {}
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl PathSetHooks for LoggingHooks {
    fn on_build_success(&self, path: PathId) {
        info!(path = %path, "Path ready");
    }

    fn on_build_timeout(&self, path: PathId) {
        warn!(path = %path, "Path build timed out");
    }

    fn on_path_died(&self, path: PathId) {
        warn!(path = %path, "Path died");
    }

    fn on_data_drop(&self, path: PathId, target: PathId) {
        debug!(path = %path, target = %target, "Data dropped at terminal hop");
    }

    fn on_hidden_service_frame(&self, path: PathId, frame: Vec<u8>) {
        debug!(path = %path, len = frame.len(), "Hidden service frame");
    }

    fn on_exit_traffic(&self, path: PathId, counter: u64, packet: Vec<u8>) {
        trace!(path = %path, counter, len = packet.len(), "Exit traffic");
    }
}

// ============================================
// PathSetConfig
// ============================================

/// Shape of the circuits a `PathSet` maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSetConfig {
    /// Hops per circuit
    pub hops: usize,
    /// Circuits to keep alive
    pub paths: usize,
    /// Hop lifetime
    pub lifetime: Duration,
}

impl Default for PathSetConfig {
    fn default() -> Self {
        Self {
            hops: 3,
            paths: 2,
            lifetime: DEFAULT_PATH_LIFETIME,
        }
    }
}

// ============================================
// PathSet
// ============================================

/// Arena of originated circuits, keyed by txID.
pub struct PathSet {
    name: String,
    config: PathSetConfig,
    paths: Mutex<HashMap<PathId, Circuit>>,
    hooks: Arc<dyn PathSetHooks>,
    env: PathEnv,
    keys: Arc<dyn HopKeySource>,
    exit_identity: Arc<IdentityKeyPair>,
}

impl PathSet {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: PathSetConfig,
        env: PathEnv,
        keys: Arc<dyn HopKeySource>,
        exit_identity: Arc<IdentityKeyPair>,
        hooks: Arc<dyn PathSetHooks>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            paths: Mutex::new(HashMap::new()),
            hooks,
            env,
            keys,
            exit_identity,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn config(&self) -> PathSetConfig {
        self.config
    }

    /// Number of circuits in the arena, whatever their state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    #[must_use]
    pub fn contains(&self, path: &PathId) -> bool {
        self.paths.lock().contains_key(path)
    }

    // ========================================
    // Build
    // ========================================

    /// Builds a circuit over `routers` and sends its commit to the first hop.
    ///
    /// Returns the new circuit's txID.
    ///
    /// # Errors
    /// - hop count or key negotiation failures
    /// - `PathExists` on an id collision in the registry
    /// - the link refusing the commit; the circuit is rolled back
    pub fn build(
        self: &Arc<Self>,
        routers: &[RouterId],
        roles: PathRoles,
        now: Instant,
        registry: &PathRegistry,
    ) -> Result<PathId> {
        let hops = routers
            .iter()
            .map(|router| self.keys.negotiate(router).map(|secret| (*router, secret)))
            .collect::<Result<Vec<_>>>()?;
        let circuit = Circuit::new(hops, self.config.lifetime, roles, now)?;

        let tx = circuit.tx_id();
        let rx = circuit.rx_id();
        let first_hop = circuit.first_hop();
        let commit = LinkMessage::BuildCommit(circuit.commit_records()).to_bytes();
        let hops_string = circuit.hops_string();

        registry.register_own(self, tx, rx, first_hop)?;
        self.paths.lock().insert(tx, circuit);

        if let Err(e) = self.env.link.send_to(&first_hop, commit) {
            warn!(set = %self.name, path = %tx, error = %e, "Build commit not sent");
            self.paths.lock().remove(&tx);
            registry.unregister_own(&tx, &rx);
            return Err(e.into());
        }

        info!(set = %self.name, path = %tx, hops = %hops_string, "Building path");
        Ok(tx)
    }

    /// Picks `config.hops` distinct usable routers from `peers`.
    ///
    /// # Errors
    /// `NotEnoughRouters` if too few peers are left after skipping this
    /// router and routers the profiler considers bad.
    pub fn select_hops(&self, peers: &[RouterId]) -> Result<Vec<RouterId>> {
        let candidates: Vec<RouterId> = peers
            .iter()
            .filter(|p| **p != self.env.local && !self.env.profiler.is_bad(p))
            .copied()
            .collect();
        if candidates.len() < self.config.hops {
            return Err(RouterError::NotEnoughRouters {
                needed: self.config.hops,
                available: candidates.len(),
            });
        }
        let mut rng = rand::thread_rng();
        Ok(candidates
            .choose_multiple(&mut rng, self.config.hops)
            .copied()
            .collect())
    }

    /// Returns `true` if fewer than `config.paths` circuits are building or
    /// usable for a while longer.
    #[must_use]
    pub fn should_build_more(&self, now: Instant) -> bool {
        let paths = self.paths.lock();
        let alive = paths
            .values()
            .filter(|c| match c.state() {
                PathStatus::Building => true,
                PathStatus::Established => !c.expires_soon(now, EXPIRES_SOON_DELTA),
                PathStatus::Timeout | PathStatus::Expired => false,
            })
            .count();
        alive < self.config.paths
    }

    /// Builds circuits from `peers` until `should_build_more` is satisfied.
    ///
    /// Returns how many builds were started.
    pub fn maintain(
        self: &Arc<Self>,
        now: Instant,
        peers: &[RouterId],
        registry: &PathRegistry,
    ) -> usize {
        let mut started = 0;
        while self.should_build_more(now) && started < self.config.paths {
            let built = self
                .select_hops(peers)
                .and_then(|hops| self.build(&hops, PathRoles::CLIENT, now, registry));
            match built {
                Ok(_) => started += 1,
                Err(e) => {
                    debug!(set = %self.name, error = %e, "Path maintenance stopped");
                    break;
                }
            }
        }
        started
    }

    // ========================================
    // Traffic
    // ========================================

    /// Feeds a downstream cell to circuit `key` and dispatches its events.
    pub fn handle_downstream(&self, key: PathId, cell: &RelayCell, now: Instant) -> HandleOutcome {
        let (outcome, events) = {
            let mut paths = self.paths.lock();
            let Some(circuit) = paths.get_mut(&key) else {
                return HandleOutcome::Dropped(DropReason::NoSuchPath);
            };
            let outcome = circuit.recv_downstream(&cell.payload, cell.nonce, now, &self.env);
            (outcome, circuit.take_events())
        };
        self.dispatch(key, events);
        outcome
    }

    /// Sends a routing message up circuit `key`.
    ///
    /// # Errors
    /// `PathNotFound`, or send errors.
    pub fn send_routing_message(&self, key: PathId, body: RoutingBody) -> Result<()> {
        self.with_path(key, |circuit, env, _| circuit.send_routing_message(body, env))
    }

    /// Advances every circuit's timers.
    pub fn tick(&self, now: Instant) {
        let events: Vec<(PathId, Vec<CircuitEvent>)> = {
            let mut paths = self.paths.lock();
            paths
                .iter_mut()
                .map(|(key, circuit)| {
                    circuit.tick(now, &self.env);
                    (*key, circuit.take_events())
                })
                .filter(|(_, events)| !events.is_empty())
                .collect()
        };
        for (key, events) in events {
            self.dispatch(key, events);
        }
    }

    /// Hands a hidden-service frame addressed to circuit `key` to the hooks.
    ///
    /// Returns `false` if there is no such circuit.
    pub fn deliver_hidden_service(&self, key: PathId, frame: Vec<u8>) -> bool {
        if !self.contains(&key) {
            return false;
        }
        self.hooks.on_hidden_service_frame(key, frame);
        true
    }

    /// Removes circuits that are done and returns their `(tx, rx)` ids so
    /// the registry can drop its index entries.
    pub fn expire_paths(&self, now: Instant) -> Vec<(PathId, PathId)> {
        let mut removed = Vec::new();
        self.paths.lock().retain(|key, circuit| {
            if circuit.is_expired(now) {
                removed.push((*key, circuit.rx_id()));
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            debug!(set = %self.name, removed = removed.len(), "Expired paths removed");
        }
        removed
    }

    fn dispatch(&self, key: PathId, events: Vec<CircuitEvent>) {
        for event in events {
            match event {
                CircuitEvent::Ready => self.hooks.on_build_success(key),
                CircuitEvent::BuildTimeout => self.hooks.on_build_timeout(key),
                CircuitEvent::PathDied => self.hooks.on_path_died(key),
                CircuitEvent::DataDropped { path_id } => self.hooks.on_data_drop(key, path_id),
                CircuitEvent::HiddenServiceFrame(frame) => {
                    self.hooks.on_hidden_service_frame(key, frame);
                }
                CircuitEvent::ExitTraffic { counter, packet } => {
                    self.hooks.on_exit_traffic(key, counter, packet);
                }
                CircuitEvent::ExitGranted { tx_id } => self.hooks.on_exit_granted(key, tx_id),
                CircuitEvent::ExitRejected { tx_id, backoff_ms } => {
                    self.hooks.on_exit_rejected(key, tx_id, backoff_ms);
                }
                CircuitEvent::ExitUpdated { tx_id } => self.hooks.on_exit_updated(key, tx_id),
                CircuitEvent::ExitClosed => self.hooks.on_exit_closed(key),
                CircuitEvent::Dht(inner) => self.answer_dht(key, &inner),
            }
        }
    }

    /// Runs the DHT over messages that arrived on circuit `key` and sends
    /// its replies back up the same circuit. Must not be called with the
    /// arena locked: the DHT may open lookups through this set.
    fn answer_dht(&self, key: PathId, inner: &[Value]) {
        let Some(rx_id) = self.paths.lock().get(&key).map(Circuit::rx_id) else {
            return;
        };
        let replies: Vec<Value> = inner
            .iter()
            .filter_map(|m| self.env.dht.handle(rx_id, m))
            .collect();
        if replies.is_empty() {
            return;
        }
        if let Err(e) = self.send_routing_message(key, RoutingBody::Dht(replies)) {
            debug!(path = %key, error = %e, "DHT reply not sent");
        }
    }

    fn with_path<T>(
        &self,
        key: PathId,
        f: impl FnOnce(&mut Circuit, &PathEnv, &IdentityKeyPair) -> Result<T>,
    ) -> Result<T> {
        let mut paths = self.paths.lock();
        let circuit = paths.get_mut(&key).ok_or(RouterError::PathNotFound(key))?;
        f(circuit, &self.env, self.exit_identity.as_ref())
    }

    // ========================================
    // Lookups
    // ========================================

    /// Number of circuits in `status`.
    #[must_use]
    pub fn num_in_status(&self, status: PathStatus) -> usize {
        self.paths.lock().values().filter(|c| c.state() == status).count()
    }

    /// Number of circuits that are still around at `now`.
    #[must_use]
    pub fn num_paths_existing_at(&self, now: Instant) -> usize {
        self.paths.lock().values().filter(|c| !c.is_expired(now)).count()
    }

    /// Ready circuit ending at `router`, lowest latency first.
    #[must_use]
    pub fn get_path_by_router(&self, router: &RouterId, now: Instant) -> Option<PathId> {
        self.paths
            .lock()
            .iter()
            .filter(|(_, c)| c.terminal() == *router && c.is_ready(now))
            .min_by_key(|(_, c)| c.intro().latency)
            .map(|(key, _)| *key)
    }

    /// Ready circuit whose terminal router is closest to `target` by XOR
    /// distance.
    #[must_use]
    pub fn get_established_path_closest_to(&self, target: &RouterId, now: Instant) -> Option<PathId> {
        self.paths
            .lock()
            .iter()
            .filter(|(_, c)| c.is_ready(now))
            .min_by_key(|(_, c)| xor_distance(&c.terminal(), target))
            .map(|(key, _)| *key)
    }

    /// Any ready circuit not about to expire.
    #[must_use]
    pub fn pick_ready(&self, now: Instant) -> Option<PathId> {
        let paths = self.paths.lock();
        let ready: Vec<PathId> = paths
            .iter()
            .filter(|(_, c)| c.is_ready(now) && !c.expires_soon(now, EXPIRES_SOON_DELTA))
            .map(|(key, _)| *key)
            .collect();
        ready.choose(&mut rand::thread_rng()).copied()
    }

    /// Snapshot of circuit `key`.
    #[must_use]
    pub fn status_of(&self, key: &PathId, now: Instant) -> Option<CircuitStatus> {
        self.paths.lock().get(key).map(|c| c.status(now))
    }

    /// Snapshot of every circuit.
    #[must_use]
    pub fn snapshot(&self, now: Instant) -> Vec<CircuitStatus> {
        self.paths.lock().values().map(|c| c.status(now)).collect()
    }

    // ========================================
    // Exit API
    // ========================================

    /// Requests exit access on circuit `key`.
    ///
    /// # Errors
    /// `PathNotFound`, `PathState` unless established, or send errors.
    pub fn obtain_exit(&self, key: PathId, flags: u64, expires_ms: u64) -> Result<u64> {
        self.with_path(key, |circuit, env, identity| {
            circuit.obtain_exit(identity, flags, expires_ms, env)
        })
    }

    /// Moves the exit session held by circuit `from` onto circuit `to`.
    ///
    /// # Errors
    /// `PathNotFound` for either circuit, `NoExit` if `from` has none, or
    /// send errors.
    pub fn update_exit(&self, from: PathId, to: PathId) -> Result<u64> {
        let mut paths = self.paths.lock();
        let old = paths.get(&from).ok_or(RouterError::PathNotFound(from))?;
        if !old.roles().contains(PathRoles::EXIT) {
            return Err(RouterError::NoExit(from));
        }
        let old_session = old.terminal_rx_id();
        let circuit = paths.get_mut(&to).ok_or(RouterError::PathNotFound(to))?;
        circuit.update_exit(&self.exit_identity, old_session, &self.env)
    }

    /// Closes the exit session on circuit `key`.
    ///
    /// # Errors
    /// `PathNotFound`, `NoExit`, or send errors.
    pub fn close_exit(&self, key: PathId) -> Result<()> {
        self.with_path(key, |circuit, env, identity| circuit.close_exit(identity, env))
    }

    /// Sends exit traffic up circuit `key`.
    ///
    /// # Errors
    /// `PathNotFound`, `NoExit`, or send errors.
    pub fn send_exit_traffic(&self, key: PathId, packets: Vec<Vec<u8>>) -> Result<()> {
        self.with_path(key, |circuit, env, _| circuit.send_exit_traffic(packets, env))
    }
}

impl std::fmt::Debug for PathSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathSet")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("paths", &self.paths.lock().len())
            .finish_non_exhaustive()
    }
}

fn xor_distance(a: &RouterId, b: &RouterId) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.as_bytes().iter().zip(b.as_bytes())) {
        *o = x ^ y;
    }
    out
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::path::circuit::tests::{test_env, RecordingLink};
    use crate::services::{Profiler, RandomHopKeys};

    #[derive(Default)]
    struct CountingHooks {
        ready: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl PathSetHooks for CountingHooks {
        fn on_build_success(&self, _path: PathId) {
            self.ready.fetch_add(1, Ordering::SeqCst);
        }

        fn on_build_timeout(&self, _path: PathId) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn peers(n: u8) -> Vec<RouterId> {
        (1..=n).map(|i| RouterId::from_array([i; 32])).collect()
    }

    fn setup(paths: usize) -> (Arc<PathSet>, Arc<RecordingLink>, Arc<CountingHooks>, PathRegistry) {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link.clone());
        let hooks = Arc::new(CountingHooks::default());
        let registry = PathRegistry::new(env.local, 16);
        let config = PathSetConfig {
            hops: 3,
            paths,
            lifetime: Duration::from_secs(600),
        };
        let set = Arc::new(PathSet::new(
            "test",
            config,
            env,
            Arc::new(RandomHopKeys),
            Arc::new(IdentityKeyPair::generate()),
            hooks.clone(),
        ));
        (set, link, hooks, registry)
    }

    #[test]
    fn test_build_sends_commit_and_registers() {
        let (set, link, _, registry) = setup(1);
        let now = Instant::now();
        let tx = set.build(&peers(3), PathRoles::CLIENT, now, &registry).unwrap();

        let (to, frame) = link.frames.lock().pop().unwrap();
        assert_eq!(to, RouterId::from_array([1; 32]));
        let LinkMessage::BuildCommit(records) = LinkMessage::from_bytes(frame).unwrap() else {
            panic!("expected build commit");
        };
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].tx_id, tx);

        let rx = set.status_of(&tx, now).unwrap().rx_id;
        assert_eq!(registry.stats().own_entries, 2);
        assert!(registry.resolve_handler(&rx).is_some());
    }

    #[test]
    fn test_select_hops_skips_bad_and_self() {
        let (set, _, _, _) = setup(1);
        let bad = RouterId::from_array([2; 32]);
        for _ in 0..4 {
            set.env.profiler.report_path_fail(&[RouterId::from_array([0; 32]), bad]);
        }

        let mut candidates = peers(4);
        candidates.push(set.env.local);
        for _ in 0..10 {
            let hops = set.select_hops(&candidates).unwrap();
            assert_eq!(hops.len(), 3);
            assert!(!hops.contains(&bad));
            assert!(!hops.contains(&set.env.local));
        }

        let err = set.select_hops(&peers(2)).unwrap_err();
        assert!(matches!(err, RouterError::NotEnoughRouters { needed: 3, available: 2 }));
    }

    #[test]
    fn test_maintain_builds_up_to_target() {
        let (set, _, _, registry) = setup(2);
        let now = Instant::now();
        assert_eq!(set.maintain(now, &peers(5), &registry), 2);
        assert_eq!(set.num_in_status(PathStatus::Building), 2);
        assert!(!set.should_build_more(now));

        // Should build nothing without enough peers
        let (set, _, _, registry) = setup(2);
        assert_eq!(set.maintain(now, &peers(2), &registry), 0);
    }

    #[test]
    fn test_timeout_hook_and_expiry() {
        let (set, _, hooks, registry) = setup(1);
        let now = Instant::now();
        let tx = set.build(&peers(3), PathRoles::CLIENT, now, &registry).unwrap();

        set.tick(now + Duration::from_secs(31));
        set.tick(now + Duration::from_secs(32));
        assert_eq!(hooks.timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(set.num_in_status(PathStatus::Timeout), 1);
        assert!(set.should_build_more(now + Duration::from_secs(32)));

        let removed = registry.sweep_expired(now + Duration::from_secs(60));
        assert_eq!(removed, 1);
        assert!(!set.contains(&tx));
        assert_eq!(registry.stats().own_entries, 0);
    }

    struct ReentrantHooks {
        set: Mutex<std::sync::Weak<PathSet>>,
        seen: AtomicUsize,
    }

    impl PathSetHooks for ReentrantHooks {
        fn on_build_timeout(&self, _path: PathId) {
            if let Some(set) = self.set.lock().upgrade() {
                // Would deadlock if the arena lock were still held
                self.seen.store(set.len(), Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_hooks_may_reenter() {
        let link = Arc::new(RecordingLink::default());
        let (env, _) = test_env(link);
        let registry = PathRegistry::new(env.local, 16);
        let hooks = Arc::new(ReentrantHooks {
            set: Mutex::new(std::sync::Weak::new()),
            seen: AtomicUsize::new(0),
        });
        let set = Arc::new(PathSet::new(
            "reentrant",
            PathSetConfig::default(),
            env,
            Arc::new(RandomHopKeys),
            Arc::new(IdentityKeyPair::generate()),
            hooks.clone(),
        ));
        *hooks.set.lock() = Arc::downgrade(&set);

        let now = Instant::now();
        set.build(&peers(3), PathRoles::CLIENT, now, &registry).unwrap();
        set.tick(now + Duration::from_secs(30));
        assert_eq!(hooks.seen.load(Ordering::SeqCst), 1);
    }

    /// DHT that looks at the path set while answering.
    struct ReentrantDht {
        set: Mutex<std::sync::Weak<PathSet>>,
        seen: AtomicUsize,
    }

    impl crate::services::DhtHandler for ReentrantDht {
        fn handle(&self, _path: PathId, msg: &Value) -> Option<Value> {
            let set = self.set.lock().upgrade()?;
            self.seen.store(set.len(), Ordering::SeqCst);
            Some(msg.clone())
        }
    }

    #[test]
    fn test_dht_handler_may_reenter() {
        let link = Arc::new(RecordingLink::default());
        let (mut env, _) = test_env(link.clone());
        let dht = Arc::new(ReentrantDht {
            set: Mutex::new(std::sync::Weak::new()),
            seen: AtomicUsize::new(0),
        });
        let handler: Arc<dyn crate::services::DhtHandler> = dht.clone();
        env.dht = handler;
        let registry = PathRegistry::new(env.local, 16);
        let set = Arc::new(PathSet::new(
            "dht",
            PathSetConfig::default(),
            env,
            Arc::new(RandomHopKeys),
            Arc::new(IdentityKeyPair::generate()),
            Arc::new(LoggingHooks),
        ));
        *dht.set.lock() = Arc::downgrade(&set);

        let now = Instant::now();
        let tx = set.build(&peers(3), PathRoles::CLIENT, now, &registry).unwrap();
        let (_, frame) = link.frames.lock().pop().unwrap();
        let LinkMessage::BuildCommit(records) = LinkMessage::from_bytes(frame).unwrap() else {
            panic!("expected build commit");
        };

        // Wrap an M message the way the hops would on its way down
        let lookup = Value::dict().with_bytes("A", "F");
        let msg = nyxpath_core::protocol::RoutingMessage::new(RoutingBody::Dht(vec![lookup]));
        let mut payload = msg.encode_padded();
        let mut nonce = nyxpath_core::crypto::TunnelNonce::random();
        for record in records.iter().rev() {
            let hop = crate::path::transit::TransitHop::from_record(record, set.env.local, now).unwrap();
            set.env.onion.apply_layer(&mut payload, hop.shared(), &nonce).unwrap();
            nonce ^= hop.nonce_xor();
        }
        let cell = RelayCell {
            path_id: set.status_of(&tx, now).unwrap().rx_id,
            nonce,
            payload: bytes::Bytes::from(payload),
        };

        // Would deadlock if the DHT ran with the arena locked
        assert!(set.handle_downstream(tx, &cell, now).is_accepted());
        assert_eq!(dht.seen.load(Ordering::SeqCst), 1);

        // Should send the reply back up the same circuit
        let (to, frame) = link.frames.lock().pop().unwrap();
        assert_eq!(to, RouterId::from_array([1; 32]));
        assert!(matches!(
            LinkMessage::from_bytes(frame).unwrap(),
            LinkMessage::RelayUpstream(up) if up.path_id == tx
        ));
    }

    #[test]
    fn test_missing_path_errors() {
        let (set, _, _, _) = setup(1);
        let missing = PathId::generate();
        assert!(matches!(
            set.send_routing_message(missing, RoutingBody::HiddenService(vec![1])),
            Err(RouterError::PathNotFound(_))
        ));
        assert!(matches!(set.close_exit(missing), Err(RouterError::PathNotFound(_))));

        let cell = RelayCell {
            path_id: missing,
            nonce: nyxpath_core::crypto::TunnelNonce::random(),
            payload: bytes::Bytes::from_static(b"x"),
        };
        assert_eq!(
            set.handle_downstream(missing, &cell, Instant::now()),
            HandleOutcome::Dropped(DropReason::NoSuchPath)
        );
    }

    #[test]
    fn test_xor_distance_prefers_closer() {
        let target = RouterId::from_array([0x10; 32]);
        let near = RouterId::from_array([0x11; 32]);
        let far = RouterId::from_array([0x90; 32]);
        assert!(xor_distance(&near, &target) < xor_distance(&far, &target));
    }
}
