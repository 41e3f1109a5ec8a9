// ============================================
// File: crates/nyxpath-router/src/router.rs
// ============================================
//! # Router Orchestrator
//!
//! ## Creation Reason
//! Wires the path core to a link transport and drives it: one task reads
//! frames and dispatches them, one drains the outbound queue, one ticks
//! circuits and one sweeps expired state.
//!
//! ## Main Functionality
//! - `Router`: component wiring and lifecycle
//! - `Router::spawn`: start the tasks on any `LinkTransport`
//! - `Router::run`: bind UDP, spawn, wait for Ctrl+C, stop
//! - client API: build paths, send routing messages, exit traffic
//!
//! ## Task Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Router                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ recv       │  │ writer     │  │ tick       │  │ sweep      │  │
//! │  │            │  │            │  │            │  │            │  │
//! │  │ transport  │  │ outbound   │  │ circuits   │  │ registry   │  │
//! │  │ → dispatch │  │ queue →    │  │ maintain   │  │ exit       │  │
//! │  │            │  │ transport  │  │ exit flush │  │ persist    │  │
//! │  └─────┬──────┘  └─────▲──────┘  └────────────┘  └────────────┘  │
//! │        ▼               │                                         │
//! │  ┌─────────────────────┴─────────────────────────────────────┐   │
//! │  │ LinkDispatcher ─► PathRegistry ─► PathSet / relay / endpoint │ │
//! │  └───────────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `spawn` may be called once; the outbound writer is consumed
//! - Path handlers never await; everything they send goes through the
//!   bounded outbound queue
//!
//! ## Last Modified
//! v0.1.0 - Initial router orchestrator

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::{IdentityKeyPair, XChaCha20Onion};
use nyxpath_core::protocol::RoutingBody;
use nyxpath_transport::{
    LinkTransport, OutboundQueue, OutboundStatsSnapshot, OutboundWriter,
    TransportError, UdpLink,
};

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::handlers::{EndpointEvent, EndpointHandler, LinkDispatcher};
use crate::path::{CircuitStatus, LoggingHooks, PathEnv, PathRoles, PathSet, PathSetHooks};
use crate::registry::{PathRegistry, RegistryStats};
use crate::services::{
    DhtHandler, ExitContext, HopKeySource, NullDht, RandomHopKeys, RouterProfiling,
};

/// How long `stop` waits for each task.
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================
// Router
// ============================================

/// A path router.
///
/// # Lifecycle
/// 1. Create with `Router::new(config, identity)`
/// 2. `run().await` for UDP, or `spawn(transport)` for any other link
/// 3. `stop().await`, or Ctrl+C under `run`
pub struct Router {
    config: RouterConfig,
    identity: Arc<IdentityKeyPair>,
    env: PathEnv,
    registry: Arc<PathRegistry>,
    queue: Arc<OutboundQueue>,
    writer: Mutex<Option<OutboundWriter>>,
    dispatcher: Arc<LinkDispatcher>,
    endpoint: Arc<EndpointHandler>,
    exit: Arc<ExitContext>,
    profiler: Arc<RouterProfiling>,
    paths: Arc<PathSet>,
    transport: Mutex<Option<Arc<dyn LinkTransport>>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    shutdown: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Router {
    /// Creates a router with random hop keys, no DHT and logging hooks.
    #[must_use]
    pub fn new(config: RouterConfig, identity: IdentityKeyPair) -> Self {
        Self::with_services(
            config,
            identity,
            Arc::new(RandomHopKeys),
            Arc::new(NullDht),
            Arc::new(LoggingHooks),
        )
    }

    /// Creates a router with the given collaborators.
    #[must_use]
    pub fn with_services(
        config: RouterConfig,
        identity: IdentityKeyPair,
        keys: Arc<dyn HopKeySource>,
        dht: Arc<dyn DhtHandler>,
        hooks: Arc<dyn PathSetHooks>,
    ) -> Self {
        let identity = Arc::new(identity);
        let local = identity.router_id();
        let (queue, writer) = OutboundQueue::new(config.transit.outbound_queue);
        let profiler = Arc::new(RouterProfiling::new());

        let env = PathEnv {
            local,
            link: queue.clone(),
            onion: Arc::new(XChaCha20Onion::new()),
            profiler: profiler.clone(),
            dht,
        };
        let registry = Arc::new(PathRegistry::new(local, config.transit.max_transit_hops));
        let exit = Arc::new(ExitContext::new(config.exit.policy()));
        let endpoint = Arc::new(EndpointHandler::new(
            env.clone(),
            registry.clone(),
            exit.clone(),
            identity.clone(),
        ));
        let dispatcher = Arc::new(LinkDispatcher::new(
            env.clone(),
            registry.clone(),
            endpoint.clone(),
        ));
        let paths = Arc::new(PathSet::new(
            format!("router-{}", local.short()),
            config.paths.path_set_config(),
            env.clone(),
            keys,
            identity.clone(),
            hooks,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            identity,
            env,
            registry,
            queue,
            writer: Mutex::new(Some(writer)),
            dispatcher,
            endpoint,
            exit,
            profiler,
            paths,
            transport: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    #[must_use]
    pub fn router_id(&self) -> RouterId {
        self.env.local
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PathRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn exit(&self) -> &Arc<ExitContext> {
        &self.exit
    }

    /// The router's own path set.
    #[must_use]
    pub fn path_set(&self) -> &Arc<PathSet> {
        &self.paths
    }

    /// Messages handled here as terminal hop.
    #[must_use]
    pub fn subscribe_endpoint_events(&self) -> broadcast::Receiver<EndpointEvent> {
        self.endpoint.subscribe()
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Binds UDP, starts the tasks and runs until Ctrl+C.
    ///
    /// # Errors
    /// Returns error if the link cannot be bound.
    pub async fn run(&self) -> Result<()> {
        info!(
            router = %self.router_id().short(),
            "Starting nyxpath router v{}",
            env!("CARGO_PKG_VERSION")
        );

        let udp = UdpLink::bind_addr(self.config.router.listen_addr, self.router_id())
            .await
            .map_err(|e| RouterError::startup_failed(format!("UDP bind failed: {e}")))?;
        for peer in &self.config.peers {
            udp.add_peer(peer.router_id, peer.addr);
        }
        info!(
            listen = %self.config.router.listen_addr,
            peers = self.config.peers.len(),
            "UDP link ready"
        );

        self.spawn(Arc::new(udp))?;
        self.wait_for_shutdown().await;
        self.stop().await;
        Ok(())
    }

    /// Starts the router's tasks on `transport`.
    ///
    /// # Errors
    /// `StartupFailed` if the router was already started.
    pub fn spawn(&self, transport: Arc<dyn LinkTransport>) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| RouterError::startup_failed("router already started"))?;

        let mut tasks = self.tasks.lock();
        tasks.push(("recv", self.spawn_recv_task(transport.clone())));
        tasks.push((
            "writer",
            tokio::spawn(writer.run(transport.clone(), self.shutdown_tx.subscribe())),
        ));
        tasks.push(("tick", self.spawn_tick_task()));
        tasks.push(("sweep", self.spawn_sweep_task()));
        *self.transport.lock() = Some(transport);

        info!(router = %self.router_id().short(), "Router started");
        Ok(())
    }

    /// Signals every task to stop, waits for them and closes the link.
    pub async fn stop(&self) {
        info!(router = %self.router_id().short(), "Shutting down router");
        self.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for (name, task) in tasks {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' failed: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.shutdown().await {
                warn!("Link shutdown error: {}", e);
            }
        }
        info!("Router shutdown complete");
    }

    /// Triggers shutdown without waiting.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received shutdown signal");
            }
            _ = shutdown_rx.recv() => {}
        }
    }

    // ========================================
    // Tasks
    // ========================================

    fn spawn_recv_task(&self, transport: Arc<dyn LinkTransport>) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Receive task received shutdown signal");
                        break;
                    }
                    result = transport.recv() => {
                        match result {
                            Ok(frame) => {
                                if shutdown.load(Ordering::SeqCst) {
                                    break;
                                }
                                dispatcher.handle_frame(frame, Instant::now());
                            }
                            Err(TransportError::ShuttingDown) => break,
                            Err(e) => {
                                if !shutdown.load(Ordering::SeqCst) {
                                    error!("Link receive error: {}", e);
                                }
                            }
                        }
                    }
                }
            }
            debug!("Receive task exiting");
        })
    }

    fn spawn_tick_task(&self) -> JoinHandle<()> {
        let paths = self.paths.clone();
        let registry = self.registry.clone();
        let endpoint = self.endpoint.clone();
        let peers = self.config.peer_ids();
        let maintain = self.config.paths.paths > 0;
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.paths.tick_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Tick task received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        let now = Instant::now();
                        paths.tick(now);
                        if maintain && !peers.is_empty() {
                            paths.maintain(now, &peers, &registry);
                        }
                        endpoint.flush_exit_outbound();
                    }
                }
            }
            debug!("Tick task exiting");
        })
    }

    fn spawn_sweep_task(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let exit = self.exit.clone();
        let queue = self.queue.clone();
        let profiler = self.profiler.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.transit.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Sweep task received shutdown signal");
                        break;
                    }
                    _ = interval.tick() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        let now = Instant::now();
                        let paths = registry.sweep_expired(now);
                        let exits = exit.expire(now);
                        let hints = queue.prune_persist(now);
                        profiler.decay_if_due(now);

                        let stats = registry.stats();
                        debug!(
                            paths_removed = paths,
                            exits_removed = exits,
                            persist_pruned = hints,
                            transit_hops = stats.transit_hops,
                            own_entries = stats.own_entries,
                            "Sweep cycle complete"
                        );
                    }
                }
            }
            debug!("Sweep task exiting");
        })
    }

    // ========================================
    // Client API
    // ========================================

    /// Builds a circuit over `routers`.
    ///
    /// # Errors
    /// See [`PathSet::build`].
    pub fn build_path(&self, routers: &[RouterId], roles: PathRoles) -> Result<PathId> {
        self.paths.build(routers, roles, Instant::now(), &self.registry)
    }

    /// Sends a routing message up circuit `path`.
    ///
    /// # Errors
    /// `PathNotFound`, or send errors.
    pub fn send_routing_message(&self, path: PathId, body: RoutingBody) -> Result<()> {
        self.paths.send_routing_message(path, body)
    }

    /// Sends counter-prefixed exit traffic on `path`.
    ///
    /// # Errors
    /// `NoExit` if the circuit holds no exit session.
    pub fn send_exit_traffic(&self, path: PathId, packets: Vec<Vec<u8>>) -> Result<()> {
        self.paths.send_exit_traffic(path, packets)
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            router: self.router_id(),
            registry: self.registry.stats(),
            outbound: self.queue.stats().into(),
            exit_endpoints: self.exit.len(),
            paths: self.paths.snapshot(Instant::now()),
        }
    }

    /// Identity key pair; its public half is the router id.
    #[must_use]
    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    /// Configured listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.config.router.listen_addr
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("router", &self.router_id())
            .field("listen_addr", &self.config.router.listen_addr)
            .field("paths", &self.paths.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// RouterStats
// ============================================

/// Serialisable router snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub router: RouterId,
    pub registry: RegistryStats,
    pub outbound: OutboundCounters,
    pub exit_endpoints: usize,
    pub paths: Vec<CircuitStatus>,
}

/// Outbound queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboundCounters {
    pub queued: u64,
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
}

impl From<OutboundStatsSnapshot> for OutboundCounters {
    fn from(s: OutboundStatsSnapshot) -> Self {
        Self {
            queued: s.queued,
            dropped: s.dropped,
            sent: s.sent,
            failed: s.failed,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use nyxpath_transport::MemoryNetwork;

    #[tokio::test]
    async fn test_spawn_once_and_stop() {
        let router = Router::new(RouterConfig::default(), IdentityKeyPair::generate());
        let network = MemoryNetwork::new();
        let link = network.attach(router.router_id());

        router.spawn(link.clone()).unwrap();
        // Should refuse a second start
        assert!(router.spawn(link.clone()).is_err());

        router.stop().await;
        assert!(!link.is_active());
        assert!(router.tasks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stats_serialise() {
        let router = Router::new(RouterConfig::default(), IdentityKeyPair::generate());
        let stats = router.stats();
        assert_eq!(stats.registry, RegistryStats::default());
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["exit_endpoints"], 0);
        assert!(json["paths"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_build_without_transport_queues_commit() {
        let router = Router::new(RouterConfig::default(), IdentityKeyPair::generate());
        let hops = [RouterId::from_array([1; 32]), RouterId::from_array([2; 32])];
        let path = router.build_path(&hops, PathRoles::CLIENT).unwrap();

        assert!(router.path_set().contains(&path));
        assert_eq!(router.stats().outbound.queued, 1);
        assert_eq!(router.registry().stats().own_entries, 2);
    }
}
