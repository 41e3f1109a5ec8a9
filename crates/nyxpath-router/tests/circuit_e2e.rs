// ============================================
// File: crates/nyxpath-router/tests/circuit_e2e.rs
// ============================================
//! End-to-end circuit tests: a client and three relays over the in-memory
//! link network.
//!
//! ```text
//! client ──► R0 ──► R1 ──► R2 (terminal)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::crypto::IdentityKeyPair;
use nyxpath_core::protocol::{RoutingBody, Value};
use nyxpath_router::config::RouterConfig;
use nyxpath_router::path::TransitHopInfo;
use nyxpath_router::registry::Resolved;
use nyxpath_router::services::{DhtHandler, NullDht, RandomHopKeys};
use nyxpath_router::{PathRoles, PathSetHooks, Router};
use nyxpath_transport::MemoryNetwork;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingHooks {
    ready: Mutex<Vec<PathId>>,
    drops: Mutex<Vec<PathId>>,
    granted: Mutex<Vec<u64>>,
    updated: Mutex<Vec<PathId>>,
    closed: Mutex<Vec<PathId>>,
}

impl PathSetHooks for RecordingHooks {
    fn on_build_success(&self, path: PathId) {
        self.ready.lock().push(path);
    }

    fn on_data_drop(&self, _path: PathId, target: PathId) {
        self.drops.lock().push(target);
    }

    fn on_exit_granted(&self, _path: PathId, tx: u64) {
        self.granted.lock().push(tx);
    }

    fn on_exit_updated(&self, path: PathId, _tx: u64) {
        self.updated.lock().push(path);
    }

    fn on_exit_closed(&self, path: PathId) {
        self.closed.lock().push(path);
    }
}

/// DHT that records what reaches it and optionally answers.
#[derive(Default)]
struct RecordingDht {
    answer: Option<Value>,
    seen: Mutex<Vec<(PathId, Value)>>,
}

impl DhtHandler for RecordingDht {
    fn handle(&self, path: PathId, msg: &Value) -> Option<Value> {
        self.seen.lock().push((path, msg.clone()));
        self.answer.clone()
    }
}

struct Testbed {
    client: Router,
    hooks: Arc<RecordingHooks>,
    relays: Vec<Router>,
    _network: Arc<MemoryNetwork>,
}

impl Testbed {
    fn start(allow_exit: bool) -> Self {
        let mut config = RouterConfig::default();
        config.exit.allow_exit = allow_exit;
        Self::start_with(config, Arc::new(NullDht), Arc::new(NullDht))
    }

    /// Client and relays share `config`; `terminal_dht` serves R2 only.
    fn start_with(
        mut config: RouterConfig,
        client_dht: Arc<dyn DhtHandler>,
        terminal_dht: Arc<dyn DhtHandler>,
    ) -> Self {
        let network = MemoryNetwork::new();
        config.paths.paths = 0;
        config.paths.tick_interval_ms = 60_000;

        let hooks = Arc::new(RecordingHooks::default());
        let client = Router::with_services(
            config.clone(),
            IdentityKeyPair::generate(),
            Arc::new(RandomHopKeys),
            client_dht,
            hooks.clone(),
        );
        client.spawn(network.attach(client.router_id())).unwrap();

        let relays: Vec<Router> = (0..3)
            .map(|i| {
                let dht: Arc<dyn DhtHandler> = if i == 2 { terminal_dht.clone() } else { Arc::new(NullDht) };
                let relay = Router::with_services(
                    config.clone(),
                    IdentityKeyPair::generate(),
                    Arc::new(RandomHopKeys),
                    dht,
                    Arc::new(nyxpath_router::path::LoggingHooks),
                );
                relay.spawn(network.attach(relay.router_id())).unwrap();
                relay
            })
            .collect();

        Self {
            client,
            hooks,
            relays,
            _network: network,
        }
    }

    fn relay_ids(&self) -> Vec<RouterId> {
        self.relays.iter().map(Router::router_id).collect()
    }

    /// Builds a circuit over all relays and waits until it is ready.
    async fn ready_path(&self) -> PathId {
        let path = self
            .client
            .build_path(&self.relay_ids(), PathRoles::CLIENT)
            .unwrap();
        wait_until(|| self.hooks.ready.lock().contains(&path)).await;
        path
    }

    fn only_hop(&self, relay: usize) -> TransitHopInfo {
        let hops = self.relays[relay].registry().transit_hops();
        assert_eq!(hops.len(), 1, "relay {relay} should relay exactly one hop");
        hops[0]
    }

    /// R2's hop for client circuit `path`.
    fn terminal_hop(&self, path: PathId) -> TransitHopInfo {
        let status = self.client.path_set().status_of(&path, Instant::now()).unwrap();
        self.relays[2]
            .registry()
            .transit_hops()
            .into_iter()
            .find(|h| h.tx_id == status.intro_path)
            .unwrap()
    }

    async fn stop(self) {
        self.client.stop().await;
        for relay in self.relays {
            relay.stop().await;
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in {WAIT:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn is_transit(resolved: Option<Resolved>) -> bool {
    matches!(resolved, Some(Resolved::Transit(_)))
}

#[tokio::test]
async fn test_three_hop_circuit_carries_discards_in_order() {
    let bed = Testbed::start(false);
    let path = bed.ready_path().await;

    let status = bed.client.path_set().status_of(&path, Instant::now()).unwrap();
    assert!(status.ready);
    assert_eq!(status.hops, bed.relay_ids());
    assert_eq!(status.terminal, bed.relays[2].router_id());

    // Hop chain as seen by the relays
    let (h0, h1, h2) = (bed.only_hop(0), bed.only_hop(1), bed.only_hop(2));
    assert_eq!(h0.tx_id, status.tx_id);
    assert_eq!(h0.rx_id, status.rx_id);
    assert_eq!(h1.rx_id, h0.tx_id);
    assert_eq!(h2.rx_id, h1.tx_id);
    assert_eq!(h2.tx_id, status.intro_path);
    assert_eq!(h2.upstream, bed.relays[2].router_id());

    // R0 and R1 resolve their hop by both ids, only from the right neighbour
    let client_id = bed.client.router_id();
    let ids = bed.relay_ids();
    for (relay, info, downstream, upstream) in [(0, h0, client_id, ids[1]), (1, h1, ids[0], ids[2])] {
        let registry = bed.relays[relay].registry();
        for id in [info.tx_id, info.rx_id] {
            assert!(is_transit(registry.resolve_for_downstream(&downstream, &id)));
            assert!(is_transit(registry.resolve_for_upstream(&upstream, &id)));
            assert!(registry.resolve_for_downstream(&upstream, &id).is_none());
            assert!(registry.resolve_for_upstream(&downstream, &id).is_none());
        }
    }

    // Ten discards through the circuit
    let mut events = bed.relays[2].subscribe_endpoint_events();
    let targets: Vec<PathId> = (0..10).map(|_| PathId::generate()).collect();
    for target in &targets {
        bed.client
            .send_routing_message(path, RoutingBody::DataDiscard { path_id: *target })
            .unwrap();
    }

    let mut sequences = Vec::new();
    tokio::time::timeout(WAIT, async {
        while sequences.len() < targets.len() {
            let event = events.recv().await.unwrap();
            if event.kind == "data-discard" {
                assert!(event.outcome.is_accepted());
                assert_eq!(event.path_id, h2.rx_id);
                sequences.push(event.sequence);
            }
        }
    })
    .await
    .unwrap();

    // Should dispatch each message exactly once, in send order
    assert!(sequences.windows(2).all(|w| w[1] == w[0] + 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = events.try_recv() {
        assert_ne!(event.kind, "data-discard", "duplicate dispatch");
    }

    // The terminal echoes each discard; the client reports the drops
    wait_until(|| bed.hooks.drops.lock().len() == targets.len()).await;
    assert_eq!(*bed.hooks.drops.lock(), targets);

    bed.stop().await;
}

#[tokio::test]
async fn test_exit_session_over_circuit() {
    let bed = Testbed::start(true);
    let path = bed.ready_path().await;

    let tx = bed.client.path_set().obtain_exit(path, 0, 0).unwrap();
    wait_until(|| bed.hooks.granted.lock().contains(&tx)).await;

    let status = bed.client.path_set().status_of(&path, Instant::now()).unwrap();
    assert!(status.roles.contains(PathRoles::EXIT));

    // Exit endpoint is keyed by the terminal hop's rxID
    let terminal = bed.only_hop(2);
    let exit = bed.relays[2].exit();
    assert!(exit.has_endpoint(&terminal.rx_id));

    bed.client
        .send_exit_traffic(path, vec![b"one".to_vec(), b"two".to_vec()])
        .unwrap();
    wait_until(|| exit.status().iter().any(|s| s.inbound_queued == 2)).await;

    let packets: Vec<Vec<u8>> = exit
        .take_inbound(&terminal.rx_id)
        .into_iter()
        .map(|(_, packet)| packet)
        .collect();
    assert_eq!(packets, vec![b"one".to_vec(), b"two".to_vec()]);

    bed.stop().await;
}

#[tokio::test]
async fn test_relay_teardown_sweeps_hops() {
    let bed = Testbed::start(false);
    let _path = bed.ready_path().await;
    assert_eq!(bed.relays[1].registry().stats().transit_hops, 1);

    // Hops expire with their lifetime
    let later = Instant::now() + Duration::from_secs(601);
    assert_eq!(bed.relays[1].registry().sweep_expired(later), 1);
    assert_eq!(bed.relays[1].registry().stats().transit_hops, 0);

    // The client sweep removes its expired circuit and index entries
    bed.client.registry().sweep_expired(later);
    assert!(bed.client.path_set().is_empty());
    assert_eq!(bed.client.registry().stats().own_entries, 0);

    bed.stop().await;
}

#[tokio::test]
async fn test_exit_session_moves_to_new_circuit() {
    let bed = Testbed::start(true);
    let first = bed.ready_path().await;
    let tx = bed.client.path_set().obtain_exit(first, 0, 0).unwrap();
    wait_until(|| bed.hooks.granted.lock().contains(&tx)).await;

    let exit = bed.relays[2].exit();
    let old_hop = bed.terminal_hop(first);
    bed.client
        .send_exit_traffic(first, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()])
        .unwrap();
    wait_until(|| exit.status().iter().any(|s| s.inbound_queued == 3)).await;
    assert_eq!(exit.take_inbound(&old_hop.rx_id).len(), 3);

    // Move the session onto a second circuit through the same terminal
    let second = bed.ready_path().await;
    let new_hop = bed.terminal_hop(second);
    bed.client.path_set().update_exit(first, second).unwrap();
    wait_until(|| bed.hooks.updated.lock().contains(&second)).await;
    assert!(exit.has_endpoint(&new_hop.rx_id));
    assert!(!exit.has_endpoint(&old_hop.rx_id));
    let status = bed.client.path_set().status_of(&second, Instant::now()).unwrap();
    assert!(status.roles.contains(PathRoles::EXIT));

    // Should accept the new circuit's counters even though they restart
    bed.client
        .send_exit_traffic(second, vec![b"d".to_vec(), b"e".to_vec()])
        .unwrap();
    wait_until(|| exit.status().iter().any(|s| s.inbound_queued == 2)).await;
    let packets: Vec<Vec<u8>> = exit
        .take_inbound(&new_hop.rx_id)
        .into_iter()
        .map(|(_, packet)| packet)
        .collect();
    assert_eq!(packets, vec![b"d".to_vec(), b"e".to_vec()]);

    bed.client.path_set().close_exit(second).unwrap();
    wait_until(|| bed.hooks.closed.lock().contains(&second)).await;
    assert!(exit.is_empty());
    let status = bed.client.path_set().status_of(&second, Instant::now()).unwrap();
    assert!(!status.roles.contains(PathRoles::EXIT));

    bed.stop().await;
}

#[tokio::test]
async fn test_dht_lookup_through_circuit() {
    let answer = Value::dict().with_bytes("A", "S");
    let terminal_dht = Arc::new(RecordingDht {
        answer: Some(answer.clone()),
        ..RecordingDht::default()
    });
    let client_dht = Arc::new(RecordingDht::default());
    let bed = Testbed::start_with(RouterConfig::default(), client_dht.clone(), terminal_dht.clone());
    let path = bed.ready_path().await;

    let lookup = Value::dict().with_bytes("A", "F");
    bed.client
        .send_routing_message(path, RoutingBody::Dht(vec![lookup.clone()]))
        .unwrap();

    // The terminal DHT sees the lookup on its hop's rxID
    let terminal = bed.terminal_hop(path);
    wait_until(|| !terminal_dht.seen.lock().is_empty()).await;
    assert_eq!(*terminal_dht.seen.lock(), vec![(terminal.rx_id, lookup)]);

    // Its answer comes back down to the client's DHT
    let rx_id = bed.client.path_set().status_of(&path, Instant::now()).unwrap().rx_id;
    wait_until(|| !client_dht.seen.lock().is_empty()).await;
    assert_eq!(*client_dht.seen.lock(), vec![(rx_id, answer)]);

    bed.stop().await;
}

#[tokio::test]
async fn test_relays_cap_requested_lifetime() {
    let mut config = RouterConfig::default();
    // Ten years
    config.paths.lifetime_secs = 10 * 365 * 24 * 3600;
    let bed = Testbed::start_with(config, Arc::new(NullDht), Arc::new(NullDht));
    let _path = bed.ready_path().await;

    let later = Instant::now() + Duration::from_secs(601);
    for relay in &bed.relays {
        assert_eq!(relay.registry().stats().transit_hops, 1);
        assert_eq!(relay.registry().sweep_expired(later), 1);
        assert_eq!(relay.registry().stats().transit_hops, 0);
    }

    bed.stop().await;
}
