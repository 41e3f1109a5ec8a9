// ============================================
// File: crates/nyxpath-router/src/registry.rs
// ============================================
//! # Path Registry
//!
//! ## Creation Reason
//! Every relay cell names a path id. The registry answers "which circuit or
//! transit hop is this, given who sent it", and is the only place transit
//! hops are created (from build commits) and destroyed (on expiry).
//!
//! ## Main Functionality
//! - Own-circuit index: id ─► `Weak<PathSet>` + circuit key
//! - Transit table: id ─► transit hops, each registered under tx and rx
//! - Sender-filtered resolution in both directions
//! - `forward_build_commit`: accept the first record, pass the rest on
//! - `sweep_expired`: drop lapsed hops and let every owner expire circuits
//!
//! ## Resolution Rules
//! ```text
//! ┌─────────────────────────┬───────────────────────────────────────────┐
//! │ Lookup                  │ Matches                                   │
//! ├─────────────────────────┼───────────────────────────────────────────┤
//! │ resolve_for_upstream    │ own circuit whose first hop is sender,    │
//! │  (cell came downstream) │ else transit hop with upstream == sender  │
//! │ resolve_for_downstream  │ transit hop with downstream == sender     │
//! │  (cell came upstream)   │                                           │
//! │ resolve_handler         │ own circuit, else terminal transit hop    │
//! └─────────────────────────┴───────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The sender filter is what stops a neighbour from injecting cells into
//!   a path it is not part of. Never resolve by id alone on the relay path.
//! - The two tables have independent locks and neither is held while a
//!   handler or an owner callback runs
//!
//! ## Last Modified
//! v0.1.0 - Initial registry

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace};

use nyxpath_common::{PathId, RouterId};
use nyxpath_core::error::CoreError;
use nyxpath_core::protocol::{BuildCommitRecord, LinkMessage};
use nyxpath_transport::LinkSender;

use crate::error::{Result, RouterError};
use crate::path::{PathSet, TransitHop, TransitHopInfo};

// ============================================
// Types
// ============================================

/// Index entry for a circuit this router originated.
#[derive(Debug, Clone)]
struct OwnRoute {
    owner: Weak<PathSet>,
    first_hop: RouterId,
    key: PathId,
}

#[derive(Default)]
struct TransitTable {
    by_id: HashMap<PathId, Vec<Arc<TransitHop>>>,
    hops: usize,
}

/// What a path id resolved to.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Our own circuit, reachable through its owner.
    Own {
        /// Owning set
        owner: Arc<PathSet>,
        /// Circuit key (txID) inside the owner
        key: PathId,
    },
    /// A hop we relay.
    Transit(Arc<TransitHop>),
}

/// Result of accepting a build-commit record.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The hop that was registered
    pub hop: Arc<TransitHop>,
    /// `true` if this router is the last hop
    pub terminal: bool,
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Own-circuit index entries (two per circuit)
    pub own_entries: usize,
    /// Distinct transit hops
    pub transit_hops: usize,
    /// Transit index entries
    pub transit_entries: usize,
    /// Live path set owners
    pub owners: usize,
}

// ============================================
// PathRegistry
// ============================================

/// Path id index for one router.
pub struct PathRegistry {
    local: RouterId,
    max_transit_hops: usize,
    own: RwLock<HashMap<PathId, OwnRoute>>,
    transit: RwLock<TransitTable>,
    owners: RwLock<Vec<Weak<PathSet>>>,
}

impl PathRegistry {
    #[must_use]
    pub fn new(local: RouterId, max_transit_hops: usize) -> Self {
        Self {
            local,
            max_transit_hops,
            own: RwLock::new(HashMap::new()),
            transit: RwLock::new(TransitTable::default()),
            owners: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub const fn local(&self) -> RouterId {
        self.local
    }

    // ========================================
    // Own circuits
    // ========================================

    /// Indexes an originated circuit under both `tx` and `rx`.
    ///
    /// # Errors
    /// `PathExists` if either id is already taken by another own circuit.
    pub fn register_own(
        &self,
        owner: &Arc<PathSet>,
        tx: PathId,
        rx: PathId,
        first_hop: RouterId,
    ) -> Result<()> {
        {
            let mut own = self.own.write();
            for id in [tx, rx] {
                if own.contains_key(&id) {
                    return Err(RouterError::PathExists(id));
                }
            }
            let route = OwnRoute {
                owner: Arc::downgrade(owner),
                first_hop,
                key: tx,
            };
            own.insert(tx, route.clone());
            own.insert(rx, route);
        }

        let mut owners = self.owners.write();
        if !owners.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(owner))) {
            owners.push(Arc::downgrade(owner));
        }
        Ok(())
    }

    /// Drops the index entries of an originated circuit.
    pub fn unregister_own(&self, tx: &PathId, rx: &PathId) {
        let mut own = self.own.write();
        own.remove(tx);
        own.remove(rx);
    }

    // ========================================
    // Transit hops
    // ========================================

    /// Indexes a transit hop under both its tx and rx ids.
    ///
    /// An id may be shared only by hops with different neighbours.
    ///
    /// # Errors
    /// - `TransitLimitReached` at `max_transit_hops`
    /// - `PathExists` if a hop with the same id and a common neighbour exists
    pub fn register_transit(&self, hop: Arc<TransitHop>) -> Result<()> {
        let mut table = self.transit.write();
        if table.hops >= self.max_transit_hops {
            return Err(RouterError::TransitLimitReached {
                limit: self.max_transit_hops,
            });
        }

        let info = hop.info;
        for id in ids_of(&info) {
            let clash = table.by_id.get(&id).is_some_and(|hops| {
                hops.iter().any(|h| {
                    h.info.upstream == info.upstream || h.info.downstream == info.downstream
                })
            });
            if clash {
                return Err(RouterError::PathExists(id));
            }
        }

        for id in ids_of(&info) {
            table.by_id.entry(id).or_default().push(hop.clone());
        }
        table.hops += 1;
        trace!(hop = %info, "Transit hop registered");
        Ok(())
    }

    /// Removes one transit hop from both of its index entries.
    pub fn unregister_transit(&self, hop: &Arc<TransitHop>) {
        let mut table = self.transit.write();
        let mut found = false;
        for id in ids_of(&hop.info) {
            if let Some(hops) = table.by_id.get_mut(&id) {
                let before = hops.len();
                hops.retain(|h| !Arc::ptr_eq(h, hop));
                found |= hops.len() != before;
                if hops.is_empty() {
                    table.by_id.remove(&id);
                }
            }
        }
        if found {
            table.hops -= 1;
        }
    }

    /// Accepts the first record of a build commit from `sender` and
    /// forwards the remaining records to the next hop.
    ///
    /// # Errors
    /// - malformed commits: no records, records past the terminal hop, or
    ///   a non-terminal hop with nothing left to forward
    /// - registration errors
    /// - the link refusing the forwarded commit; the hop is removed again
    pub fn forward_build_commit(
        &self,
        sender: RouterId,
        mut records: Vec<BuildCommitRecord>,
        link: &dyn LinkSender,
        now: Instant,
    ) -> Result<CommitOutcome> {
        if records.is_empty() {
            return Err(CoreError::malformed("empty build commit").into());
        }
        let rest = records.split_off(1);
        let hop = Arc::new(TransitHop::from_record(&records[0], sender, now)?);
        let terminal = hop.is_terminal(&self.local);

        if terminal && !rest.is_empty() {
            return Err(CoreError::malformed("records past the terminal hop").into());
        }
        if !terminal && rest.is_empty() {
            return Err(CoreError::malformed("no records left for the next hop").into());
        }

        self.register_transit(hop.clone())?;

        if !terminal {
            let frame = LinkMessage::BuildCommit(rest).to_bytes();
            if let Err(e) = link.send_to(&hop.info.upstream, frame) {
                self.unregister_transit(&hop);
                return Err(e.into());
            }
        }

        debug!(hop = %hop.info, terminal, "Build commit accepted");
        Ok(CommitOutcome { hop, terminal })
    }

    // ========================================
    // Resolution
    // ========================================

    /// Resolves a cell that `sender`, our upstream neighbour, sent down.
    #[must_use]
    pub fn resolve_for_upstream(&self, sender: &RouterId, id: &PathId) -> Option<Resolved> {
        let own = self.own.read().get(id).cloned();
        if let Some(route) = own {
            if route.first_hop == *sender {
                if let Some(owner) = route.owner.upgrade() {
                    return Some(Resolved::Own {
                        owner,
                        key: route.key,
                    });
                }
            }
        }
        self.find_transit(id, |info| info.upstream == *sender)
    }

    /// Resolves a cell that `sender`, our downstream neighbour, sent up.
    ///
    /// Own circuits have no downstream neighbour and never match.
    #[must_use]
    pub fn resolve_for_downstream(&self, sender: &RouterId, id: &PathId) -> Option<Resolved> {
        self.find_transit(id, |info| info.downstream == *sender)
    }

    /// Own circuit for `id`, else the transit hop ending at this router.
    #[must_use]
    pub fn resolve_handler(&self, id: &PathId) -> Option<Resolved> {
        let own = self.own.read().get(id).cloned();
        if let Some(route) = own {
            if let Some(owner) = route.owner.upgrade() {
                return Some(Resolved::Own {
                    owner,
                    key: route.key,
                });
            }
        }
        let local = self.local;
        self.find_transit(id, |info| info.upstream == local)
    }

    fn find_transit(
        &self,
        id: &PathId,
        matches: impl Fn(&TransitHopInfo) -> bool,
    ) -> Option<Resolved> {
        self.transit
            .read()
            .by_id
            .get(id)?
            .iter()
            .find(|h| matches(&h.info))
            .map(|h| Resolved::Transit(h.clone()))
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Removes expired transit hops and expired circuits of every owner.
    ///
    /// Returns the number of hops and circuits removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let transit_removed = {
            let mut table = self.transit.write();
            let mut removed = 0;
            table.by_id.retain(|id, hops| {
                hops.retain(|h| {
                    let expired = h.is_expired(now);
                    if expired && h.info.tx_id == *id {
                        removed += 1;
                    }
                    !expired
                });
                !hops.is_empty()
            });
            table.hops -= removed;
            removed
        };

        let owners: Vec<Arc<PathSet>> = {
            let mut owners = self.owners.write();
            owners.retain(|w| w.strong_count() > 0);
            owners.iter().filter_map(Weak::upgrade).collect()
        };

        let mut circuits_removed = 0;
        for owner in owners {
            for (tx, rx) in owner.expire_paths(now) {
                self.unregister_own(&tx, &rx);
                circuits_removed += 1;
            }
        }

        let total = transit_removed + circuits_removed;
        if total > 0 {
            info!(
                transit = transit_removed,
                circuits = circuits_removed,
                "Swept expired paths"
            );
        }
        total
    }

    /// Info of every transit hop.
    #[must_use]
    pub fn transit_hops(&self) -> Vec<TransitHopInfo> {
        self.transit
            .read()
            .by_id
            .iter()
            .flat_map(|(id, hops)| hops.iter().filter(move |h| h.info.tx_id == *id))
            .map(|h| h.info)
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let (transit_hops, transit_entries) = {
            let table = self.transit.read();
            (table.hops, table.by_id.values().map(Vec::len).sum())
        };
        RegistryStats {
            own_entries: self.own.read().len(),
            transit_hops,
            transit_entries,
            owners: self.owners.read().iter().filter(|w| w.strong_count() > 0).count(),
        }
    }
}

impl std::fmt::Debug for PathRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRegistry")
            .field("local", &self.local)
            .field("stats", &self.stats())
            .finish()
    }
}

/// The ids a transit hop is indexed under; one id when tx and rx coincide.
fn ids_of(info: &TransitHopInfo) -> Vec<PathId> {
    if info.tx_id == info.rx_id {
        vec![info.tx_id]
    } else {
        vec![info.tx_id, info.rx_id]
    }
}

// ============================================
// Tests
// ============================================
