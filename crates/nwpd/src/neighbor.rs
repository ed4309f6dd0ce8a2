//! Neighbor table and per-neighbor liveness state
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Table of hosts reachable on the link
//! - SI-4: System Monitoring - Liveness state per neighbor
//!
//! Lock order is always the table lock before an entry lock. Code holding an
//! entry lock never takes the table lock.

use crate::timer::{TimerHandle, TimerId};
use crate::types::{HwAddr, Xid};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Liveness state of one neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Liveness {
    /// No probe outstanding
    #[default]
    Idle,
    /// Direct ping sent, waiting for an ack
    AwaitingAck,
    /// Direct ping timed out, third parties are probing on our behalf
    AwaitingInvestigativeAck,
}

/// Mutable state of a neighbor, guarded by the entry lock
///
/// A timer is held exactly when the neighbor is not idle.
#[derive(Debug)]
pub struct NeighborState {
    identity: Xid,
    clock: i32,
    liveness: Liveness,
    timer: Option<TimerHandle>,
}

impl NeighborState {
    fn new(identity: Xid) -> Self {
        Self {
            identity,
            clock: 0,
            liveness: Liveness::Idle,
            timer: None,
        }
    }

    /// The neighbor's `ether` XID
    pub fn identity(&self) -> Xid {
        self.identity
    }

    /// Last clock value the neighbor sent us
    pub fn clock(&self) -> i32 {
        self.clock
    }

    pub fn set_clock(&mut self, clock: i32) {
        self.clock = clock;
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn is_idle(&self) -> bool {
        self.liveness == Liveness::Idle
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Enter an awaiting state bounded by `timer`, replacing any earlier timer
    pub fn arm(&mut self, liveness: Liveness, timer: TimerHandle) {
        debug_assert_ne!(liveness, Liveness::Idle);
        if let Some(old) = self.timer.replace(timer) {
            old.cancel();
        }
        self.liveness = liveness;
    }

    /// Return to idle and cancel the outstanding timer; reports whether a
    /// probe was outstanding
    pub fn settle(&mut self) -> bool {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        let was_awaiting = self.liveness != Liveness::Idle;
        self.liveness = Liveness::Idle;
        was_awaiting
    }

    /// Whether `id` is the timer currently bounding this neighbor's state
    pub fn owns_timer(&self, id: TimerId) -> bool {
        self.timer.as_ref().is_some_and(|t| t.id() == id)
    }

    /// Clear the timer slot without cancelling; used from inside the
    /// expiring timer itself
    fn release_timer(&mut self) {
        self.timer = None;
        self.liveness = Liveness::Idle;
    }
}

/// One neighbor on the link
#[derive(Debug)]
pub struct Neighbor {
    hwaddr: HwAddr,
    state: Mutex<NeighborState>,
}

impl Neighbor {
    pub fn hwaddr(&self) -> HwAddr {
        self.hwaddr
    }

    /// Take the entry lock
    pub fn lock(&self) -> MutexGuard<'_, NeighborState> {
        self.state.lock()
    }
}

/// Shared map from hardware address to neighbor
///
/// # NIST Controls
/// - CM-8: System Component Inventory - At most one entry per hardware address
#[derive(Debug, Default)]
pub struct NeighborTable {
    entries: RwLock<HashMap<HwAddr, Arc<Neighbor>>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find or insert the neighbor for `hwaddr`; the flag reports an insert
    pub fn get_or_create(&self, hwaddr: HwAddr, identity: Xid) -> (Arc<Neighbor>, bool) {
        if let Some(existing) = self.entries.read().get(&hwaddr) {
            return (existing.clone(), false);
        }

        let mut entries = self.entries.write();
        let mut created = false;
        let neighbor = entries
            .entry(hwaddr)
            .or_insert_with(|| {
                created = true;
                Arc::new(Neighbor {
                    hwaddr,
                    state: Mutex::new(NeighborState::new(identity)),
                })
            })
            .clone();
        if created {
            debug!(hwaddr = %hwaddr, identity = %identity, "Neighbor entry created");
        }
        (neighbor, created)
    }

    pub fn get(&self, hwaddr: &HwAddr) -> Option<Arc<Neighbor>> {
        self.entries.read().get(hwaddr).cloned()
    }

    /// Remove a neighbor and cancel its timer
    pub fn remove(&self, hwaddr: &HwAddr) -> Option<Arc<Neighbor>> {
        let mut entries = self.entries.write();
        let neighbor = entries.remove(hwaddr)?;
        neighbor.lock().settle();
        Some(neighbor)
    }

    /// Uniformly pick one idle neighbor
    pub fn pick_random_available<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<Neighbor>> {
        let idle = self.idle_neighbors(None);
        idle.choose(rng).cloned()
    }

    /// Pick up to `count` idle neighbors other than `exclude`
    pub fn pick_idle_except<R: Rng + ?Sized>(
        &self,
        exclude: &HwAddr,
        count: usize,
        rng: &mut R,
    ) -> Vec<Arc<Neighbor>> {
        let idle = self.idle_neighbors(Some(exclude));
        idle.choose_multiple(rng, count).cloned().collect()
    }

    fn idle_neighbors(&self, exclude: Option<&HwAddr>) -> Vec<Arc<Neighbor>> {
        let entries = self.entries.read();
        entries
            .values()
            .filter(|n| exclude != Some(&n.hwaddr))
            .filter(|n| n.lock().is_idle())
            .cloned()
            .collect()
    }

    /// Evict `neighbor` if it is still the table's entry for its address and
    /// `timer` is still the investigative timeout bounding it
    ///
    /// `withdraw` runs under both locks so no lookup observes the neighbor
    /// after its routes start disappearing. Returns whether the entry was
    /// evicted; a stale expiry returns false and changes nothing.
    pub fn evict<F>(&self, neighbor: &Arc<Neighbor>, timer: TimerId, withdraw: F) -> bool
    where
        F: FnOnce(&NeighborState),
    {
        let mut entries = self.entries.write();
        match entries.get(&neighbor.hwaddr) {
            Some(current) if Arc::ptr_eq(current, neighbor) => {}
            _ => {
                trace!(hwaddr = %neighbor.hwaddr, "Eviction target already replaced");
                return false;
            }
        }

        let mut state = neighbor.lock();
        if state.liveness != Liveness::AwaitingInvestigativeAck || !state.owns_timer(timer) {
            trace!(hwaddr = %neighbor.hwaddr, "Stale investigative timeout");
            return false;
        }

        entries.remove(&neighbor.hwaddr);
        state.release_timer();
        withdraw(&state);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn hwaddrs(&self) -> Vec<HwAddr> {
        self.entries.read().keys().copied().collect()
    }
}
