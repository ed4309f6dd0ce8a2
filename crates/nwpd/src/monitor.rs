//! Ping/ack liveness monitoring with investigative escalation
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Periodic liveness probes
//! - CM-8: System Component Inventory - Unresponsive neighbors are removed
//! - AU-12: Audit Record Generation - Escalations and evictions are logged
//!
//! One idle neighbor is pinged per period. A missed ack escalates to ping
//! requests sent through other idle neighbors; a missed investigative ack
//! evicts the neighbor and withdraws its routes. Eviction happens only from
//! the investigative timeout.

use crate::context::Context;
use crate::discovery::Discovery;
use crate::error::{NwpdError, Result};
use crate::neighbor::{Liveness, Neighbor};
use crate::routes::{RouteFilter, RouteTableId};
use crate::timer::TimerId;
use crate::types::{HwAddr, Xid};
use crate::wire::{InvestigateKind, Monitor, MonitorInvestigate, MonitorKind, Packet};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, trace, warn};

/// Liveness state machine driver
pub struct LivenessMonitor {
    ctx: Arc<Context>,
    discovery: Arc<Discovery>,
    rng: Mutex<StdRng>,
}

impl LivenessMonitor {
    pub fn new(ctx: Arc<Context>, discovery: Arc<Discovery>) -> Self {
        Self {
            ctx,
            discovery,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic neighbor picks for tests
    pub fn with_seed(ctx: Arc<Context>, discovery: Arc<Discovery>, seed: u64) -> Self {
        Self {
            ctx,
            discovery,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Ping one random idle neighbor and arm its ack timeout
    ///
    /// Returns the neighbor probed, if any.
    pub fn ping_tick(self: &Arc<Self>) -> Option<HwAddr> {
        let picked = {
            let mut rng = self.rng.lock();
            self.ctx.neighbors.pick_random_available(&mut *rng)
        };
        let Some(neighbor) = picked else {
            trace!("No idle neighbor to ping");
            return None;
        };
        let hwaddr = neighbor.hwaddr();

        let timer = {
            let mut state = neighbor.lock();
            if !state.is_idle() {
                trace!(hwaddr = %hwaddr, "Neighbor became busy before ping");
                return None;
            }
            let monitor = Arc::downgrade(self);
            let target = Arc::downgrade(&neighbor);
            let handle = self
                .ctx
                .timers
                .once(self.ctx.config.monitor_ack_timeout(), move |id| {
                    if let Some((monitor, neighbor)) = upgrade(&monitor, &target) {
                        monitor.on_ack_timeout(&neighbor, id);
                    }
                });
            let id = handle.id();
            state.arm(Liveness::AwaitingAck, handle);
            id
        };

        let ping = Packet::Monitor(Monitor {
            kind: MonitorKind::Ping,
            sender_clock: self.ctx.clock(),
            src: self.ctx.link.hwaddr,
            dest: hwaddr,
        });
        if !self.ctx.send(&hwaddr, &ping) {
            // Nothing left the host, so a timeout would blame the neighbor
            let mut state = neighbor.lock();
            if state.owns_timer(timer) {
                state.settle();
            }
            return None;
        }
        debug!(hwaddr = %hwaddr, "Pinged neighbor");
        Some(hwaddr)
    }

    /// Direct ack did not arrive in time: ask other neighbors to probe
    #[instrument(skip(self, neighbor), fields(hwaddr = %neighbor.hwaddr()))]
    pub fn on_ack_timeout(self: &Arc<Self>, neighbor: &Arc<Neighbor>, timer: TimerId) {
        let suspect = neighbor.hwaddr();
        {
            let mut state = neighbor.lock();
            if state.liveness() != Liveness::AwaitingAck || !state.owns_timer(timer) {
                trace!("Stale ack timeout");
                return;
            }
            let monitor = Arc::downgrade(self);
            let target = Arc::downgrade(neighbor);
            let handle = self.ctx.timers.once(
                self.ctx.config.monitor_investigative_ack_timeout(),
                move |id| {
                    if let Some((monitor, neighbor)) = upgrade(&monitor, &target) {
                        monitor.on_investigative_ack_timeout(&neighbor, id);
                    }
                },
            );
            state.arm(Liveness::AwaitingInvestigativeAck, handle);
        }
        self.ctx.metrics.record_investigation();

        // The suspect's entry lock is released; candidates are checked under
        // their own locks.
        let relays = {
            let mut rng = self.rng.lock();
            self.ctx.neighbors.pick_idle_except(
                &suspect,
                self.ctx.config.monitor_investigative_neigh_count,
                &mut *rng,
            )
        };
        warn!(relays = relays.len(), "No ack from neighbor, investigating");

        let clock = self.ctx.clock();
        for relay in relays {
            let request = Packet::Investigate(MonitorInvestigate {
                kind: InvestigateKind::PingRequest,
                sender_clock: clock,
                src: self.ctx.link.hwaddr,
                dest: relay.hwaddr(),
                investigate: suspect,
            });
            self.ctx.send(&relay.hwaddr(), &request);
        }
    }

    /// Investigative ack did not arrive in time: evict
    #[instrument(skip(self, neighbor), fields(hwaddr = %neighbor.hwaddr()))]
    pub fn on_investigative_ack_timeout(&self, neighbor: &Arc<Neighbor>, timer: TimerId) {
        let evicted = self.ctx.neighbors.evict(neighbor, timer, |state| {
            self.withdraw_routes(&state.identity());
        });
        if evicted {
            info!("Neighbor unresponsive, evicted");
            self.ctx.metrics.record_eviction();
            self.ctx.update_neighbor_gauge();
        }
    }

    /// Withdraw the prefixes routed through `identity`, then its own route
    fn withdraw_routes(&self, identity: &Xid) {
        let types = self.ctx.types;
        let filter = RouteFilter::destinations(types.ad)
            .gateway_type(types.ether)
            .via(*identity);
        if let Some(prefixes) = self.ctx.dump_routes(RouteTableId::Main, &filter) {
            for route in prefixes {
                self.ctx.withdraw_route(&route.dst);
            }
        }
        self.ctx.withdraw_route(identity);
    }

    /// Handle a ping or ack from `sender`
    #[instrument(skip(self, packet), fields(sender = %sender, kind = ?packet.kind))]
    pub fn process_monitor(&self, sender: &HwAddr, packet: &Monitor) -> Result<()> {
        if packet.src.len() != sender.len() {
            return Err(NwpdError::Rejected("monitor hardware address length mismatch"));
        }
        if !self.ctx.link.accepts(&packet.dest) {
            trace!(dest = %packet.dest, "Monitor packet for another host");
            return Ok(());
        }

        match packet.kind {
            MonitorKind::Ping => {
                match self.ctx.neighbors.get(sender) {
                    Some(neighbor) => {
                        let mut state = neighbor.lock();
                        state.set_clock(packet.sender_clock);
                        if state.liveness() == Liveness::AwaitingInvestigativeAck {
                            state.settle();
                            info!("Neighbor under investigation is alive");
                        }
                    }
                    None => debug!("Ping from unknown host"),
                }
                let ack = Packet::Monitor(Monitor {
                    kind: MonitorKind::Ack,
                    sender_clock: self.ctx.clock(),
                    src: self.ctx.link.hwaddr,
                    dest: *sender,
                });
                self.ctx.send(sender, &ack);
            }
            MonitorKind::Ack => {
                let Some(neighbor) = self.ctx.neighbors.get(sender) else {
                    debug!("Ack from unknown host, discarding");
                    return Ok(());
                };
                let mut state = neighbor.lock();
                if state.is_idle() {
                    debug!("Unexpected ack, discarding");
                    return Ok(());
                }
                let was = state.liveness();
                state.settle();
                state.set_clock(packet.sender_clock);
                if was == Liveness::AwaitingInvestigativeAck {
                    info!("Neighbor under investigation is alive");
                } else {
                    trace!("Ack received");
                }
            }
        }
        Ok(())
    }

    /// Handle a ping request or an investigative ping from `sender`
    #[instrument(skip(self, packet), fields(sender = %sender, kind = ?packet.kind))]
    pub fn process_investigate(&self, sender: &HwAddr, packet: &MonitorInvestigate) -> Result<()> {
        if packet.src.len() != sender.len() {
            return Err(NwpdError::Rejected("monitor hardware address length mismatch"));
        }
        let local = self.ctx.link.hwaddr;
        if packet.dest != local {
            trace!(dest = %packet.dest, "Investigative packet for another host");
            return Ok(());
        }

        match packet.kind {
            InvestigateKind::PingRequest if packet.investigate == local => {
                debug!("Asked to investigate ourselves");
                self.answer_investigation(&packet.src);
            }
            InvestigateKind::PingRequest => {
                if self.ctx.neighbors.get(&packet.investigate).is_none() {
                    debug!(suspect = %packet.investigate, "Ping request for unknown neighbor");
                    return Ok(());
                }
                let relayed = Packet::Investigate(MonitorInvestigate {
                    kind: InvestigateKind::InvestigatePing,
                    sender_clock: self.ctx.clock(),
                    src: packet.src,
                    dest: packet.investigate,
                    investigate: packet.investigate,
                });
                debug!(suspect = %packet.investigate, investigator = %packet.src, "Relaying investigation");
                self.ctx.send(&packet.investigate, &relayed);
            }
            InvestigateKind::InvestigatePing => {
                if packet.investigate != local {
                    trace!(investigate = %packet.investigate, "Investigation of another host");
                    return Ok(());
                }
                self.answer_investigation(&packet.src);
            }
        }
        Ok(())
    }

    /// Prove liveness to `investigator` and re-announce
    fn answer_investigation(&self, investigator: &HwAddr) {
        info!(investigator = %investigator, "Under investigation, answering");
        let ack = Packet::Monitor(Monitor {
            kind: MonitorKind::Ack,
            sender_clock: self.ctx.clock(),
            src: self.ctx.link.hwaddr,
            dest: *investigator,
        });
        self.ctx.send(investigator, &ack);
        self.discovery.send_announce();
    }
}

fn upgrade(
    monitor: &Weak<LivenessMonitor>,
    neighbor: &Weak<Neighbor>,
) -> Option<(Arc<LivenessMonitor>, Arc<Neighbor>)> {
    Some((monitor.upgrade()?, neighbor.upgrade()?))
}
