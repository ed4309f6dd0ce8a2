//! Nwpd - receive loop and periodic drivers
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Continuous processing of link traffic
//! - SI-10: Information Input Validation - Frames decoded before dispatch
//! - AU-12: Audit Record Generation - Log daemon lifecycle

use crate::context::Context;
use crate::discovery::Discovery;
use crate::error::Result;
use crate::link::PacketSocket;
use crate::monitor::LivenessMonitor;
use crate::timer::TimerHandle;
use crate::turn::TurnTaking;
use crate::types::HwAddr;
use crate::wire::Packet;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Receive buffer size; NWP frames never exceed one Ethernet MTU
const RECV_BUFFER_SIZE: usize = 1500;

/// The NWP daemon
///
/// # NIST Controls
/// - SI-4(4): System Monitoring - Automated analysis of link events
pub struct Nwpd {
    ctx: Arc<Context>,
    discovery: Arc<Discovery>,
    monitor: Arc<LivenessMonitor>,
    periodic: Mutex<Vec<TimerHandle>>,
}

impl Nwpd {
    pub fn new(ctx: Arc<Context>) -> Self {
        let discovery = Arc::new(Discovery::new(
            ctx.clone(),
            TurnTaking::new(ctx.counters.clone()),
        ));
        let monitor = Arc::new(LivenessMonitor::new(ctx.clone(), discovery.clone()));
        Self::assemble(ctx, discovery, monitor)
    }

    /// Daemon with deterministic random draws
    pub fn with_seed(ctx: Arc<Context>, seed: u64) -> Self {
        let discovery = Arc::new(Discovery::new(
            ctx.clone(),
            TurnTaking::with_seed(ctx.counters.clone(), seed),
        ));
        let monitor = Arc::new(LivenessMonitor::with_seed(
            ctx.clone(),
            discovery.clone(),
            seed,
        ));
        Self::assemble(ctx, discovery, monitor)
    }

    fn assemble(ctx: Arc<Context>, discovery: Arc<Discovery>, monitor: Arc<LivenessMonitor>) -> Self {
        Self {
            ctx,
            discovery,
            monitor,
            periodic: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn discovery(&self) -> &Arc<Discovery> {
        &self.discovery
    }

    pub fn monitor(&self) -> &Arc<LivenessMonitor> {
        &self.monitor
    }

    /// Announce once and arm the announce and ping timers
    #[instrument(skip(self))]
    pub fn start(&self) {
        let config = &self.ctx.config;
        info!(
            interface = %config.interface,
            hwaddr = %self.ctx.link.hwaddr,
            ifindex = self.ctx.link.ifindex,
            "Starting NWP"
        );
        self.discovery.send_announce();

        let discovery = Arc::downgrade(&self.discovery);
        let announce = self
            .ctx
            .timers
            .repeating(config.try_announce_period(), move || {
                if let Some(discovery) = discovery.upgrade() {
                    discovery.try_announce();
                }
            });

        let monitor = Arc::downgrade(&self.monitor);
        let ping = self
            .ctx
            .timers
            .repeating(config.monitor_ping_period(), move || {
                if let Some(monitor) = monitor.upgrade() {
                    monitor.ping_tick();
                }
            });

        let mut periodic = self.periodic.lock();
        periodic.push(announce);
        periodic.push(ping);
    }

    /// Decode one received frame and dispatch it by packet type
    pub fn handle_frame(&self, sender: &HwAddr, frame: &[u8]) -> Result<()> {
        let packet = match Packet::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                self.ctx.metrics.record_malformed();
                return Err(e.into());
            }
        };
        self.ctx.metrics.record_received(packet.packet_type());
        debug!(sender = %sender, kind = packet.packet_type().label(), "Received frame");

        let result = match &packet {
            Packet::Announce(p) => self.discovery.process_announce(sender, p),
            Packet::NeighborList(p) => self.discovery.process_neigh_list(sender, p),
            Packet::Monitor(p) => self.monitor.process_monitor(sender, p),
            Packet::Investigate(p) => self.monitor.process_investigate(sender, p),
        };
        if let Err(e) = &result {
            if e.is_malformed_packet() {
                self.ctx.metrics.record_malformed();
            }
        }
        result
    }

    /// Receive loop: process frames one at a time until `shutdown` resolves
    pub async fn run<F>(&self, socket: &PacketSocket, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        tokio::pin!(shutdown);

        info!("Listening for NWP frames");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                received = socket.recv(&mut buf) => match received {
                    Ok((len, sender)) => {
                        if let Err(e) = self.handle_frame(&sender, &buf[..len]) {
                            if e.is_malformed_packet() {
                                warn!(sender = %sender, error = %e, "Discarding packet");
                            } else {
                                error!(sender = %sender, error = %e, "Failed to process packet");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Receive failed"),
                },
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Cancel periodic timers and every outstanding probe
    pub fn shutdown(&self) {
        for timer in self.periodic.lock().drain(..) {
            timer.cancel();
        }
        for hwaddr in self.ctx.neighbors.hwaddrs() {
            if let Some(neighbor) = self.ctx.neighbors.get(&hwaddr) {
                neighbor.lock().settle();
            }
        }
        info!("NWP stopped");
    }
}
