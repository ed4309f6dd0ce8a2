//! Per-process state shared by the protocol components
//!
//! Built once at startup after the interface is resolved and passed to every
//! component by `Arc`.

use crate::config::NwpdConfig;
use crate::error::{NwpdError, Result};
use crate::link::FrameSink;
use crate::metrics::MetricsCollector;
use crate::neighbor::NeighborTable;
use crate::principal::PrincipalTypes;
use crate::routes::{RouteEntry, RouteFilter, RouteTable, RouteTableId};
use crate::timer::TimerService;
use crate::turn::PrefixCounters;
use crate::types::{HwAddr, Xid, XidId};
use crate::wire::Packet;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, trace};

/// The local end of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalLink {
    pub ifindex: u32,
    pub hwaddr: HwAddr,
}

impl LocalLink {
    pub fn broadcast(&self) -> Option<HwAddr> {
        HwAddr::broadcast(self.hwaddr.len())
    }

    /// Whether a frame addressed to `dest` is meant for this host
    pub fn accepts(&self, dest: &HwAddr) -> bool {
        *dest == self.hwaddr || dest.is_broadcast()
    }
}

pub struct Context {
    pub config: NwpdConfig,
    pub link: LocalLink,
    pub types: PrincipalTypes,
    pub routes: Arc<dyn RouteTable>,
    pub sink: Arc<dyn FrameSink>,
    pub neighbors: NeighborTable,
    pub counters: Arc<PrefixCounters>,
    pub timers: TimerService,
    pub metrics: MetricsCollector,
}

impl Context {
    pub fn new(
        config: NwpdConfig,
        link: LocalLink,
        types: PrincipalTypes,
        routes: Arc<dyn RouteTable>,
        sink: Arc<dyn FrameSink>,
        timers: TimerService,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            config,
            link,
            types,
            routes,
            sink,
            neighbors: NeighborTable::new(),
            counters: Arc::new(PrefixCounters::new()),
            timers,
            metrics,
        }
    }

    /// Identity XID of a host on our link
    pub fn ether_xid(&self, hwaddr: &HwAddr) -> Xid {
        Xid::ether(self.types.ether, self.link.ifindex, hwaddr)
    }

    /// XID of an `ad` prefix carried on the wire
    pub fn ad_xid(&self, id: XidId) -> Xid {
        Xid::new(self.types.ad, id)
    }

    /// Local clock carried in monitor packets, in seconds
    pub fn clock(&self) -> i32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i32)
            .unwrap_or(0)
    }

    /// Encode and unicast `packet`; failures are logged and counted
    pub fn send(&self, dest: &HwAddr, packet: &Packet) -> bool {
        self.transmit(Some(dest), packet)
    }

    /// Encode and broadcast `packet`; failures are logged and counted
    pub fn broadcast(&self, packet: &Packet) -> bool {
        self.transmit(None, packet)
    }

    fn transmit(&self, dest: Option<&HwAddr>, packet: &Packet) -> bool {
        let packet_type = packet.packet_type();
        let result = packet.encode().map_err(NwpdError::from).and_then(|frame| match dest {
            Some(dest) => self.sink.send_to(dest, &frame),
            None => self.sink.broadcast(&frame),
        });
        match result {
            Ok(()) => {
                self.metrics.record_sent(packet_type);
                trace!(kind = packet_type.label(), dest = ?dest, "Frame sent");
                true
            }
            Err(e) => {
                self.metrics.record_send_error();
                error!(kind = packet_type.label(), dest = ?dest, error = %e, "Failed to send frame");
                false
            }
        }
    }

    /// Install a route, logging failures
    pub fn install_route(&self, dst: &Xid, gateway: Option<Xid>) -> bool {
        self.route_call("add", dst, || self.routes.add_route(dst, gateway))
    }

    /// Withdraw a route, logging failures
    pub fn withdraw_route(&self, dst: &Xid) -> bool {
        self.route_call("del", dst, || self.routes.del_route(dst))
    }

    fn route_call<F>(&self, op: &'static str, dst: &Xid, call: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        let started = Instant::now();
        let result = call();
        self.metrics
            .observe_route_latency(started.elapsed().as_secs_f64());
        match result {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_route_error();
                error!(op, dst = %dst, error = %e, "Route request failed");
                false
            }
        }
    }

    /// Dump routes, logging failures
    pub fn dump_routes(&self, table: RouteTableId, filter: &RouteFilter) -> Option<Vec<RouteEntry>> {
        let started = Instant::now();
        let result = self.routes.dump_routes(table, filter);
        self.metrics
            .observe_route_latency(started.elapsed().as_secs_f64());
        match result {
            Ok(routes) => Some(routes),
            Err(e) => {
                self.metrics.record_route_error();
                error!(table = ?table, error = %e, "Route dump failed");
                None
            }
        }
    }

    /// Refresh the neighbor gauge
    pub fn update_neighbor_gauge(&self) {
        self.metrics.set_neighbors(self.neighbors.len());
    }
}

/// Context on the current runtime with fixed link parameters
#[cfg(test)]
pub(crate) fn test_context(routes: Arc<dyn RouteTable>, sink: Arc<dyn FrameSink>) -> Context {
    use crate::types::XidType;

    Context::new(
        NwpdConfig {
            interface: "eth1".into(),
            ..Default::default()
        },
        LocalLink {
            ifindex: 3,
            hwaddr: HwAddr::ethernet([2, 0, 0, 0, 0, 1]),
        },
        PrincipalTypes {
            ad: XidType(0x10),
            ether: XidType(0x13),
        },
        routes,
        sink,
        TimerService::new(tokio::runtime::Handle::current()),
        MetricsCollector::new().unwrap(),
    )
}
