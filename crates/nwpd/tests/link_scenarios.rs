//! Link-level scenarios for nwpd
//!
//! Drives whole daemons through encoded frames, with an in-memory route
//! table and a recording frame sink standing in for the kernel and the wire.

use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use xia_nwpd::wire::{Announce, InvestigateKind, Monitor, MonitorKind};
use xia_nwpd::{
    Context, HwAddr, Liveness, LocalLink, MemoryRouteTable, MetricsCollector, Nwpd, NwpdConfig,
    Packet, PrincipalTypes, RecordingSink, TimerService, XidType,
};

const AD: XidType = XidType(0x10);
const ETHER: XidType = XidType(0x13);

struct Node {
    hwaddr: HwAddr,
    routes: Arc<MemoryRouteTable>,
    sink: Arc<RecordingSink>,
    nwpd: Nwpd,
}

impl Node {
    fn new(last: u8, config: NwpdConfig) -> Self {
        let hwaddr = HwAddr::ethernet([2, 0, 0, 0, 0, last]);
        let routes = Arc::new(MemoryRouteTable::new());
        let sink = Arc::new(RecordingSink::new());
        let ctx = Context::new(
            config,
            LocalLink { ifindex: 4, hwaddr },
            PrincipalTypes {
                ad: AD,
                ether: ETHER,
            },
            routes.clone(),
            sink.clone(),
            TimerService::current().unwrap(),
            MetricsCollector::new().unwrap(),
        );
        Self {
            hwaddr,
            routes,
            sink,
            nwpd: Nwpd::with_seed(Arc::new(ctx), last as u64),
        }
    }

    fn ctx(&self) -> &Context {
        self.nwpd.context()
    }

    fn liveness(&self, hwaddr: &HwAddr) -> Option<Liveness> {
        let neighbor = self.ctx().neighbors.get(hwaddr)?;
        let state = neighbor.lock();
        Some(state.liveness())
    }

    /// Feed a packet as if `sender` had put it on the wire
    fn receive(&self, sender: &HwAddr, packet: Packet) -> xia_nwpd::Result<()> {
        self.nwpd.handle_frame(sender, &packet.encode().unwrap())
    }
}

fn config() -> NwpdConfig {
    NwpdConfig {
        interface: "eth0".into(),
        ..Default::default()
    }
}

fn peer(last: u8) -> HwAddr {
    HwAddr::ethernet([2, 0, 0, 0, 0, last])
}

fn announce(hwaddr: HwAddr, prefix: u8) -> Packet {
    Packet::Announce(Announce {
        hwaddr,
        xids: vec![[prefix; 20]],
    })
}

/// Deliver everything `from` sent to the nodes it was addressed to
fn deliver(from: &Node, to: &[&Node]) -> usize {
    let mut delivered = 0;
    for frame in from.sink.take() {
        for node in to {
            if frame.dest.is_none() || frame.dest == Some(node.hwaddr) {
                node.nwpd.handle_frame(&from.hwaddr, &frame.bytes).unwrap();
                delivered += 1;
            }
        }
    }
    delivered
}

#[tokio::test]
async fn test_announce_installs_neighbor_and_replies_with_list() {
    let node = Node::new(1, config());
    node.routes.add_local(node.ctx().ad_xid([0xaa; 20]));
    assert!(node.nwpd.discovery().send_announce());
    node.sink.take();

    node.receive(&peer(2), announce(peer(2), 0x22)).unwrap();

    let identity = node.ctx().ether_xid(&peer(2));
    assert_eq!(node.liveness(&peer(2)), Some(Liveness::Idle));
    assert_eq!(node.routes.get(&identity).unwrap().gateway, None);
    assert_eq!(
        node.routes.get(&node.ctx().ad_xid([0x22; 20])).unwrap().gateway,
        Some(identity)
    );

    // Only local prefixes and nothing discovered yet: always our turn
    let sent = node.sink.take_packets();
    assert_eq!(sent.len(), 1);
    let (dest, Packet::NeighborList(list)) = &sent[0] else {
        panic!("expected neighbor list, got {:?}", sent[0]);
    };
    assert_eq!(*dest, Some(peer(2)));
    assert_eq!(list.neighbors.len(), 1);
    assert_eq!(list.neighbors[0].xid, [0x22; 20]);
    assert_eq!(list.neighbors[0].hwaddrs, vec![peer(2)]);
}

#[tokio::test]
async fn test_announce_with_two_prefixes_changes_nothing() {
    let node = Node::new(1, config());
    let packet = Packet::Announce(Announce {
        hwaddr: peer(2),
        xids: vec![[1; 20], [2; 20]],
    });

    let err = node.receive(&peer(2), packet).unwrap_err();
    assert!(err.is_malformed_packet());
    assert!(node.ctx().neighbors.is_empty());
    assert!(node.routes.main_routes().is_empty());
    assert!(node.sink.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ack_before_timeout_returns_neighbor_to_idle() {
    let node = Node::new(1, config());
    node.receive(&peer(2), announce(peer(2), 0x22)).unwrap();
    node.sink.take();

    assert_eq!(node.nwpd.monitor().ping_tick(), Some(peer(2)));
    assert_eq!(node.liveness(&peer(2)), Some(Liveness::AwaitingAck));

    let ack = Packet::Monitor(Monitor {
        kind: MonitorKind::Ack,
        sender_clock: 4242,
        src: peer(2),
        dest: node.hwaddr,
    });
    node.receive(&peer(2), ack).unwrap();

    let neighbor = node.ctx().neighbors.get(&peer(2)).unwrap();
    {
        let state = neighbor.lock();
        assert_eq!(state.liveness(), Liveness::Idle);
        assert!(!state.has_timer());
        assert_eq!(state.clock(), 4242);
    }

    // The cancelled ack timeout never escalates
    node.sink.take();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(node.sink.is_empty());
    assert_eq!(node.liveness(&peer(2)), Some(Liveness::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_silent_neighbor_is_investigated_then_evicted() {
    let node = Node::new(1, config());
    for last in 2..18 {
        node.receive(&peer(last), announce(peer(last), last)).unwrap();
    }
    assert_eq!(node.ctx().neighbors.len(), 16);
    node.sink.take();

    let suspect = node.nwpd.monitor().ping_tick().unwrap();
    node.sink.take();

    // Ack timeout: exactly ten relays asked to probe the suspect
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(
        node.liveness(&suspect),
        Some(Liveness::AwaitingInvestigativeAck)
    );
    let sent = node.sink.take_packets();
    assert_eq!(sent.len(), 10);
    let mut relays = HashSet::new();
    for (dest, packet) in &sent {
        let Packet::Investigate(request) = packet else {
            panic!("expected ping request, got {:?}", packet);
        };
        assert_eq!(request.kind, InvestigateKind::PingRequest);
        assert_eq!(request.src, node.hwaddr);
        assert_eq!(request.investigate, suspect);
        assert_eq!(*dest, Some(request.dest));
        assert_ne!(request.dest, suspect);
        relays.insert(request.dest);
    }
    assert_eq!(relays.len(), 10);

    // Investigative ack timeout: entry and routes gone
    tokio::time::sleep(Duration::from_secs(5)).await;
    let identity = node.ctx().ether_xid(&suspect);
    assert!(node.ctx().neighbors.get(&suspect).is_none());
    assert_eq!(node.ctx().neighbors.len(), 15);
    assert!(node.routes.get(&identity).is_none());
    assert!(node
        .routes
        .main_routes()
        .iter()
        .all(|r| r.dst != identity && r.gateway != Some(identity)));
    assert_eq!(node.ctx().metrics.neighbors_evicted_total.get(), 1.0);
}

/// Announce three neighbors, ping one and let its ack timeout expire
async fn investigated_suspect(node: &Node) -> HwAddr {
    for last in 2..5 {
        node.receive(&peer(last), announce(peer(last), last)).unwrap();
    }
    node.sink.take();

    let suspect = node.nwpd.monitor().ping_tick().unwrap();
    tokio::time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(
        node.liveness(&suspect),
        Some(Liveness::AwaitingInvestigativeAck)
    );
    node.sink.take();
    suspect
}

/// The suspect recovered: idle, no timer, and still routed well past the
/// investigative deadline
async fn assert_recovered(node: &Node, suspect: &HwAddr, clock: i32) {
    let neighbor = node.ctx().neighbors.get(suspect).unwrap();
    {
        let state = neighbor.lock();
        assert_eq!(state.liveness(), Liveness::Idle);
        assert!(!state.has_timer());
        assert_eq!(state.clock(), clock);
    }

    tokio::time::sleep(Duration::from_secs(20)).await;
    let identity = node.ctx().ether_xid(suspect);
    assert_eq!(node.liveness(suspect), Some(Liveness::Idle));
    assert_eq!(node.ctx().neighbors.len(), 3);
    assert_eq!(node.routes.get(&identity).unwrap().gateway, None);
    let prefix = node.ctx().ad_xid([suspect.as_bytes()[5]; 20]);
    assert_eq!(node.routes.get(&prefix).unwrap().gateway, Some(identity));
    assert_eq!(node.ctx().metrics.neighbors_evicted_total.get(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_investigated_neighbor_recovers_on_ack() {
    let node = Node::new(1, config());
    let suspect = investigated_suspect(&node).await;

    let ack = Packet::Monitor(Monitor {
        kind: MonitorKind::Ack,
        sender_clock: 777,
        src: suspect,
        dest: node.hwaddr,
    });
    node.receive(&suspect, ack).unwrap();
    assert!(node.sink.is_empty());

    assert_recovered(&node, &suspect, 777).await;
}

#[tokio::test(start_paused = true)]
async fn test_investigated_neighbor_recovers_on_ping() {
    let node = Node::new(1, config());
    let suspect = investigated_suspect(&node).await;

    let ping = Packet::Monitor(Monitor {
        kind: MonitorKind::Ping,
        sender_clock: 888,
        src: suspect,
        dest: node.hwaddr,
    });
    node.receive(&suspect, ping).unwrap();

    // The ping itself is still answered
    let sent = node.sink.take_packets();
    assert_eq!(sent.len(), 1);
    let (dest, Packet::Monitor(ack)) = &sent[0] else {
        panic!("expected an ack, got {:?}", sent[0]);
    };
    assert_eq!(*dest, Some(suspect));
    assert_eq!(ack.kind, MonitorKind::Ack);

    assert_recovered(&node, &suspect, 888).await;
}

#[tokio::test(start_paused = true)]
async fn test_two_hosts_discover_and_monitor_each_other() {
    let a = Node::new(1, config());
    let b = Node::new(2, config());
    a.routes.add_local(a.ctx().ad_xid([0xaa; 20]));
    b.routes.add_local(b.ctx().ad_xid([0xbb; 20]));

    a.nwpd.start();
    b.nwpd.start();
    assert_eq!(deliver(&a, &[&b]), 1);
    assert_eq!(deliver(&b, &[&a]), 2);
    deliver(&a, &[&b]);

    assert!(a.ctx().neighbors.get(&b.hwaddr).is_some());
    assert!(b.ctx().neighbors.get(&a.hwaddr).is_some());
    assert_eq!(
        a.routes.get(&a.ctx().ad_xid([0xbb; 20])).unwrap().gateway,
        Some(a.ctx().ether_xid(&b.hwaddr))
    );

    // Ping and ack across the link
    assert_eq!(a.nwpd.monitor().ping_tick(), Some(b.hwaddr));
    deliver(&a, &[&b]);
    deliver(&b, &[&a]);
    assert_eq!(a.liveness(&b.hwaddr), Some(Liveness::Idle));

    a.nwpd.shutdown();
    b.nwpd.shutdown();
}
