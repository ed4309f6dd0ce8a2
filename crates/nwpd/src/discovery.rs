//! Announce and neighbor-list exchange
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Neighbors learned from announcements
//! - SI-10: Information Input Validation - Announce content checked before use
//! - AU-12: Audit Record Generation - New neighbors are logged

use crate::context::Context;
use crate::error::{NwpdError, Result};
use crate::routes::{RouteFilter, RouteTableId};
use crate::turn::TurnTaking;
use crate::types::{HwAddr, Xid, XidId};
use crate::wire::{Announce, NeighborList, NeighborRecord, Packet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Announce/discovery logic
pub struct Discovery {
    ctx: Arc<Context>,
    turns: TurnTaking,
}

impl Discovery {
    pub fn new(ctx: Arc<Context>, turns: TurnTaking) -> Self {
        Self { ctx, turns }
    }

    pub fn turns(&self) -> &TurnTaking {
        &self.turns
    }

    /// Broadcast this host's identity and local `ad` prefixes
    ///
    /// Receivers accept at most one prefix per announce, so each prefix goes
    /// out in its own frame. A host without prefixes still announces its
    /// identity.
    #[instrument(skip(self))]
    pub fn send_announce(&self) -> bool {
        let filter = RouteFilter::destinations(self.ctx.types.ad);
        let Some(local) = self.ctx.dump_routes(RouteTableId::Local, &filter) else {
            return false;
        };
        self.ctx.counters.set_local(local.len() as u32);

        let hwaddr = self.ctx.link.hwaddr;
        if local.is_empty() {
            return self.ctx.broadcast(&Packet::Announce(Announce {
                hwaddr,
                xids: Vec::new(),
            }));
        }

        let mut all_sent = true;
        for route in &local {
            let announce = Packet::Announce(Announce {
                hwaddr,
                xids: vec![route.dst.id],
            });
            all_sent &= self.ctx.broadcast(&announce);
        }
        debug!(prefixes = local.len(), "Announced local prefixes");
        all_sent
    }

    /// Periodic announce, subject to turn-taking
    pub fn try_announce(&self) {
        if self.turns.should_try_announce() {
            self.send_announce();
        }
    }

    /// Handle an announce received from `sender`
    #[instrument(skip(self, announce), fields(sender = %sender))]
    pub fn process_announce(&self, sender: &HwAddr, announce: &Announce) -> Result<()> {
        if announce.xids.len() > 1 {
            return Err(NwpdError::Rejected("announce carries more than one prefix"));
        }
        if announce.hwaddr.len() != sender.len() {
            return Err(NwpdError::Rejected("announce hardware address length mismatch"));
        }
        if announce.hwaddr != *sender {
            warn!(announced = %announce.hwaddr, "Announced hardware address differs from sender");
        }
        if announce.hwaddr == self.ctx.link.hwaddr {
            return Err(NwpdError::Rejected("announce duplicates local hardware address"));
        }

        let identity = self.ctx.ether_xid(sender);
        self.ctx.install_route(&identity, None);
        self.register(*sender, identity);
        for id in &announce.xids {
            self.ctx.install_route(&self.ctx.ad_xid(*id), Some(identity));
        }

        if self.turns.my_turn() {
            self.send_neigh_list(sender);
        }
        self.ctx.counters.add_discovered(1);
        Ok(())
    }

    /// Unicast every known neighbor and the prefixes it routes to `dest`
    #[instrument(skip(self), fields(dest = %dest))]
    pub fn send_neigh_list(&self, dest: &HwAddr) -> bool {
        let types = self.ctx.types;
        let haddr_len = self.ctx.link.hwaddr.len();

        let Some(neighbors) = self
            .ctx
            .dump_routes(RouteTableId::Main, &RouteFilter::destinations(types.ether))
        else {
            return false;
        };
        self.ctx.counters.set_discovered(neighbors.len() as u32);

        let filter = RouteFilter::destinations(types.ad).gateway_type(types.ether);
        let Some(prefixes) = self.ctx.dump_routes(RouteTableId::Main, &filter) else {
            return false;
        };

        let on_link: BTreeMap<Xid, HwAddr> = neighbors
            .iter()
            .filter(|r| r.gateway.is_none() && r.dst.ether_ifindex() == self.ctx.link.ifindex)
            .filter_map(|r| Some((r.dst, r.dst.ether_hwaddr(haddr_len)?)))
            .collect();

        let mut by_prefix: BTreeMap<XidId, Vec<HwAddr>> = BTreeMap::new();
        for route in &prefixes {
            let Some(hwaddr) = route.gateway.and_then(|gw| on_link.get(&gw)) else {
                continue;
            };
            let hosts = by_prefix.entry(route.dst.id).or_default();
            if !hosts.contains(hwaddr) {
                hosts.push(*hwaddr);
            }
        }

        let list = NeighborList {
            haddr_len: haddr_len as u8,
            neighbors: by_prefix
                .into_iter()
                .map(|(xid, hwaddrs)| NeighborRecord { xid, hwaddrs })
                .collect(),
        };
        debug!(records = list.neighbors.len(), "Sending neighbor list");
        self.ctx.send(dest, &Packet::NeighborList(list))
    }

    /// Handle a neighbor list received from `sender`
    ///
    /// Records naming more than one host are skipped, as are records naming
    /// this host.
    #[instrument(skip(self, list), fields(sender = %sender))]
    pub fn process_neigh_list(&self, sender: &HwAddr, list: &NeighborList) -> Result<()> {
        if list.haddr_len as usize != self.ctx.link.hwaddr.len() {
            return Err(NwpdError::Rejected("neighbor list hardware address length mismatch"));
        }

        for record in &list.neighbors {
            let [hwaddr] = record.hwaddrs.as_slice() else {
                debug!(hosts = record.hwaddrs.len(), "Skipping multi-host neighbor record");
                continue;
            };
            if *hwaddr == self.ctx.link.hwaddr {
                continue;
            }

            let identity = self.ctx.ether_xid(hwaddr);
            self.ctx.install_route(&identity, None);
            self.ctx
                .install_route(&self.ctx.ad_xid(record.xid), Some(identity));
            self.register(*hwaddr, identity);
        }
        Ok(())
    }

    fn register(&self, hwaddr: HwAddr, identity: Xid) {
        let (_, created) = self.ctx.neighbors.get_or_create(hwaddr, identity);
        if created {
            info!(hwaddr = %hwaddr, identity = %identity, "Neighbor added");
            self.ctx.metrics.record_neighbor_added();
            self.ctx.update_neighbor_gauge();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::link::RecordingSink;
    use crate::routes::{MemoryRouteTable, RouteTable};
    use crate::types::XID_LEN;
    use pretty_assertions::assert_eq;

    struct Fixture {
        routes: Arc<MemoryRouteTable>,
        sink: Arc<RecordingSink>,
        ctx: Arc<Context>,
    }

    fn fixture() -> Fixture {
        let routes = Arc::new(MemoryRouteTable::new());
        let sink = Arc::new(RecordingSink::new());
        let ctx = Arc::new(test_context(routes.clone(), sink.clone()));
        Fixture { routes, sink, ctx }
    }

    fn discovery(f: &Fixture) -> Discovery {
        Discovery::new(f.ctx.clone(), TurnTaking::with_seed(f.ctx.counters.clone(), 3))
    }

    fn peer(last: u8) -> HwAddr {
        HwAddr::ethernet([2, 0, 0, 0, 0, last])
    }

    #[tokio::test]
    async fn test_send_announce_one_frame_per_prefix() {
        let f = fixture();
        f.routes.add_local(f.ctx.ad_xid([1; XID_LEN]));
        f.routes.add_local(f.ctx.ad_xid([2; XID_LEN]));
        assert!(discovery(&f).send_announce());

        let sent = f.sink.take_packets();
        assert_eq!(sent.len(), 2);
        for (dest, packet) in &sent {
            assert_eq!(*dest, None);
            let Packet::Announce(a) = packet else {
                panic!("expected announce, got {:?}", packet);
            };
            assert_eq!(a.hwaddr, f.ctx.link.hwaddr);
            assert_eq!(a.xids.len(), 1);
        }
        assert_eq!(f.ctx.counters.local(), 2);
    }

    #[tokio::test]
    async fn test_send_announce_without_prefixes() {
        let f = fixture();
        assert!(discovery(&f).send_announce());
        let sent = f.sink.take_packets();
        assert_eq!(
            sent,
            vec![(
                None,
                Packet::Announce(Announce {
                    hwaddr: f.ctx.link.hwaddr,
                    xids: vec![]
                })
            )]
        );
    }

    #[tokio::test]
    async fn test_process_announce_installs_state() {
        let f = fixture();
        let d = discovery(&f);
        let announce = Announce {
            hwaddr: peer(2),
            xids: vec![[9; XID_LEN]],
        };
        d.process_announce(&peer(2), &announce).unwrap();

        let identity = f.ctx.ether_xid(&peer(2));
        assert!(f.ctx.neighbors.get(&peer(2)).is_some());
        assert_eq!(f.routes.get(&identity).unwrap().gateway, None);
        assert_eq!(
            f.routes.get(&f.ctx.ad_xid([9; XID_LEN])).unwrap().gateway,
            Some(identity)
        );
        assert_eq!(f.ctx.counters.discovered(), 1);
    }

    #[tokio::test]
    async fn test_process_announce_rejections() {
        let f = fixture();
        let d = discovery(&f);

        let two = Announce {
            hwaddr: peer(2),
            xids: vec![[1; XID_LEN], [2; XID_LEN]],
        };
        assert!(d.process_announce(&peer(2), &two).unwrap_err().is_malformed_packet());

        let short = Announce {
            hwaddr: HwAddr::from_slice(&[2, 0]).unwrap(),
            xids: vec![],
        };
        assert!(d.process_announce(&peer(2), &short).is_err());

        let me = Announce {
            hwaddr: f.ctx.link.hwaddr,
            xids: vec![],
        };
        assert!(d.process_announce(&peer(2), &me).is_err());

        assert!(f.ctx.neighbors.is_empty());
        assert!(f.routes.main_routes().is_empty());
        assert!(f.sink.is_empty());
    }

    #[tokio::test]
    async fn test_neighbor_list_groups_hosts_by_prefix() {
        let f = fixture();
        let d = discovery(&f);
        let (a, b) = (f.ctx.ether_xid(&peer(2)), f.ctx.ether_xid(&peer(3)));
        f.routes.add_route(&a, None).unwrap();
        f.routes.add_route(&b, None).unwrap();
        f.routes.add_route(&f.ctx.ad_xid([7; XID_LEN]), Some(a)).unwrap();
        f.routes.add_route(&f.ctx.ad_xid([8; XID_LEN]), Some(b)).unwrap();

        assert!(d.send_neigh_list(&peer(4)));
        let sent = f.sink.take_packets();
        assert_eq!(
            sent,
            vec![(
                Some(peer(4)),
                Packet::NeighborList(NeighborList {
                    haddr_len: 6,
                    neighbors: vec![
                        NeighborRecord {
                            xid: [7; XID_LEN],
                            hwaddrs: vec![peer(2)]
                        },
                        NeighborRecord {
                            xid: [8; XID_LEN],
                            hwaddrs: vec![peer(3)]
                        },
                    ],
                })
            )]
        );
        assert_eq!(f.ctx.counters.discovered(), 2);
    }

    #[tokio::test]
    async fn test_process_neigh_list_skips_self_and_multi_host() {
        let f = fixture();
        let d = discovery(&f);
        let list = NeighborList {
            haddr_len: 6,
            neighbors: vec![
                NeighborRecord {
                    xid: [1; XID_LEN],
                    hwaddrs: vec![peer(5)],
                },
                NeighborRecord {
                    xid: [2; XID_LEN],
                    hwaddrs: vec![f.ctx.link.hwaddr],
                },
                NeighborRecord {
                    xid: [3; XID_LEN],
                    hwaddrs: vec![peer(6), peer(7)],
                },
            ],
        };
        d.process_neigh_list(&peer(2), &list).unwrap();

        assert_eq!(f.ctx.neighbors.hwaddrs(), vec![peer(5)]);
        assert_eq!(
            f.routes.get(&f.ctx.ad_xid([1; XID_LEN])).unwrap().gateway,
            Some(f.ctx.ether_xid(&peer(5)))
        );
        assert!(f.routes.get(&f.ctx.ad_xid([2; XID_LEN])).is_none());
        assert!(f.routes.get(&f.ctx.ad_xid([3; XID_LEN])).is_none());
    }

    #[tokio::test]
    async fn test_process_neigh_list_rejects_length_mismatch() {
        let f = fixture();
        let list = NeighborList {
            haddr_len: 2,
            neighbors: vec![],
        };
        assert!(discovery(&f).process_neigh_list(&peer(2), &list).is_err());
    }
}
