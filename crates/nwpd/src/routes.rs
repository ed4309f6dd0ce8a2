//! XIA routing table collaborator
//!
//! The daemon installs a link-scope route for every neighbor identity and a
//! gateway route for every prefix learned through a neighbor. Route
//! installation and the neighbor table update are separate calls; there is
//! no transaction spanning both.

use crate::error::{NwpdError, Result};
use crate::types::{Xid, XidType};
use parking_lot::Mutex;

/// XIA routing tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteTableId {
    /// Locally owned XIDs (what this host announces)
    Local,
    /// Forwarding routes (neighbors and prefixes behind them)
    Main,
}

impl RouteTableId {
    /// Kernel table index (`XRTABLE_*_INDEX`)
    pub fn index(self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Main => 1,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Local),
            1 => Some(Self::Main),
            _ => None,
        }
    }
}

/// One route as reported by a dump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub table: RouteTableId,
    pub dst: Xid,
    pub gateway: Option<Xid>,
}

/// Predicate applied to dumped routes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteFilter {
    pub dst_type: Option<XidType>,
    pub gw_type: Option<XidType>,
    pub gw: Option<Xid>,
}

impl RouteFilter {
    /// Routes whose destination has the given principal type
    pub fn destinations(ty: XidType) -> Self {
        Self {
            dst_type: Some(ty),
            ..Default::default()
        }
    }

    /// Only routes whose gateway (if any) has this principal type
    pub fn gateway_type(mut self, ty: XidType) -> Self {
        self.gw_type = Some(ty);
        self
    }

    /// Only routes through this exact gateway
    pub fn via(mut self, gw: Xid) -> Self {
        self.gw = Some(gw);
        self
    }

    pub fn matches(&self, route: &RouteEntry) -> bool {
        if self.dst_type.is_some_and(|ty| route.dst.ty != ty) {
            return false;
        }
        match route.gateway {
            Some(gw) => {
                !(self.gw_type.is_some_and(|ty| gw.ty != ty)
                    || self.gw.is_some_and(|want| want != gw))
            }
            None => self.gw.is_none(),
        }
    }
}

/// Operations the daemon needs from the routing subsystem
///
/// Implementations provide their own per-call atomicity; failures are
/// reported and never retried by the caller.
#[cfg_attr(test, mockall::automock)]
pub trait RouteTable: Send + Sync {
    /// Install `dst` in the main table; without a gateway it is a
    /// link-scope neighbor route. Installing an existing route succeeds.
    fn add_route(&self, dst: &Xid, gateway: Option<Xid>) -> Result<()>;

    /// Withdraw `dst` from the main table
    fn del_route(&self, dst: &Xid) -> Result<()>;

    /// List routes of `table` accepted by `filter`
    fn dump_routes(&self, table: RouteTableId, filter: &RouteFilter) -> Result<Vec<RouteEntry>>;
}

/// In-process route table
#[derive(Debug, Default)]
pub struct MemoryRouteTable {
    routes: Mutex<Vec<RouteEntry>>,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a locally owned XID to the local table
    pub fn add_local(&self, dst: Xid) {
        self.routes.lock().push(RouteEntry {
            table: RouteTableId::Local,
            dst,
            gateway: None,
        });
    }

    /// Look up a main-table route
    pub fn get(&self, dst: &Xid) -> Option<RouteEntry> {
        self.routes
            .lock()
            .iter()
            .find(|r| r.table == RouteTableId::Main && r.dst == *dst)
            .cloned()
    }

    pub fn main_routes(&self) -> Vec<RouteEntry> {
        self.routes
            .lock()
            .iter()
            .filter(|r| r.table == RouteTableId::Main)
            .cloned()
            .collect()
    }
}

impl RouteTable for MemoryRouteTable {
    fn add_route(&self, dst: &Xid, gateway: Option<Xid>) -> Result<()> {
        let mut routes = self.routes.lock();
        routes.retain(|r| !(r.table == RouteTableId::Main && r.dst == *dst));
        routes.push(RouteEntry {
            table: RouteTableId::Main,
            dst: *dst,
            gateway,
        });
        Ok(())
    }

    fn del_route(&self, dst: &Xid) -> Result<()> {
        let mut routes = self.routes.lock();
        let before = routes.len();
        routes.retain(|r| !(r.table == RouteTableId::Main && r.dst == *dst));
        if routes.len() == before {
            return Err(NwpdError::Route(format!("no route to {}", dst)));
        }
        Ok(())
    }

    fn dump_routes(&self, table: RouteTableId, filter: &RouteFilter) -> Result<Vec<RouteEntry>> {
        Ok(self
            .routes
            .lock()
            .iter()
            .filter(|r| r.table == table && filter.matches(r))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::XID_LEN;

    const AD: XidType = XidType(0x10);
    const ETHER: XidType = XidType(0x13);

    fn xid(ty: XidType, b: u8) -> Xid {
        Xid::new(ty, [b; XID_LEN])
    }

    #[test]
    fn test_filter_by_destination_type() {
        let filter = RouteFilter::destinations(AD);
        let ad = RouteEntry {
            table: RouteTableId::Main,
            dst: xid(AD, 1),
            gateway: None,
        };
        let ether = RouteEntry {
            dst: xid(ETHER, 1),
            ..ad.clone()
        };
        assert!(filter.matches(&ad));
        assert!(!filter.matches(&ether));
    }

    #[test]
    fn test_filter_by_gateway() {
        let gw = xid(ETHER, 9);
        let filter = RouteFilter::destinations(AD).gateway_type(ETHER).via(gw);
        let via_gw = RouteEntry {
            table: RouteTableId::Main,
            dst: xid(AD, 1),
            gateway: Some(gw),
        };
        let via_other = RouteEntry {
            gateway: Some(xid(ETHER, 8)),
            ..via_gw.clone()
        };
        let direct = RouteEntry {
            gateway: None,
            ..via_gw.clone()
        };
        assert!(filter.matches(&via_gw));
        assert!(!filter.matches(&via_other));
        assert!(!filter.matches(&direct));
    }

    #[test]
    fn test_gateway_type_ignored_without_gateway() {
        let filter = RouteFilter::destinations(AD).gateway_type(ETHER);
        let local = RouteEntry {
            table: RouteTableId::Local,
            dst: xid(AD, 1),
            gateway: None,
        };
        assert!(filter.matches(&local));
    }

    #[test]
    fn test_memory_table_add_is_idempotent() {
        let table = MemoryRouteTable::new();
        table.add_route(&xid(AD, 1), Some(xid(ETHER, 1))).unwrap();
        table.add_route(&xid(AD, 1), Some(xid(ETHER, 2))).unwrap();
        assert_eq!(table.main_routes().len(), 1);
        assert_eq!(table.get(&xid(AD, 1)).unwrap().gateway, Some(xid(ETHER, 2)));
    }

    #[test]
    fn test_memory_table_del_and_dump() {
        let table = MemoryRouteTable::new();
        table.add_local(xid(AD, 7));
        table.add_route(&xid(ETHER, 1), None).unwrap();
        assert_eq!(
            table
                .dump_routes(RouteTableId::Local, &RouteFilter::destinations(AD))
                .unwrap()
                .len(),
            1
        );
        table.del_route(&xid(ETHER, 1)).unwrap();
        assert!(table.del_route(&xid(ETHER, 1)).is_err());
        assert!(table.main_routes().is_empty());
    }

    #[test]
    fn test_table_index_mapping() {
        assert_eq!(RouteTableId::from_index(RouteTableId::Local.index() as u32), Some(RouteTableId::Local));
        assert_eq!(RouteTableId::from_index(RouteTableId::Main.index() as u32), Some(RouteTableId::Main));
        assert_eq!(RouteTableId::from_index(254), None);
    }
}
