//! rtnetlink client for the XIA routing tables
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Kernel interface for forwarding state
//! - CM-3: Configuration Change Control - Route installs are logged
//! - AU-12: Audit Record Generation - Kernel rejections are surfaced as errors

/// XIA address family
pub const AF_XIA: u8 = 41;

#[cfg(target_os = "linux")]
mod linux {
    use super::AF_XIA;
    use crate::error::{NwpdError, Result};
    use crate::routes::{RouteEntry, RouteFilter, RouteTable, RouteTableId};
    use crate::types::Xid;
    use netlink_packet_core::{
        NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP, NLM_F_EXCL, NLM_F_REQUEST, NetlinkHeader,
        NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::route::{
        RouteAddress, RouteAttribute, RouteMessage, RouteProtocol, RouteScope, RouteType,
    };
    use netlink_packet_route::{AddressFamily, RouteNetlinkMessage};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing::{debug, instrument, trace, warn};

    /// Receive buffer capacity, large enough for one dump batch
    const RECV_BUFFER_SIZE: usize = 64 * 1024;

    /// Route install, failing with EEXIST when the destination is present
    const ADD_FLAGS: u16 = NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_EXCL;
    const DEL_FLAGS: u16 = NLM_F_REQUEST | NLM_F_ACK;
    const DUMP_FLAGS: u16 = NLM_F_REQUEST | NLM_F_DUMP;

    /// Netlink route socket bound to the XIA address family
    ///
    /// Requests are serialized through the socket mutex so each request
    /// reads back only its own replies.
    ///
    /// # NIST Controls
    /// - AC-3: Access Enforcement - Route changes require CAP_NET_ADMIN
    pub struct NetlinkRouteTable {
        socket: Mutex<Socket>,
        sequence: AtomicU32,
    }

    impl NetlinkRouteTable {
        #[instrument]
        pub fn new() -> Result<Self> {
            let mut socket = Socket::new(NETLINK_ROUTE)
                .map_err(|e| NwpdError::Netlink(format!("Failed to create socket: {}", e)))?;
            socket
                .bind_auto()
                .map_err(|e| NwpdError::Netlink(format!("Failed to bind socket: {}", e)))?;
            socket
                .connect(&SocketAddr::new(0, 0))
                .map_err(|e| NwpdError::Netlink(format!("Failed to connect socket: {}", e)))?;

            debug!("Netlink route socket ready");
            Ok(Self {
                socket: Mutex::new(socket),
                sequence: AtomicU32::new(1),
            })
        }

        fn route_message(table: RouteTableId, scope: RouteScope) -> RouteMessage {
            let mut msg = RouteMessage::default();
            msg.header.address_family = AddressFamily::from(AF_XIA);
            msg.header.destination_prefix_length = Xid::WIRE_LEN as u8;
            msg.header.table = table.index();
            msg.header.protocol = RouteProtocol::Boot;
            msg.header.scope = scope;
            msg.header.kind = RouteType::Unicast;
            msg
        }

        /// Send one request and collect every reply up to the ack or the
        /// end of the dump
        fn transact(
            &self,
            payload: RouteNetlinkMessage,
            flags: u16,
        ) -> Result<Vec<RouteMessage>> {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let mut header = NetlinkHeader::default();
            header.flags = flags;
            header.sequence_number = seq;

            let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(payload));
            packet.finalize();
            let mut buf = vec![0u8; packet.buffer_len()];
            packet.serialize(&mut buf);

            let socket = self.socket.lock();
            socket
                .send(&buf, 0)
                .map_err(|e| NwpdError::Netlink(format!("Failed to send request: {}", e)))?;

            let mut routes = Vec::new();
            let mut rx = Vec::with_capacity(RECV_BUFFER_SIZE);
            loop {
                rx.clear();
                let len = socket
                    .recv(&mut rx, 0)
                    .map_err(|e| NwpdError::Netlink(format!("Failed to receive: {}", e)))?;

                let mut offset = 0;
                while offset < len {
                    let msg = NetlinkMessage::<RouteNetlinkMessage>::deserialize(&rx[offset..len])
                        .map_err(|e| NwpdError::Netlink(format!("Failed to parse message: {}", e)))?;
                    let msg_len = msg.header.length as usize;
                    if msg_len == 0 {
                        return Err(NwpdError::Netlink("zero-length netlink message".into()));
                    }
                    offset += (msg_len + 3) & !3;

                    if msg.header.sequence_number != seq {
                        trace!(seq = msg.header.sequence_number, "Skipping stale netlink reply");
                        continue;
                    }

                    match msg.payload {
                        NetlinkPayload::Done(_) => return Ok(routes),
                        NetlinkPayload::Error(err) => {
                            return match err.code {
                                None => Ok(routes),
                                Some(code) if code.get() == -libc::EEXIST => {
                                    trace!("Route already present");
                                    Ok(routes)
                                }
                                Some(code) => Err(NwpdError::Route(
                                    std::io::Error::from_raw_os_error(-code.get()).to_string(),
                                )),
                            };
                        }
                        NetlinkPayload::InnerMessage(RouteNetlinkMessage::NewRoute(route)) => {
                            routes.push(route);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    impl RouteTable for NetlinkRouteTable {
        #[instrument(skip(self), fields(dst = %dst))]
        fn add_route(&self, dst: &Xid, gateway: Option<Xid>) -> Result<()> {
            let mut msg = Self::route_message(RouteTableId::Main, RouteScope::Link);
            msg.attributes.push(RouteAttribute::Destination(RouteAddress::Other(
                dst.to_wire().to_vec(),
            )));
            if let Some(gw) = gateway {
                msg.attributes
                    .push(RouteAttribute::Gateway(RouteAddress::Other(gw.to_wire().to_vec())));
            }
            self.transact(
                RouteNetlinkMessage::NewRoute(msg),
                ADD_FLAGS,
            )?;
            debug!(gateway = ?gateway.map(|g| g.to_string()), "Installed route");
            Ok(())
        }

        #[instrument(skip(self), fields(dst = %dst))]
        fn del_route(&self, dst: &Xid) -> Result<()> {
            let mut msg = Self::route_message(RouteTableId::Main, RouteScope::NoWhere);
            msg.attributes.push(RouteAttribute::Destination(RouteAddress::Other(
                dst.to_wire().to_vec(),
            )));
            self.transact(
                RouteNetlinkMessage::DelRoute(msg),
                DEL_FLAGS,
            )?;
            debug!("Withdrew route");
            Ok(())
        }

        #[instrument(skip(self, filter))]
        fn dump_routes(&self, table: RouteTableId, filter: &RouteFilter) -> Result<Vec<RouteEntry>> {
            let msg = Self::route_message(table, RouteScope::Universe);
            let replies = self.transact(
                RouteNetlinkMessage::GetRoute(msg),
                DUMP_FLAGS,
            )?;

            let entries: Vec<RouteEntry> = replies
                .iter()
                .filter_map(parse_route)
                .filter(|entry| entry.table == table && filter.matches(entry))
                .collect();
            trace!(count = entries.len(), "Dumped routes");
            Ok(entries)
        }
    }

    /// Convert a kernel route message into a route entry, skipping anything
    /// that is not a well-formed XIA route
    fn parse_route(msg: &RouteMessage) -> Option<RouteEntry> {
        if u8::from(msg.header.address_family) != AF_XIA {
            return None;
        }
        if msg.header.destination_prefix_length as usize != Xid::WIRE_LEN {
            warn!(
                len = msg.header.destination_prefix_length,
                "Unexpected XIA destination length"
            );
            return None;
        }

        let mut table = msg.header.table as u32;
        let mut dst = None;
        let mut gateway = None;
        for attr in &msg.attributes {
            match attr {
                RouteAttribute::Table(t) => table = *t,
                RouteAttribute::Destination(addr) => dst = xid_from_address(addr),
                RouteAttribute::Gateway(addr) => gateway = xid_from_address(addr),
                _ => {}
            }
        }

        Some(RouteEntry {
            table: RouteTableId::from_index(table)?,
            dst: dst?,
            gateway,
        })
    }

    fn xid_from_address(addr: &RouteAddress) -> Option<Xid> {
        match addr {
            RouteAddress::Other(bytes) if bytes.len() == Xid::WIRE_LEN => Xid::from_wire(bytes),
            _ => None,
        }
    }

}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod mock {
    use crate::error::{NwpdError, Result};
    use crate::routes::{RouteEntry, RouteFilter, RouteTable, RouteTableId};
    use crate::types::Xid;

    pub struct NetlinkRouteTable;

    impl NetlinkRouteTable {
        pub fn new() -> Result<Self> {
            Err(NwpdError::Netlink("XIA routing requires Linux".into()))
        }
    }

    impl RouteTable for NetlinkRouteTable {
        fn add_route(&self, _dst: &Xid, _gateway: Option<Xid>) -> Result<()> {
            Ok(())
        }

        fn del_route(&self, _dst: &Xid) -> Result<()> {
            Ok(())
        }

        fn dump_routes(&self, _table: RouteTableId, _filter: &RouteFilter) -> Result<Vec<RouteEntry>> {
            Ok(Vec::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;
