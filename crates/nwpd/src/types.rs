//! Core types shared by the codec, the neighbor table and the route table
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - CM-8: System Component Inventory - Neighbors identified by hardware address
//! - IA-3: Device Identification - Hardware addresses and XIDs identify peers

use std::fmt;

/// Length of an XID identifier in bytes
pub const XID_LEN: usize = 20;

/// Largest hardware address a link-layer socket address can carry
pub const MAX_HADDR_LEN: usize = 8;

/// Raw 20-byte XID identifier as carried on the wire
pub type XidId = [u8; XID_LEN];

/// Link-layer hardware address
///
/// The length travels with every packet, so it is not fixed at six bytes.
/// Unused trailing bytes are always zero, which keeps `Eq` and `Hash`
/// consistent for use as a neighbor table key.
///
/// # NIST Controls
/// - IA-3: Device Identification - Hardware addresses for device identification
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HwAddr {
    len: u8,
    bytes: [u8; MAX_HADDR_LEN],
}

impl HwAddr {
    /// Build a six-byte Ethernet address
    pub const fn ethernet(mac: [u8; 6]) -> Self {
        let mut bytes = [0u8; MAX_HADDR_LEN];
        let mut i = 0;
        while i < 6 {
            bytes[i] = mac[i];
            i += 1;
        }
        Self { len: 6, bytes }
    }

    /// Build an address from a slice of 1 to 8 bytes
    pub fn from_slice(addr: &[u8]) -> Option<Self> {
        if addr.is_empty() || addr.len() > MAX_HADDR_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_HADDR_LEN];
        bytes[..addr.len()].copy_from_slice(addr);
        Some(Self {
            len: addr.len() as u8,
            bytes,
        })
    }

    /// All-ones broadcast address of the given length
    pub fn broadcast(len: usize) -> Option<Self> {
        Self::from_slice(&[0xff; MAX_HADDR_LEN][..len.min(MAX_HADDR_LEN)])
    }

    /// Parse colon-separated hex (e.g., "00:11:22:33:44:55")
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = Vec::with_capacity(MAX_HADDR_LEN);
        for part in s.split(':') {
            if part.is_empty() || part.len() > 2 {
                return None;
            }
            bytes.push(u8::from_str_radix(part, 16).ok()?);
        }
        Self::from_slice(&bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if every byte is 0xff
    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.as_bytes().iter().all(|b| *b == 0xff)
    }
}

impl fmt::Display for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HwAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwAddr({})", self)
    }
}

/// Principal type code of an XID
///
/// Held in host order; the kernel and the route attributes carry it big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XidType(pub u32);

impl fmt::Display for XidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// eXtensible IDentifier: principal type plus 20-byte identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid {
    pub ty: XidType,
    pub id: XidId,
}

impl Xid {
    /// Size of `struct xia_xid` (type + id)
    pub const WIRE_LEN: usize = 4 + XID_LEN;

    pub const fn new(ty: XidType, id: XidId) -> Self {
        Self { ty, id }
    }

    /// Identity XID of a host reachable through an Ethernet interface
    ///
    /// Layout: interface index (4 bytes, big-endian), the hardware address,
    /// zero padding to 20 bytes.
    pub fn ether(ty: XidType, ifindex: u32, hwaddr: &HwAddr) -> Self {
        let mut id = [0u8; XID_LEN];
        id[..4].copy_from_slice(&ifindex.to_be_bytes());
        id[4..4 + hwaddr.len()].copy_from_slice(hwaddr.as_bytes());
        Self { ty, id }
    }

    /// Interface index embedded in an `ether` identity XID
    pub fn ether_ifindex(&self) -> u32 {
        u32::from_be_bytes([self.id[0], self.id[1], self.id[2], self.id[3]])
    }

    /// Recover the hardware address embedded in an `ether` identity XID
    pub fn ether_hwaddr(&self, haddr_len: usize) -> Option<HwAddr> {
        if haddr_len > MAX_HADDR_LEN {
            return None;
        }
        HwAddr::from_slice(&self.id[4..4 + haddr_len])
    }

    /// Serialize as `struct xia_xid` (big-endian type followed by the id)
    pub fn to_wire(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..4].copy_from_slice(&self.ty.0.to_be_bytes());
        out[4..].copy_from_slice(&self.id);
        out
    }

    /// Parse a `struct xia_xid`
    pub fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIRE_LEN {
            return None;
        }
        let ty = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut id = [0u8; XID_LEN];
        id.copy_from_slice(&bytes[4..]);
        Some(Self::new(XidType(ty), id))
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-", self.ty.0)?;
        for b in &self.id {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
