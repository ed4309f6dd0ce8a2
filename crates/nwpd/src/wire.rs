//! NWP wire codec
//!
//! Every packet starts with a two byte common header (version, type). The
//! remainder is parsed with a [`Reader`] that tracks the bytes left in the
//! frame, so every length-derived offset is bounds checked before it is used.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - All peer-supplied lengths validated
//! - SC-5: DoS Protection - Malformed frames rejected without state changes
//!
//! # Layouts
//!
//! ```text
//! Announce:      ver | type | hid_count | haddr_len | haddr | xid * hid_count
//! NeighborList:  ver | type | count | haddr_len | { xid | num | haddr * num } * count
//! Monitor:       ver | type | haddr_len | reserved | clock(be32) | src | dest
//! Investigate:   Monitor fields | investigate
//! ```

use crate::types::{HwAddr, MAX_HADDR_LEN, XID_LEN, XidId};
use thiserror::Error;

/// EtherType reserved for NWP frames
pub const ETH_P_NWP: u16 = 0xC0DF;

/// Protocol version carried in every header
pub const NWP_VERSION: u8 = 0x01;

/// Size of the common header
pub const COMMON_HEADER_LEN: usize = 2;

/// Fixed part of Announce and NeighborList packets (header + two count bytes)
const LIST_PREFIX_LEN: usize = COMMON_HEADER_LEN + 2;

/// Fixed part of Monitor packets before the hardware addresses
const MONITOR_PREFIX_LEN: usize = COMMON_HEADER_LEN + 2 + 4;

/// Reasons a frame is rejected by the decoder
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated frame: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("invalid hardware address length {0}")]
    InvalidHaddrLen(u8),

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

/// Reasons a packet cannot be serialized
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("too many {field}: {count} exceeds 255")]
    TooMany { field: &'static str, count: usize },

    #[error("hardware address {addr} does not match declared length {expected}")]
    HaddrLenMismatch { addr: HwAddr, expected: usize },
}

/// Packet type tag (second header byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Announcement = 0x01,
    NeighborList = 0x02,
    MonitorPing = 0x03,
    MonitorAck = 0x04,
    MonitorPingRequest = 0x05,
    MonitorInvestigatePing = 0x06,
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Announcement),
            0x02 => Ok(Self::NeighborList),
            0x03 => Ok(Self::MonitorPing),
            0x04 => Ok(Self::MonitorAck),
            0x05 => Ok(Self::MonitorPingRequest),
            0x06 => Ok(Self::MonitorInvestigatePing),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

impl PacketType {
    /// Short name used in logs and metric labels
    pub fn label(self) -> &'static str {
        match self {
            Self::Announcement => "announce",
            Self::NeighborList => "neighbor_list",
            Self::MonitorPing => "ping",
            Self::MonitorAck => "ack",
            Self::MonitorPingRequest => "ping_request",
            Self::MonitorInvestigatePing => "investigate_ping",
        }
    }
}

/// Cursor over a received frame
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless at least `needed` more bytes are available
    #[inline]
    pub fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if needed > self.remaining() {
            return Err(DecodeError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn i32_be(&mut self) -> Result<i32, DecodeError> {
        let b = self.bytes(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn xid(&mut self) -> Result<XidId, DecodeError> {
        let mut id = [0u8; XID_LEN];
        id.copy_from_slice(self.bytes(XID_LEN)?);
        Ok(id)
    }

    pub fn hwaddr(&mut self, len: u8) -> Result<HwAddr, DecodeError> {
        let raw = self.bytes(len as usize)?;
        HwAddr::from_slice(raw).ok_or(DecodeError::InvalidHaddrLen(len))
    }

    /// Every NWP layout is exactly sized; leftover bytes mean a lying header
    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

/// Validate a declared hardware address length before it sizes anything
fn check_haddr_len(len: u8) -> Result<u8, DecodeError> {
    if len == 0 || len as usize > MAX_HADDR_LEN {
        return Err(DecodeError::InvalidHaddrLen(len));
    }
    Ok(len)
}

/// Output buffer for a packet under construction
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_header(packet_type: PacketType, capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity);
        buf.push(NWP_VERSION);
        buf.push(packet_type as u8);
        Self { buf }
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    fn i32_be(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    fn hwaddr(&mut self, addr: &HwAddr, expected: usize) -> Result<&mut Self, EncodeError> {
        if addr.len() != expected {
            return Err(EncodeError::HaddrLenMismatch {
                addr: *addr,
                expected,
            });
        }
        Ok(self.bytes(addr.as_bytes()))
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn count_u8(field: &'static str, count: usize) -> Result<u8, EncodeError> {
    u8::try_from(count).map_err(|_| EncodeError::TooMany { field, count })
}

/// Announce packet: sender hardware address plus advertised prefix XIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announce {
    pub hwaddr: HwAddr,
    pub xids: Vec<XidId>,
}

impl Announce {
    /// Exact encoded size for the given field counts
    pub fn wire_len(haddr_len: usize, hid_count: usize) -> usize {
        LIST_PREFIX_LEN + haddr_len + hid_count * XID_LEN
    }

    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.ensure(2)?;
        let hid_count = r.u8()? as usize;
        let haddr_len = check_haddr_len(r.u8()?)?;
        r.ensure(haddr_len as usize + hid_count * XID_LEN)?;

        let hwaddr = r.hwaddr(haddr_len)?;
        let xids = (0..hid_count)
            .map(|_| r.xid())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hwaddr, xids })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let hid_count = count_u8("announced XIDs", self.xids.len())?;
        let mut w = Writer::with_header(
            PacketType::Announcement,
            Self::wire_len(self.hwaddr.len(), self.xids.len()),
        );
        w.u8(hid_count).u8(self.hwaddr.len() as u8);
        w.hwaddr(&self.hwaddr, self.hwaddr.len())?;
        for xid in &self.xids {
            w.bytes(xid);
        }
        Ok(w.finish())
    }
}

/// One record of a NeighborList: a prefix and the hosts that route it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborRecord {
    pub xid: XidId,
    pub hwaddrs: Vec<HwAddr>,
}

/// NeighborList packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborList {
    pub haddr_len: u8,
    pub neighbors: Vec<NeighborRecord>,
}

impl NeighborList {
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.ensure(2)?;
        let count = r.u8()? as usize;
        let haddr_len = check_haddr_len(r.u8()?)?;

        // Per-record counts are peer-controlled; each record is bounds
        // checked as it is walked rather than trusting the total.
        let mut neighbors = Vec::with_capacity(count);
        for _ in 0..count {
            r.ensure(XID_LEN + 1)?;
            let xid = r.xid()?;
            let num = r.u8()? as usize;
            r.ensure(num * haddr_len as usize)?;
            let hwaddrs = (0..num)
                .map(|_| r.hwaddr(haddr_len))
                .collect::<Result<Vec<_>, _>>()?;
            neighbors.push(NeighborRecord { xid, hwaddrs });
        }
        Ok(Self {
            haddr_len,
            neighbors,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let count = count_u8("neighbor records", self.neighbors.len())?;
        let haddr_len = self.haddr_len as usize;
        let capacity = self.neighbors.iter().fold(LIST_PREFIX_LEN, |acc, n| {
            acc + XID_LEN + 1 + n.hwaddrs.len() * haddr_len
        });

        let mut w = Writer::with_header(PacketType::NeighborList, capacity);
        w.u8(count).u8(self.haddr_len);
        for record in &self.neighbors {
            let num = count_u8("hardware addresses per record", record.hwaddrs.len())?;
            w.bytes(&record.xid).u8(num);
            for addr in &record.hwaddrs {
                w.hwaddr(addr, haddr_len)?;
            }
        }
        Ok(w.finish())
    }
}

/// Direction of a Monitor packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorKind {
    Ping,
    Ack,
}

impl MonitorKind {
    fn packet_type(self) -> PacketType {
        match self {
            Self::Ping => PacketType::MonitorPing,
            Self::Ack => PacketType::MonitorAck,
        }
    }
}

/// Monitor ping/ack packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub kind: MonitorKind,
    pub sender_clock: i32,
    pub src: HwAddr,
    pub dest: HwAddr,
}

/// Reads `haddr_len | reserved | clock | src | dest`
fn decode_monitor_fields(
    r: &mut Reader<'_>,
    extra_addrs: usize,
) -> Result<(i32, HwAddr, HwAddr, u8), DecodeError> {
    r.ensure(MONITOR_PREFIX_LEN - COMMON_HEADER_LEN)?;
    let haddr_len = check_haddr_len(r.u8()?)?;
    let _reserved = r.u8()?;
    let clock = r.i32_be()?;
    r.ensure((2 + extra_addrs) * haddr_len as usize)?;
    let src = r.hwaddr(haddr_len)?;
    let dest = r.hwaddr(haddr_len)?;
    Ok((clock, src, dest, haddr_len))
}

impl Monitor {
    pub fn wire_len(haddr_len: usize) -> usize {
        MONITOR_PREFIX_LEN + 2 * haddr_len
    }

    fn decode_body(r: &mut Reader<'_>, kind: MonitorKind) -> Result<Self, DecodeError> {
        let (sender_clock, src, dest, _) = decode_monitor_fields(r, 0)?;
        Ok(Self {
            kind,
            sender_clock,
            src,
            dest,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let len = self.src.len();
        let mut w = Writer::with_header(self.kind.packet_type(), Self::wire_len(len));
        w.u8(len as u8).u8(0).i32_be(self.sender_clock);
        w.hwaddr(&self.src, len)?.hwaddr(&self.dest, len)?;
        Ok(w.finish())
    }
}

/// Direction of a MonitorInvestigate packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvestigateKind {
    /// Investigator asks a relay to probe the suspect
    PingRequest,
    /// Relay probes the suspect on the investigator's behalf
    InvestigatePing,
}

impl InvestigateKind {
    fn packet_type(self) -> PacketType {
        match self {
            Self::PingRequest => PacketType::MonitorPingRequest,
            Self::InvestigatePing => PacketType::MonitorInvestigatePing,
        }
    }
}

/// Investigative probe packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInvestigate {
    pub kind: InvestigateKind,
    pub sender_clock: i32,
    pub src: HwAddr,
    pub dest: HwAddr,
    /// Host under investigation
    pub investigate: HwAddr,
}

impl MonitorInvestigate {
    pub fn wire_len(haddr_len: usize) -> usize {
        MONITOR_PREFIX_LEN + 3 * haddr_len
    }

    fn decode_body(r: &mut Reader<'_>, kind: InvestigateKind) -> Result<Self, DecodeError> {
        let (sender_clock, src, dest, haddr_len) = decode_monitor_fields(r, 1)?;
        let investigate = r.hwaddr(haddr_len)?;
        Ok(Self {
            kind,
            sender_clock,
            src,
            dest,
            investigate,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let len = self.src.len();
        let mut w = Writer::with_header(self.kind.packet_type(), Self::wire_len(len));
        w.u8(len as u8).u8(0).i32_be(self.sender_clock);
        w.hwaddr(&self.src, len)?
            .hwaddr(&self.dest, len)?
            .hwaddr(&self.investigate, len)?;
        Ok(w.finish())
    }
}

/// Any decoded NWP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Announce(Announce),
    NeighborList(NeighborList),
    Monitor(Monitor),
    Investigate(MonitorInvestigate),
}

impl Packet {
    /// Decode one frame payload
    ///
    /// The slice length is the declared message length; nothing past it is
    /// ever read.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(frame);
        r.ensure(COMMON_HEADER_LEN)?;
        let version = r.u8()?;
        let packet_type = PacketType::try_from(r.u8()?)?;
        if version != NWP_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let packet = match packet_type {
            PacketType::Announcement => Self::Announce(Announce::decode_body(&mut r)?),
            PacketType::NeighborList => Self::NeighborList(NeighborList::decode_body(&mut r)?),
            PacketType::MonitorPing => {
                Self::Monitor(Monitor::decode_body(&mut r, MonitorKind::Ping)?)
            }
            PacketType::MonitorAck => Self::Monitor(Monitor::decode_body(&mut r, MonitorKind::Ack)?),
            PacketType::MonitorPingRequest => Self::Investigate(MonitorInvestigate::decode_body(
                &mut r,
                InvestigateKind::PingRequest,
            )?),
            PacketType::MonitorInvestigatePing => Self::Investigate(
                MonitorInvestigate::decode_body(&mut r, InvestigateKind::InvestigatePing)?,
            ),
        };
        r.finish()?;
        Ok(packet)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::Announce(p) => p.encode(),
            Self::NeighborList(p) => p.encode(),
            Self::Monitor(p) => p.encode(),
            Self::Investigate(p) => p.encode(),
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Announce(_) => PacketType::Announcement,
            Self::NeighborList(_) => PacketType::NeighborList,
            Self::Monitor(p) => p.kind.packet_type(),
            Self::Investigate(p) => p.kind.packet_type(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mac(last: u8) -> HwAddr {
        HwAddr::ethernet([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    fn sample_packets() -> Vec<Packet> {
        let short = |b: u8| HwAddr::from_slice(&[b, b]).unwrap();
        vec![
            Packet::Announce(Announce {
                hwaddr: mac(1),
                xids: vec![[0xad; XID_LEN]],
            }),
            Packet::Announce(Announce {
                hwaddr: short(3),
                xids: vec![],
            }),
            Packet::Announce(Announce {
                hwaddr: mac(1),
                xids: vec![[1; XID_LEN], [2; XID_LEN], [3; XID_LEN]],
            }),
            Packet::NeighborList(NeighborList {
                haddr_len: 6,
                neighbors: vec![
                    NeighborRecord {
                        xid: [4; XID_LEN],
                        hwaddrs: vec![mac(2)],
                    },
                    NeighborRecord {
                        xid: [5; XID_LEN],
                        hwaddrs: vec![mac(3), mac(4)],
                    },
                    NeighborRecord {
                        xid: [6; XID_LEN],
                        hwaddrs: vec![],
                    },
                ],
            }),
            Packet::NeighborList(NeighborList {
                haddr_len: 2,
                neighbors: vec![],
            }),
            Packet::Monitor(Monitor {
                kind: MonitorKind::Ping,
                sender_clock: 1_700_000_000,
                src: mac(1),
                dest: mac(2),
            }),
            Packet::Monitor(Monitor {
                kind: MonitorKind::Ack,
                sender_clock: -5,
                src: short(1),
                dest: short(2),
            }),
            Packet::Investigate(MonitorInvestigate {
                kind: InvestigateKind::PingRequest,
                sender_clock: 42,
                src: mac(1),
                dest: mac(2),
                investigate: mac(3),
            }),
            Packet::Investigate(MonitorInvestigate {
                kind: InvestigateKind::InvestigatePing,
                sender_clock: 43,
                src: mac(1),
                dest: mac(3),
                investigate: mac(3),
            }),
        ]
    }

    #[test]
    fn test_round_trip_all_kinds() {
        for packet in sample_packets() {
            let bytes = packet.encode().unwrap();
            assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_truncation_always_errors() {
        for packet in sample_packets() {
            let bytes = packet.encode().unwrap();
            for len in 0..bytes.len() {
                assert!(
                    Packet::decode(&bytes[..len]).is_err(),
                    "{:?} truncated to {} bytes decoded",
                    packet.packet_type(),
                    len
                );
            }
        }
    }

    #[test]
    fn test_announce_exact_size() {
        let ann = Announce {
            hwaddr: mac(9),
            xids: vec![[1; XID_LEN]],
        };
        let bytes = ann.encode().unwrap();
        assert_eq!(bytes.len(), Announce::wire_len(6, 1));
        assert_eq!(&bytes[..4], &[NWP_VERSION, 0x01, 1, 6]);
        assert_eq!(&bytes[4..10], mac(9).as_bytes());
    }

    #[test]
    fn test_announce_lying_count_rejected() {
        let mut bytes = Announce {
            hwaddr: mac(1),
            xids: vec![[1; XID_LEN]],
        }
        .encode()
        .unwrap();
        bytes[2] = 200;
        assert_eq!(
            Packet::decode(&bytes),
            Err(DecodeError::Truncated {
                needed: 6 + 200 * XID_LEN,
                remaining: 6 + XID_LEN,
            })
        );
    }

    #[test]
    fn test_neighbor_list_lying_record_count_rejected() {
        let mut bytes = NeighborList {
            haddr_len: 6,
            neighbors: vec![NeighborRecord {
                xid: [4; XID_LEN],
                hwaddrs: vec![mac(2)],
            }],
        }
        .encode()
        .unwrap();
        // per-record hardware address count
        bytes[4 + XID_LEN] = 40;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = Monitor {
            kind: MonitorKind::Ping,
            sender_clock: 1,
            src: mac(1),
            dest: mac(2),
        }
        .encode()
        .unwrap();
        bytes.push(0);
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn test_invalid_haddr_len_rejected() {
        let bytes = [NWP_VERSION, 0x03, 0, 0, 0, 0, 0, 1];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::InvalidHaddrLen(0)));

        let bytes = [NWP_VERSION, 0x01, 0, 9];
        assert_eq!(Packet::decode(&bytes), Err(DecodeError::InvalidHaddrLen(9)));
    }

    #[test]
    fn test_unknown_type_and_version() {
        assert_eq!(
            Packet::decode(&[NWP_VERSION, 0x7f]),
            Err(DecodeError::UnknownType(0x7f))
        );
        assert_eq!(
            Packet::decode(&[0x02, 0x01, 0, 6]),
            Err(DecodeError::UnsupportedVersion(0x02))
        );
    }

    #[test]
    fn test_monitor_clock_is_big_endian() {
        let bytes = Monitor {
            kind: MonitorKind::Ack,
            sender_clock: 0x01020304,
            src: mac(1),
            dest: mac(2),
        }
        .encode()
        .unwrap();
        assert_eq!(&bytes[..8], &[NWP_VERSION, 0x04, 6, 0, 1, 2, 3, 4]);
        assert_eq!(bytes.len(), Monitor::wire_len(6));
    }

    #[test]
    fn test_encode_rejects_oversized_and_mismatched() {
        let ann = Announce {
            hwaddr: mac(1),
            xids: vec![[0; XID_LEN]; 256],
        };
        assert!(matches!(
            ann.encode(),
            Err(EncodeError::TooMany { count: 256, .. })
        ));

        let ping = Monitor {
            kind: MonitorKind::Ping,
            sender_clock: 0,
            src: mac(1),
            dest: HwAddr::from_slice(&[1, 2]).unwrap(),
        };
        assert!(matches!(
            ping.encode(),
            Err(EncodeError::HaddrLenMismatch { expected: 6, .. })
        ));
    }
}
