//! Link-layer socket carrying NWP frames
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Frames are filtered by EtherType in the kernel
//! - AC-3: Access Enforcement - Opening a packet socket requires CAP_NET_RAW
//!
//! The socket is datagram-mode, so the kernel strips and builds the Ethernet
//! header; frames handed to the codec start at the NWP common header.

use crate::error::{NwpdError, Result};
use crate::types::HwAddr;
use crate::wire::{DecodeError, Packet};
use parking_lot::Mutex;

/// Outgoing frame path
pub trait FrameSink: Send + Sync {
    /// Unicast `frame` to one hardware address
    fn send_to(&self, dest: &HwAddr, frame: &[u8]) -> Result<()>;

    /// Broadcast `frame` on the link
    fn broadcast(&self, frame: &[u8]) -> Result<()>;
}

/// A frame captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    /// `None` for broadcasts
    pub dest: Option<HwAddr>,
    pub bytes: Vec<u8>,
}

impl SentFrame {
    pub fn decode(&self) -> std::result::Result<Packet, DecodeError> {
        Packet::decode(&self.bytes)
    }
}

/// Frame sink that records instead of transmitting
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<SentFrame>>,
    failing: Mutex<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Drain the captured frames
    pub fn take(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Drain and decode the captured frames
    pub fn take_packets(&self) -> Vec<(Option<HwAddr>, Packet)> {
        self.take()
            .into_iter()
            .filter_map(|f| f.decode().ok().map(|p| (f.dest, p)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    fn record(&self, dest: Option<HwAddr>, frame: &[u8]) -> Result<()> {
        if *self.failing.lock() {
            return Err(NwpdError::Socket("send disabled".into()));
        }
        self.frames.lock().push(SentFrame {
            dest,
            bytes: frame.to_vec(),
        });
        Ok(())
    }
}

impl FrameSink for RecordingSink {
    fn send_to(&self, dest: &HwAddr, frame: &[u8]) -> Result<()> {
        self.record(Some(*dest), frame)
    }

    fn broadcast(&self, frame: &[u8]) -> Result<()> {
        self.record(None, frame)
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use super::FrameSink;
    use crate::error::{NwpdError, Result};
    use crate::types::{HwAddr, MAX_HADDR_LEN};
    use crate::wire::ETH_P_NWP;
    use std::io;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use tokio::io::unix::AsyncFd;
    use tracing::{debug, info, instrument, trace};

    const IFNAMSIZ: usize = 16;

    /// `struct ifreq` restricted to the hardware-address member
    #[repr(C)]
    struct IfreqHwaddr {
        ifr_name: [libc::c_char; IFNAMSIZ],
        ifr_hwaddr: libc::sockaddr,
        _pad: [u8; 8],
    }

    /// Datagram packet socket bound to one interface
    ///
    /// # NIST Controls
    /// - SC-7: Boundary Protection - Bound to a single interface
    pub struct PacketSocket {
        fd: AsyncFd<OwnedFd>,
        interface: String,
        ifindex: u32,
        hwaddr: HwAddr,
    }

    impl PacketSocket {
        /// Open the NWP socket on `interface` and enable promiscuous mode
        ///
        /// Must be called from within a tokio runtime.
        #[instrument]
        pub fn open(interface: &str) -> Result<Self> {
            let ifindex = nix::net::if_::if_nametoindex(interface).map_err(|e| {
                NwpdError::Interface {
                    name: interface.to_string(),
                    reason: e.to_string(),
                }
            })?;

            let raw = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                    (ETH_P_NWP.to_be()) as libc::c_int,
                )
            };
            if raw < 0 {
                return Err(NwpdError::Socket(format!(
                    "Failed to open packet socket: {}",
                    io::Error::last_os_error()
                )));
            }
            let owned = unsafe { OwnedFd::from_raw_fd(raw) };

            let hwaddr = read_hwaddr(owned.as_raw_fd(), interface)?;
            bind(owned.as_raw_fd(), ifindex)?;
            enable_promiscuous(owned.as_raw_fd(), ifindex)?;

            let fd = AsyncFd::new(owned)
                .map_err(|e| NwpdError::Socket(format!("Failed to register socket: {}", e)))?;

            info!(interface, ifindex, hwaddr = %hwaddr, "Opened NWP packet socket");
            Ok(Self {
                fd,
                interface: interface.to_string(),
                ifindex,
                hwaddr,
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }

        pub fn ifindex(&self) -> u32 {
            self.ifindex
        }

        pub fn hwaddr(&self) -> HwAddr {
            self.hwaddr
        }

        /// Receive one inbound frame and its sender's hardware address
        ///
        /// Frames this host transmitted itself are skipped.
        pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, HwAddr)> {
            loop {
                let mut guard = self.fd.readable().await?;
                let received = guard.try_io(|fd| recv_from(fd.as_raw_fd(), buf));
                match received {
                    Ok(Ok((_, addr))) if addr.sll_pkttype == libc::PACKET_OUTGOING as u8 => {
                        trace!("Skipping own outgoing frame");
                    }
                    Ok(Ok((len, addr))) => {
                        let halen = (addr.sll_halen as usize).min(MAX_HADDR_LEN);
                        let sender = HwAddr::from_slice(&addr.sll_addr[..halen]).ok_or_else(|| {
                            NwpdError::Socket("frame without sender address".into())
                        })?;
                        return Ok((len, sender));
                    }
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_would_block) => continue,
                }
            }
        }

        fn send_frame(&self, dest: &HwAddr, frame: &[u8]) -> Result<()> {
            let mut addr = sockaddr_ll(self.ifindex);
            addr.sll_halen = dest.len() as u8;
            addr.sll_addr[..dest.len()].copy_from_slice(dest.as_bytes());

            let sent = unsafe {
                libc::sendto(
                    self.fd.as_raw_fd(),
                    frame.as_ptr() as *const libc::c_void,
                    frame.len(),
                    0,
                    &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if sent < 0 {
                return Err(NwpdError::Socket(format!(
                    "sendto {} failed: {}",
                    dest,
                    io::Error::last_os_error()
                )));
            }
            trace!(dest = %dest, len = frame.len(), "Sent frame");
            Ok(())
        }
    }

    impl FrameSink for PacketSocket {
        fn send_to(&self, dest: &HwAddr, frame: &[u8]) -> Result<()> {
            self.send_frame(dest, frame)
        }

        fn broadcast(&self, frame: &[u8]) -> Result<()> {
            let dest = HwAddr::broadcast(self.hwaddr.len())
                .ok_or_else(|| NwpdError::Socket("no broadcast address".into()))?;
            self.send_frame(&dest, frame)
        }
    }

    fn sockaddr_ll(ifindex: u32) -> libc::sockaddr_ll {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = ETH_P_NWP.to_be();
        addr.sll_ifindex = ifindex as libc::c_int;
        addr
    }

    /// Hardware address length for an ARP hardware type, `None` when the
    /// type is not carried over NWP
    fn hwaddr_len(arphrd: u16) -> Option<usize> {
        match arphrd {
            libc::ARPHRD_ETHER | libc::ARPHRD_IEEE802 => Some(6),
            _ => None,
        }
    }

    fn read_hwaddr(fd: RawFd, interface: &str) -> Result<HwAddr> {
        let name = interface.as_bytes();
        if name.len() >= IFNAMSIZ {
            return Err(NwpdError::Interface {
                name: interface.to_string(),
                reason: "name too long".into(),
            });
        }

        let mut req: IfreqHwaddr = unsafe { mem::zeroed() };
        for (dst, src) in req.ifr_name.iter_mut().zip(name) {
            *dst = *src as libc::c_char;
        }
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR as _, &mut req as *mut IfreqHwaddr) };
        if ret < 0 {
            return Err(NwpdError::Interface {
                name: interface.to_string(),
                reason: format!("SIOCGIFHWADDR: {}", io::Error::last_os_error()),
            });
        }

        let arphrd = req.ifr_hwaddr.sa_family;
        let len = hwaddr_len(arphrd).ok_or_else(|| NwpdError::Interface {
            name: interface.to_string(),
            reason: format!("unsupported hardware type {}", arphrd),
        })?;
        let bytes: Vec<u8> = req.ifr_hwaddr.sa_data[..len].iter().map(|b| *b as u8).collect();
        let hwaddr = HwAddr::from_slice(&bytes).ok_or_else(|| NwpdError::Interface {
            name: interface.to_string(),
            reason: "no hardware address".into(),
        })?;
        debug!(interface, hwaddr = %hwaddr, "Read interface hardware address");
        Ok(hwaddr)
    }

    fn bind(fd: RawFd, ifindex: u32) -> Result<()> {
        let addr = sockaddr_ll(ifindex);
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NwpdError::Socket(format!(
                "Failed to bind packet socket: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    fn enable_promiscuous(fd: RawFd, ifindex: u32) -> Result<()> {
        let mut mreq: libc::packet_mreq = unsafe { mem::zeroed() };
        mreq.mr_ifindex = ifindex as libc::c_int;
        mreq.mr_type = libc::PACKET_MR_PROMISC as libc::c_ushort;
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                libc::PACKET_ADD_MEMBERSHIP,
                &mreq as *const libc::packet_mreq as *const libc::c_void,
                mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NwpdError::Socket(format!(
                "Failed to enable promiscuous mode: {}",
                io::Error::last_os_error()
            )));
        }
        debug!(ifindex, "Promiscuous mode enabled");
        Ok(())
    }

    fn recv_from(fd: RawFd, buf: &mut [u8]) -> io::Result<(usize, libc::sockaddr_ll)> {
        let mut addr: libc::sockaddr_ll = unsafe { mem::zeroed() };
        let mut addr_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
        let n = unsafe {
            libc::recvfrom(
                fd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((n as usize, addr))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_hwaddr_len_for_ethernet_types() {
            assert_eq!(hwaddr_len(libc::ARPHRD_ETHER), Some(6));
            assert_eq!(hwaddr_len(libc::ARPHRD_IEEE802), Some(6));
        }

        #[test]
        fn test_hwaddr_len_rejects_other_types() {
            assert_eq!(hwaddr_len(libc::ARPHRD_LOOPBACK), None);
            assert_eq!(hwaddr_len(libc::ARPHRD_NONE), None);
            assert_eq!(hwaddr_len(libc::ARPHRD_INFINIBAND), None);
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod mock {
    use super::FrameSink;
    use crate::error::{NwpdError, Result};
    use crate::types::HwAddr;

    pub struct PacketSocket;

    impl PacketSocket {
        pub fn open(interface: &str) -> Result<Self> {
            Err(NwpdError::Interface {
                name: interface.to_string(),
                reason: "packet sockets require Linux".into(),
            })
        }

        pub fn interface(&self) -> &str {
            ""
        }

        pub fn ifindex(&self) -> u32 {
            0
        }

        pub fn hwaddr(&self) -> HwAddr {
            HwAddr::ethernet([0; 6])
        }

        pub async fn recv(&self, _buf: &mut [u8]) -> Result<(usize, HwAddr)> {
            std::future::pending().await
        }
    }

    impl FrameSink for PacketSocket {
        fn send_to(&self, _dest: &HwAddr, _frame: &[u8]) -> Result<()> {
            Ok(())
        }

        fn broadcast(&self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub use mock::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Monitor, MonitorKind};

    #[test]
    fn test_recording_sink_captures_frames() {
        let sink = RecordingSink::new();
        let dest = HwAddr::ethernet([2, 0, 0, 0, 0, 9]);
        let ping = Packet::Monitor(Monitor {
            kind: MonitorKind::Ping,
            sender_clock: 5,
            src: HwAddr::ethernet([2, 0, 0, 0, 0, 1]),
            dest,
        });
        sink.send_to(&dest, &ping.encode().unwrap()).unwrap();
        sink.broadcast(&[0xff]).unwrap();
        assert_eq!(sink.len(), 2);

        let packets = sink.take_packets();
        assert_eq!(packets, vec![(Some(dest), ping)]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_recording_sink_failure_mode() {
        let sink = RecordingSink::new();
        sink.set_failing(true);
        assert!(sink.broadcast(&[1, 2]).is_err());
        assert!(sink.is_empty());
    }
}
