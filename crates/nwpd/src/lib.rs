//! Neighbor Discovery and Liveness Monitoring for XIA
//!
//! This crate provides nwpd, the daemon that runs the XIA NWP protocol on
//! one Ethernet interface. It discovers XIA hosts on the link,
//! exchanges neighbor lists, installs identity and `ad` prefix routes into the
//! kernel XIA routing table, and detects dead neighbors with a ping/ack
//! monitor that asks other neighbors to investigate before a neighbor is
//! removed.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//!
//! This module implements the following security controls:
//!
//! | Control | Description | Implementation |
//! |---------|-------------|----------------|
//! | AC-3 | Access Enforcement | Raw packet and netlink sockets require CAP_NET_ADMIN |
//! | AU-3 | Content of Audit Records | Structured logging with neighbor details |
//! | AU-12 | Audit Record Generation | Neighbor additions and removals logged |
//! | CM-6 | Configuration Settings | TOML configuration with CLI overrides |
//! | CM-8 | System Component Inventory | Track link neighbors and their prefixes |
//! | IA-3 | Device Identification | Hardware address and XID identity |
//! | SC-5 | DoS Protection | Frames for other hosts discarded |
//! | SI-4 | System Monitoring | Periodic liveness probes |
//! | SI-10 | Input Validation | Bounds-checked packet decoding |
//! | SI-11 | Error Handling | Structured error types |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────────┐     ┌─────────────────┐
//! │  Ethernet link  │     │          nwpd            │     │  Linux Kernel   │
//! │                 │     │                          │     │                 │
//! │  NWP frames     │────▶│  PacketSocket            │     │  XIA routing    │
//! │  (0xC0DF)       │     │       │                  │     │  table          │
//! │                 │     │       ▼                  │     │                 │
//! │                 │     │  Nwpd ──▶ Discovery ─────┼────▶│  RTM_NEWROUTE   │
//! │                 │◀────│       └─▶ LivenessMonitor┼────▶│  RTM_DELROUTE   │
//! │                 │     │            │             │     │                 │
//! └─────────────────┘     │      NeighborTable       │     └─────────────────┘
//!                         └──────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod link;
pub mod metrics;
pub mod metrics_server;
pub mod monitor;
pub mod neighbor;
pub mod netlink;
pub mod principal;
pub mod routes;
pub mod timer;
pub mod turn;
pub mod types;
pub mod wire;

pub use config::{DEFAULT_CONFIG_FILE, NwpdConfig};
pub use context::{Context, LocalLink};
pub use daemon::Nwpd;
pub use discovery::Discovery;
pub use error::{NwpdError, Result};
pub use link::{FrameSink, PacketSocket, RecordingSink, SentFrame};
pub use metrics::MetricsCollector;
pub use monitor::LivenessMonitor;
pub use neighbor::{Liveness, Neighbor, NeighborState, NeighborTable};
pub use netlink::NetlinkRouteTable;
pub use principal::{DEFAULT_PRINCIPALS_FILE, PrincipalMap, PrincipalTypes};
pub use routes::{MemoryRouteTable, RouteEntry, RouteFilter, RouteTable, RouteTableId};
pub use timer::{TimerHandle, TimerId, TimerService};
pub use turn::{PrefixCounters, TurnTaking};
pub use types::{HwAddr, Xid, XidId, XidType};
pub use wire::{DecodeError, EncodeError, Packet, PacketType};
