//! Broker protocol message model.
//!
//! One outbound message exists per installation-controller edge, plus
//! nexthop registration and route redistribution. Inbound messages
//! carry resource lifecycle and installation outcomes.

use std::net::Ipv6Addr;

use crate::install::{ResourceEvent, RouteNotify, SidInstall, SidUninstall};

/// Message type codes.
pub mod msg_type {
    /// Install a local SID.
    pub const ADD_LOCALSID: u16 = 1;
    /// Remove a local SID.
    pub const DEL_LOCALSID: u16 = 2;
    /// Start tracking a nexthop.
    pub const NEXTHOP_REGISTER: u16 = 3;
    /// Stop tracking a nexthop.
    pub const NEXTHOP_UNREGISTER: u16 = 4;
    /// Install a route.
    pub const ROUTE_ADD: u16 = 5;
    /// Remove a route.
    pub const ROUTE_DELETE: u16 = 6;

    /// A VRF became active.
    pub const VRF_UP: u16 = 16;
    /// A VRF went away.
    pub const VRF_DOWN: u16 = 17;
    /// An interface came up.
    pub const INTERFACE_UP: u16 = 18;
    /// An interface went down.
    pub const INTERFACE_DOWN: u16 = 19;
    /// A tracked nexthop changed reachability.
    pub const NEXTHOP_UPDATE: u16 = 20;
    /// Outcome of a previous install or remove.
    pub const ROUTE_NOTIFY: u16 = 21;
}

/// Attribute codes, shared across message types.
pub mod attr {
    /// SID address (16 bytes).
    pub const SID_ADDR: u16 = 1;
    /// Outgoing interface index (u32).
    pub const OIF: u16 = 2;
    /// Behavior action code (u32).
    pub const ACTION: u16 = 3;
    /// IPv4 nexthop (4 bytes).
    pub const NH4: u16 = 4;
    /// IPv6 nexthop (16 bytes).
    pub const NH6: u16 = 5;
    /// Routing table id (u32).
    pub const TABLE: u16 = 6;
    /// Block length in bits (u8).
    pub const BLOCK_LEN: u16 = 7;
    /// Node length in bits (u8).
    pub const NODE_LEN: u16 = 8;
    /// Function length in bits (u8).
    pub const FUNC_LEN: u16 = 9;
    /// Argument length in bits (u8).
    pub const ARG_LEN: u16 = 10;
    /// Flavor operation bits (u32).
    pub const FLAVOR_OPS: u16 = 11;
    /// Flavor locator-block length (u8).
    pub const FLAVOR_LCBLOCK: u16 = 12;
    /// Flavor locator-node-function length (u8).
    pub const FLAVOR_LCNODE_FN: u16 = 13;
    /// VRF name (null-terminated string).
    pub const VRF_NAME: u16 = 14;
    /// Interface name (null-terminated string).
    pub const IF_NAME: u16 = 15;
    /// Interface index (u32).
    pub const IF_INDEX: u16 = 16;
    /// Loopback flag (u8).
    pub const LOOPBACK: u16 = 17;
    /// Nexthop resolved flag (u8).
    pub const RESOLVED: u16 = 18;
    /// Route prefix (16 bytes).
    pub const PREFIX: u16 = 19;
    /// Route prefix length (u8).
    pub const PREFIX_LEN: u16 = 20;
    /// ROUTE_NOTIFY outcome code (u8).
    pub const OUTCOME: u16 = 21;
    /// VPN SID carried by a route (16 bytes).
    pub const VPN_SID: u16 = 22;
    /// Encapsulation source address (16 bytes).
    pub const ENCAP_SRC: u16 = 23;
    /// Gateway address (16 bytes).
    pub const GATEWAY: u16 = 24;
    /// Route metric (u32).
    pub const METRIC: u16 = 25;
}

/// A route pushed to the broker, optionally carrying a VPN SID for
/// SRv6 encapsulation towards a remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteUpdate {
    /// Destination prefix.
    pub prefix: Ipv6Addr,
    /// Destination prefix length.
    pub prefix_len: u8,
    /// Gateway, when known.
    pub gateway: Option<Ipv6Addr>,
    /// Outgoing interface index.
    pub oif: Option<u32>,
    /// Metric.
    pub metric: Option<u32>,
    /// Routing table.
    pub table: Option<u32>,
    /// SID to encapsulate towards.
    pub vpn_sid: Option<Ipv6Addr>,
    /// Outer source address for the encapsulation.
    pub encap_src: Option<Ipv6Addr>,
}

/// Outbound daemon-to-broker messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerRequest {
    /// ADD_LOCALSID with the resolved context block.
    AddLocalSid(SidInstall),
    /// DEL_LOCALSID.
    DelLocalSid(SidUninstall),
    /// Track a nexthop.
    NexthopRegister {
        /// Nexthop address.
        addr: Ipv6Addr,
    },
    /// Stop tracking a nexthop.
    NexthopUnregister {
        /// Nexthop address.
        addr: Ipv6Addr,
    },
    /// Install a route.
    RouteAdd(RouteUpdate),
    /// Remove a route.
    RouteDelete(RouteUpdate),
}

/// Inbound broker-to-daemon messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Interface / VRF / nexthop lifecycle.
    Resource(ResourceEvent),
    /// Outcome of a previous install or remove, keyed by prefix.
    RouteNotify {
        /// Affected prefix (a SID for local-SID routes).
        prefix: Ipv6Addr,
        /// Prefix length.
        prefix_len: u8,
        /// Outcome code.
        outcome: RouteNotify,
    },
}
