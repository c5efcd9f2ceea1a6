//! Netlink wire structures and constants for the FPM mirror.
//!
//! Only the encode direction exists here: the FPM consumer never
//! talks back through this channel.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Message and attribute alignment.
pub const NL_ALIGNTO: usize = 4;

/// Align a length to the netlink boundary.
#[inline]
pub const fn nl_align(len: usize) -> usize {
    (len + NL_ALIGNTO - 1) & !(NL_ALIGNTO - 1)
}

/// Netlink message header (mirrors struct nlmsghdr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    /// Length of message including header.
    pub nlmsg_len: u32,
    /// Message type.
    pub nlmsg_type: u16,
    /// Flags.
    pub nlmsg_flags: u16,
    /// Sequence number.
    pub nlmsg_seq: u32,
    /// Sending port ID.
    pub nlmsg_pid: u32,
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = std::mem::size_of::<NlMsgHdr>();

/// Route message header (mirrors struct rtmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtMsg {
    /// Address family.
    pub rtm_family: u8,
    /// Destination prefix length.
    pub rtm_dst_len: u8,
    /// Source prefix length.
    pub rtm_src_len: u8,
    /// Type of service.
    pub rtm_tos: u8,
    /// Routing table, when it fits a byte.
    pub rtm_table: u8,
    /// Routing protocol.
    pub rtm_protocol: u8,
    /// Distance to destination.
    pub rtm_scope: u8,
    /// Route type.
    pub rtm_type: u8,
    /// Flags.
    pub rtm_flags: u32,
}

/// Size of the route message header.
pub const RTMSG_LEN: usize = std::mem::size_of::<RtMsg>();

/// Nexthop entry header inside RTA_MULTIPATH (mirrors struct rtnexthop).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtNextHop {
    /// Length of this entry including nested attributes.
    pub rtnh_len: u16,
    /// Nexthop flags.
    pub rtnh_flags: u8,
    /// Weight minus one.
    pub rtnh_hops: u8,
    /// Outgoing interface index.
    pub rtnh_ifindex: i32,
}

/// Size of the rtnexthop header.
pub const RTNH_LEN: usize = std::mem::size_of::<RtNextHop>();

/// Netlink message types mirrored to the FPM.
pub mod rtm {
    /// New or replaced route.
    pub const NEWROUTE: u16 = 24;
    /// Removed route.
    pub const DELROUTE: u16 = 25;
}

/// Netlink header flags.
pub mod nlm_flags {
    /// Request message.
    pub const REQUEST: u16 = 0x01;
    /// Create if it does not exist.
    pub const CREATE: u16 = 0x400;
}

/// Route attribute types (RTA_*).
pub mod rta {
    /// Destination prefix.
    pub const DST: u16 = 1;
    /// Source prefix.
    pub const SRC: u16 = 2;
    /// Outgoing interface.
    pub const OIF: u16 = 4;
    /// Gateway.
    pub const GATEWAY: u16 = 5;
    /// Metric.
    pub const PRIORITY: u16 = 6;
    /// Preferred source address.
    pub const PREFSRC: u16 = 7;
    /// Multipath nexthop list.
    pub const MULTIPATH: u16 = 9;
    /// Extended table id.
    pub const TABLE: u16 = 15;
    /// Lightweight tunnel encapsulation.
    pub const ENCAP: u16 = 22;
    /// Encapsulation type discriminator.
    pub const ENCAP_TYPE: u16 = 21;
}

/// ENCAP_TYPE discriminator values in the FPM namespace.
pub mod encap_type {
    /// No encapsulation.
    pub const NONE: u16 = 0;
    /// VxLAN.
    pub const VXLAN: u16 = 100;
    /// SRv6 route encapsulation (VPN SID).
    pub const SRV6_ROUTE: u16 = 101;
    /// SRv6 local SID.
    pub const SRV6_LOCAL_SID: u16 = 102;
}

/// Nested attribute codes inside the SRv6 local-SID encapsulation.
pub mod srv6_local_sid {
    /// Action code (u32).
    pub const ACTION: u16 = 1;
    /// IPv4 nexthop, for End.DX4.
    pub const NH4: u16 = 4;
    /// IPv6 nexthop, for End.X.
    pub const NH6: u16 = 5;
    /// VRF name, for table-lookup behaviors.
    pub const VRFNAME: u16 = 100;
    /// Block length in bits (u8).
    pub const BLOCK_LEN: u16 = 101;
    /// Node length in bits (u8).
    pub const NODE_LEN: u16 = 102;
    /// Function length in bits (u8).
    pub const FUNC_LEN: u16 = 103;
    /// Argument length in bits (u8).
    pub const ARG_LEN: u16 = 104;
}

/// Nested attribute codes inside the SRv6 route encapsulation.
pub mod srv6_route {
    /// VPN SID (16 bytes).
    pub const VPN_SID: u16 = 100;
    /// Outer encapsulation source address (16 bytes).
    pub const ENCAP_SRC_ADDR: u16 = 101;
}

/// Nested attribute codes inside the VxLAN encapsulation.
pub mod vxlan {
    /// VxLAN network identifier (u32).
    pub const VNI: u16 = 0;
}

/// Route header field values.
pub mod rt_fields {
    /// Unicast route.
    pub const RTN_UNICAST: u8 = 1;
    /// Global scope.
    pub const RT_SCOPE_UNIVERSE: u8 = 0;
    /// Main routing table.
    pub const RT_TABLE_MAIN: u8 = 254;
    /// Table id does not fit the inline byte.
    pub const RT_TABLE_UNSPEC: u8 = 0;
}
