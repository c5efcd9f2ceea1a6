//! Broker protocol wire codec.
//!
//! Frames are an 8-byte little-endian header followed by
//! 4-byte-aligned TLV attributes, all scalar fields little-endian.

use std::net::{Ipv4Addr, Ipv6Addr};

use winnow::binary::{le_u16, le_u32};
use winnow::prelude::*;
use winnow::token::take;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::install::{CsidFlavor, ResourceEvent, RouteNotify, SidInstall, SidUninstall};
use crate::sid::SidStructure;

use super::proto::{BrokerEvent, BrokerRequest, RouteUpdate, attr, msg_type};

type PResult<T> = winnow::ModalResult<T>;

/// Attribute alignment.
const ALIGNTO: usize = 4;

/// Attribute header size (u16 len + u16 type).
const ATTR_HDRLEN: usize = 4;

#[inline]
const fn align(len: usize) -> usize {
    (len + ALIGNTO - 1) & !(ALIGNTO - 1)
}

/// Frame header (mirrors the netlink shape: total length first).
/// Fields are stored little-endian regardless of host order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FrameHdr {
    /// Total frame length including this header.
    pub len: U32,
    /// Message type code.
    pub msg_type: U16,
    /// Reserved.
    pub flags: U16,
}

/// Size of the frame header.
pub const FRAME_HDRLEN: usize = std::mem::size_of::<FrameHdr>();

/// Builder for outbound broker frames.
#[derive(Debug)]
struct FrameBuilder {
    buf: Vec<u8>,
}

impl FrameBuilder {
    fn new(msg_type: u16) -> Self {
        let hdr = FrameHdr {
            len: U32::new(FRAME_HDRLEN as u32),
            msg_type: U16::new(msg_type),
            flags: U16::new(0),
        };
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(hdr.as_bytes());
        Self { buf }
    }

    fn attr(&mut self, attr_type: u16, data: &[u8]) -> &mut Self {
        let len = (ATTR_HDRLEN + data.len()) as u16;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(&attr_type.to_le_bytes());
        self.buf.extend_from_slice(data);
        self.buf.resize(align(self.buf.len()), 0);
        self
    }

    fn attr_u8(&mut self, attr_type: u16, value: u8) -> &mut Self {
        self.attr(attr_type, &[value])
    }

    fn attr_u32(&mut self, attr_type: u16, value: u32) -> &mut Self {
        self.attr(attr_type, &value.to_le_bytes())
    }

    fn attr_str(&mut self, attr_type: u16, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.attr(attr_type, &data)
    }

    fn finish(mut self) -> Vec<u8> {
        let len = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&len.to_le_bytes());
        self.buf
    }
}

/// Encode an outbound request.
pub fn encode_request(req: &BrokerRequest) -> Vec<u8> {
    match req {
        BrokerRequest::AddLocalSid(install) => encode_add_localsid(install),
        BrokerRequest::DelLocalSid(req) => {
            let mut b = FrameBuilder::new(msg_type::DEL_LOCALSID);
            b.attr(attr::SID_ADDR, &req.addr.octets())
                .attr_u32(attr::OIF, req.oif);
            b.finish()
        }
        BrokerRequest::NexthopRegister { addr } => {
            let mut b = FrameBuilder::new(msg_type::NEXTHOP_REGISTER);
            b.attr(attr::NH6, &addr.octets());
            b.finish()
        }
        BrokerRequest::NexthopUnregister { addr } => {
            let mut b = FrameBuilder::new(msg_type::NEXTHOP_UNREGISTER);
            b.attr(attr::NH6, &addr.octets());
            b.finish()
        }
        BrokerRequest::RouteAdd(route) => encode_route(msg_type::ROUTE_ADD, route),
        BrokerRequest::RouteDelete(route) => encode_route(msg_type::ROUTE_DELETE, route),
    }
}

fn encode_add_localsid(install: &SidInstall) -> Vec<u8> {
    let mut b = FrameBuilder::new(msg_type::ADD_LOCALSID);
    b.attr(attr::SID_ADDR, &install.addr.octets())
        .attr_u32(attr::OIF, install.oif)
        .attr_u32(attr::ACTION, install.action);
    if let Some(nh4) = install.nh4 {
        b.attr(attr::NH4, &nh4.octets());
    }
    if let Some(nh6) = install.nh6 {
        b.attr(attr::NH6, &nh6.octets());
    }
    if let Some(table) = install.table {
        b.attr_u32(attr::TABLE, table);
    }
    if let Some(s) = &install.structure {
        b.attr_u8(attr::BLOCK_LEN, s.block_len)
            .attr_u8(attr::NODE_LEN, s.node_len)
            .attr_u8(attr::FUNC_LEN, s.function_len)
            .attr_u8(attr::ARG_LEN, s.argument_len);
    }
    if let Some(flavor) = &install.flavor {
        b.attr_u32(attr::FLAVOR_OPS, flavor.ops)
            .attr_u8(attr::FLAVOR_LCBLOCK, flavor.lcblock_len)
            .attr_u8(attr::FLAVOR_LCNODE_FN, flavor.lcnode_fn_len);
    }
    b.finish()
}

fn encode_route(msg: u16, route: &RouteUpdate) -> Vec<u8> {
    let mut b = FrameBuilder::new(msg);
    b.attr(attr::PREFIX, &route.prefix.octets())
        .attr_u8(attr::PREFIX_LEN, route.prefix_len);
    if let Some(gw) = route.gateway {
        b.attr(attr::GATEWAY, &gw.octets());
    }
    if let Some(oif) = route.oif {
        b.attr_u32(attr::OIF, oif);
    }
    if let Some(metric) = route.metric {
        b.attr_u32(attr::METRIC, metric);
    }
    if let Some(table) = route.table {
        b.attr_u32(attr::TABLE, table);
    }
    if let Some(sid) = route.vpn_sid {
        b.attr(attr::VPN_SID, &sid.octets());
    }
    if let Some(src) = route.encap_src {
        b.attr(attr::ENCAP_SRC, &src.octets());
    }
    b.finish()
}

/// Encode an inbound event (the broker side of the socket).
pub fn encode_event(event: &BrokerEvent) -> Vec<u8> {
    match event {
        BrokerEvent::Resource(ResourceEvent::VrfUp {
            name,
            table_id,
            ifindex,
        }) => {
            let mut b = FrameBuilder::new(msg_type::VRF_UP);
            b.attr_str(attr::VRF_NAME, name)
                .attr_u32(attr::TABLE, *table_id)
                .attr_u32(attr::IF_INDEX, *ifindex);
            b.finish()
        }
        BrokerEvent::Resource(ResourceEvent::VrfDown { name }) => {
            let mut b = FrameBuilder::new(msg_type::VRF_DOWN);
            b.attr_str(attr::VRF_NAME, name);
            b.finish()
        }
        BrokerEvent::Resource(ResourceEvent::InterfaceUp {
            name,
            ifindex,
            loopback,
        }) => {
            let mut b = FrameBuilder::new(msg_type::INTERFACE_UP);
            b.attr_str(attr::IF_NAME, name)
                .attr_u32(attr::IF_INDEX, *ifindex)
                .attr_u8(attr::LOOPBACK, *loopback as u8);
            b.finish()
        }
        BrokerEvent::Resource(ResourceEvent::InterfaceDown { name }) => {
            let mut b = FrameBuilder::new(msg_type::INTERFACE_DOWN);
            b.attr_str(attr::IF_NAME, name);
            b.finish()
        }
        BrokerEvent::Resource(ResourceEvent::NexthopUpdate { addr, resolved }) => {
            let mut b = FrameBuilder::new(msg_type::NEXTHOP_UPDATE);
            b.attr(attr::NH6, &addr.octets())
                .attr_u8(attr::RESOLVED, *resolved as u8);
            b.finish()
        }
        BrokerEvent::RouteNotify {
            prefix,
            prefix_len,
            outcome,
        } => {
            let mut b = FrameBuilder::new(msg_type::ROUTE_NOTIFY);
            b.attr(attr::PREFIX, &prefix.octets())
                .attr_u8(attr::PREFIX_LEN, *prefix_len)
                .attr_u8(attr::OUTCOME, *outcome as u8);
            b.finish()
        }
    }
}

/// Raw attributes of one decoded frame.
#[derive(Debug, Default)]
struct Attrs {
    sid_addr: Option<Ipv6Addr>,
    oif: Option<u32>,
    action: Option<u32>,
    nh4: Option<Ipv4Addr>,
    nh6: Option<Ipv6Addr>,
    table: Option<u32>,
    block_len: Option<u8>,
    node_len: Option<u8>,
    func_len: Option<u8>,
    arg_len: Option<u8>,
    flavor_ops: Option<u32>,
    flavor_lcblock: Option<u8>,
    flavor_lcnode_fn: Option<u8>,
    vrf_name: Option<String>,
    if_name: Option<String>,
    if_index: Option<u32>,
    loopback: Option<bool>,
    resolved: Option<bool>,
    prefix: Option<Ipv6Addr>,
    prefix_len: Option<u8>,
    outcome: Option<u8>,
    vpn_sid: Option<Ipv6Addr>,
    encap_src: Option<Ipv6Addr>,
    gateway: Option<Ipv6Addr>,
    metric: Option<u32>,
}

fn parse_v6(data: &[u8]) -> Option<Ipv6Addr> {
    let bytes: [u8; 16] = data.get(..16)?.try_into().ok()?;
    Some(Ipv6Addr::from(bytes))
}

fn parse_v4(data: &[u8]) -> Option<Ipv4Addr> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(Ipv4Addr::from(bytes))
}

fn parse_u32(data: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

fn parse_string(data: &[u8]) -> Option<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    std::str::from_utf8(&data[..end]).ok().map(str::to_owned)
}

fn parse_attrs(input: &mut &[u8]) -> PResult<Attrs> {
    let mut attrs = Attrs::default();
    while input.len() >= ATTR_HDRLEN {
        let len = le_u16.parse_next(input)? as usize;
        let attr_type = le_u16.parse_next(input)?;
        if len < ATTR_HDRLEN {
            break;
        }
        let payload_len = len - ATTR_HDRLEN;
        if input.len() < payload_len {
            break;
        }
        let data: &[u8] = take(payload_len).parse_next(input)?;
        let padding = align(len) - len;
        if input.len() >= padding {
            let _: &[u8] = take(padding).parse_next(input)?;
        }

        match attr_type {
            attr::SID_ADDR => attrs.sid_addr = parse_v6(data),
            attr::OIF => attrs.oif = parse_u32(data),
            attr::ACTION => attrs.action = parse_u32(data),
            attr::NH4 => attrs.nh4 = parse_v4(data),
            attr::NH6 => attrs.nh6 = parse_v6(data),
            attr::TABLE => attrs.table = parse_u32(data),
            attr::BLOCK_LEN => attrs.block_len = data.first().copied(),
            attr::NODE_LEN => attrs.node_len = data.first().copied(),
            attr::FUNC_LEN => attrs.func_len = data.first().copied(),
            attr::ARG_LEN => attrs.arg_len = data.first().copied(),
            attr::FLAVOR_OPS => attrs.flavor_ops = parse_u32(data),
            attr::FLAVOR_LCBLOCK => attrs.flavor_lcblock = data.first().copied(),
            attr::FLAVOR_LCNODE_FN => attrs.flavor_lcnode_fn = data.first().copied(),
            attr::VRF_NAME => attrs.vrf_name = parse_string(data),
            attr::IF_NAME => attrs.if_name = parse_string(data),
            attr::IF_INDEX => attrs.if_index = parse_u32(data),
            attr::LOOPBACK => attrs.loopback = data.first().map(|&b| b != 0),
            attr::RESOLVED => attrs.resolved = data.first().map(|&b| b != 0),
            attr::PREFIX => attrs.prefix = parse_v6(data),
            attr::PREFIX_LEN => attrs.prefix_len = data.first().copied(),
            attr::OUTCOME => attrs.outcome = data.first().copied(),
            attr::VPN_SID => attrs.vpn_sid = parse_v6(data),
            attr::ENCAP_SRC => attrs.encap_src = parse_v6(data),
            attr::GATEWAY => attrs.gateway = parse_v6(data),
            attr::METRIC => attrs.metric = parse_u32(data),
            _ => {} // Unknown attributes are skipped.
        }
    }
    Ok(attrs)
}

fn parse_frame(input: &mut &[u8]) -> PResult<(u16, Attrs)> {
    let _len = le_u32.parse_next(input)?;
    let msg = le_u16.parse_next(input)?;
    let _flags = le_u16.parse_next(input)?;
    let attrs = parse_attrs(input)?;
    Ok((msg, attrs))
}

fn required<T>(value: Option<T>, what: &str, msg: u16) -> Result<T> {
    value.ok_or_else(|| Error::Decode(format!("message {} without {}", msg, what)))
}

/// Total length of the frame starting at `buf`, once the header is
/// complete. Used by socket readers to delimit frames.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HDRLEN {
        return None;
    }
    let len = u32::from_le_bytes(buf[..4].try_into().ok()?) as usize;
    Some(len)
}

/// Decode a complete frame into an inbound event.
pub fn decode_event(frame: &[u8]) -> Result<BrokerEvent> {
    let mut input = frame;
    let (msg, attrs) =
        parse_frame(&mut input).map_err(|e| Error::Decode(format!("malformed frame: {}", e)))?;

    let event = match msg {
        msg_type::VRF_UP => BrokerEvent::Resource(ResourceEvent::VrfUp {
            name: required(attrs.vrf_name, "VRF_NAME", msg)?,
            table_id: required(attrs.table, "TABLE", msg)?,
            ifindex: attrs.if_index.unwrap_or(0),
        }),
        msg_type::VRF_DOWN => BrokerEvent::Resource(ResourceEvent::VrfDown {
            name: required(attrs.vrf_name, "VRF_NAME", msg)?,
        }),
        msg_type::INTERFACE_UP => BrokerEvent::Resource(ResourceEvent::InterfaceUp {
            name: required(attrs.if_name, "IF_NAME", msg)?,
            ifindex: required(attrs.if_index, "IF_INDEX", msg)?,
            loopback: attrs.loopback.unwrap_or(false),
        }),
        msg_type::INTERFACE_DOWN => BrokerEvent::Resource(ResourceEvent::InterfaceDown {
            name: required(attrs.if_name, "IF_NAME", msg)?,
        }),
        msg_type::NEXTHOP_UPDATE => BrokerEvent::Resource(ResourceEvent::NexthopUpdate {
            addr: required(attrs.nh6, "NH6", msg)?,
            resolved: attrs.resolved.unwrap_or(false),
        }),
        msg_type::ROUTE_NOTIFY => BrokerEvent::RouteNotify {
            prefix: required(attrs.prefix, "PREFIX", msg)?,
            prefix_len: attrs.prefix_len.unwrap_or(128),
            outcome: RouteNotify::from_code(required(attrs.outcome, "OUTCOME", msg)?)
                .ok_or_else(|| Error::Decode("unknown ROUTE_NOTIFY outcome".into()))?,
        },
        other => return Err(Error::Decode(format!("unexpected message type {}", other))),
    };
    Ok(event)
}

/// Decode a complete frame into an outbound request (the broker side
/// of the socket).
pub fn decode_request(frame: &[u8]) -> Result<BrokerRequest> {
    let mut input = frame;
    let (msg, attrs) =
        parse_frame(&mut input).map_err(|e| Error::Decode(format!("malformed frame: {}", e)))?;

    let req = match msg {
        msg_type::ADD_LOCALSID => {
            let structure = match (attrs.block_len, attrs.node_len, attrs.func_len) {
                (Some(block), Some(node), Some(func)) => Some(SidStructure {
                    block_len: block,
                    node_len: node,
                    function_len: func,
                    argument_len: attrs.arg_len.unwrap_or(0),
                }),
                _ => None,
            };
            let flavor = attrs.flavor_ops.map(|ops| CsidFlavor {
                ops,
                lcblock_len: attrs.flavor_lcblock.unwrap_or(0),
                lcnode_fn_len: attrs.flavor_lcnode_fn.unwrap_or(0),
            });
            BrokerRequest::AddLocalSid(SidInstall {
                addr: required(attrs.sid_addr, "SID_ADDR", msg)?,
                oif: required(attrs.oif, "OIF", msg)?,
                action: required(attrs.action, "ACTION", msg)?,
                nh4: attrs.nh4,
                nh6: attrs.nh6,
                table: attrs.table,
                flavor,
                structure,
            })
        }
        msg_type::DEL_LOCALSID => BrokerRequest::DelLocalSid(SidUninstall {
            addr: required(attrs.sid_addr, "SID_ADDR", msg)?,
            oif: required(attrs.oif, "OIF", msg)?,
        }),
        msg_type::NEXTHOP_REGISTER => BrokerRequest::NexthopRegister {
            addr: required(attrs.nh6, "NH6", msg)?,
        },
        msg_type::NEXTHOP_UNREGISTER => BrokerRequest::NexthopUnregister {
            addr: required(attrs.nh6, "NH6", msg)?,
        },
        msg_type::ROUTE_ADD | msg_type::ROUTE_DELETE => {
            let route = RouteUpdate {
                prefix: required(attrs.prefix, "PREFIX", msg)?,
                prefix_len: attrs.prefix_len.unwrap_or(128),
                gateway: attrs.gateway,
                oif: attrs.oif,
                metric: attrs.metric,
                table: attrs.table,
                vpn_sid: attrs.vpn_sid,
                encap_src: attrs.encap_src,
            };
            if msg == msg_type::ROUTE_ADD {
                BrokerRequest::RouteAdd(route)
            } else {
                BrokerRequest::RouteDelete(route)
            }
        }
        other => return Err(Error::Decode(format!("unexpected message type {}", other))),
    };
    Ok(req)
}
