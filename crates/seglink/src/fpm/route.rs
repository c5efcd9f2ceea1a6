//! RTM_NEWROUTE / RTM_DELROUTE encoding for the FPM mirror.
//!
//! SRv6 encapsulations are single-nexthop in this encoder; multipath
//! messages carry VxLAN-style encapsulations only.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::sid::SidStructure;

use super::frame::FrameWriter;
use super::netlink::{
    RTNH_LEN, RtMsg, RtNextHop, encap_type, nlm_flags, rt_fields, rta, rtm, srv6_local_sid,
    srv6_route, vxlan,
};

/// SRv6 local-SID encapsulation carried on a mirrored route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSidEncap {
    /// Behavior action code (uN/uA already resolved to End/End.X).
    pub action: u32,
    /// SID bit-field structure.
    pub structure: SidStructure,
    /// IPv6 nexthop, for End.X.
    pub nh6: Option<Ipv6Addr>,
    /// IPv4 nexthop, for End.DX4.
    pub nh4: Option<Ipv4Addr>,
    /// VRF name, for table-lookup behaviors.
    pub vrf_name: Option<String>,
}

/// Route encapsulation variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FpmEncap {
    /// Local SID endpoint behavior (ENCAP_TYPE 102).
    LocalSid(LocalSidEncap),
    /// SRv6 route towards a remote VPN SID (ENCAP_TYPE 101).
    Vpn {
        /// The VPN SID (16 bytes).
        vpn_sid: Ipv6Addr,
        /// Outer encapsulation source address (16 bytes).
        src_addr: Ipv6Addr,
    },
}

/// One nexthop of a mirrored route.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FpmNextHop {
    /// Gateway address.
    pub gateway: Option<IpAddr>,
    /// Outgoing interface index.
    pub ifindex: u32,
    /// ECMP weight (1-256).
    pub weight: u8,
    /// VxLAN network identifier, for VxLAN-encapsulated nexthops.
    pub vni: Option<u32>,
}

impl FpmNextHop {
    /// Nexthop via an interface only.
    pub fn dev(ifindex: u32) -> Self {
        Self {
            ifindex,
            weight: 1,
            ..Default::default()
        }
    }

    /// Nexthop via a gateway and interface.
    pub fn via(gateway: IpAddr, ifindex: u32) -> Self {
        Self {
            gateway: Some(gateway),
            ifindex,
            weight: 1,
            vni: None,
        }
    }
}

/// A route to mirror to the FPM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FpmRoute {
    /// Destination prefix.
    pub dest: IpAddr,
    /// Destination prefix length.
    pub dest_len: u8,
    /// Source prefix, when the route is source-specific.
    pub src: Option<(IpAddr, u8)>,
    /// Routing table id. Inline in the header when it fits a byte,
    /// an extended attribute otherwise.
    pub table: u32,
    /// Originating protocol.
    pub protocol: u8,
    /// Metric.
    pub metric: Option<u32>,
    /// Preferred source address.
    pub prefsrc: Option<IpAddr>,
    /// Nexthops: one entry encodes inline, several become MULTIPATH.
    pub nexthops: Vec<FpmNextHop>,
    /// Route-level encapsulation.
    pub encap: Option<FpmEncap>,
}

impl FpmRoute {
    /// Route skeleton with a main-table unicast destination.
    pub fn new(dest: IpAddr, dest_len: u8, protocol: u8) -> Self {
        Self {
            dest,
            dest_len,
            src: None,
            table: rt_fields::RT_TABLE_MAIN as u32,
            protocol,
            metric: None,
            prefsrc: None,
            nexthops: Vec::new(),
            encap: None,
        }
    }

    fn family(&self) -> u8 {
        match self.dest {
            IpAddr::V4(_) => libc::AF_INET as u8,
            IpAddr::V6(_) => libc::AF_INET6 as u8,
        }
    }

    fn check(&self) -> Result<()> {
        // Route-level encapsulations are SRv6 and single-nexthop;
        // multipath carries VxLAN per nexthop entry instead.
        if self.encap.is_some() && self.nexthops.len() > 1 {
            return Err(Error::config(
                "SRv6 encapsulations are single-nexthop in the FPM mirror",
            ));
        }
        Ok(())
    }

    /// Encode an RTM_NEWROUTE into `buf`. Returns bytes written.
    pub fn encode_newroute(&self, buf: &mut [u8]) -> Result<usize> {
        self.check()?;
        let mut w = FrameWriter::new(buf, rtm::NEWROUTE, nlm_flags::REQUEST | nlm_flags::CREATE)?;
        self.write_header(&mut w)?;
        self.write_prefix_attrs(&mut w)?;

        if self.nexthops.len() > 1 {
            self.write_multipath(&mut w)?;
        } else {
            if let Some(encap) = &self.encap {
                write_encap(&mut w, encap)?;
            }
            if let Some(nh) = self.nexthops.first() {
                if let Some(gw) = nh.gateway {
                    put_addr(&mut w, rta::GATEWAY, gw)?;
                }
                if nh.ifindex != 0 {
                    w.put_attr_u32(rta::OIF, nh.ifindex)?;
                }
            }
        }
        Ok(w.finish())
    }

    /// Encode an RTM_DELROUTE into `buf`: the route key only
    /// (destination, source, table). Returns bytes written.
    pub fn encode_delroute(&self, buf: &mut [u8]) -> Result<usize> {
        let mut w = FrameWriter::new(buf, rtm::DELROUTE, nlm_flags::REQUEST)?;
        self.write_header(&mut w)?;
        self.write_prefix_attrs(&mut w)?;
        Ok(w.finish())
    }

    fn write_header(&self, w: &mut FrameWriter<'_>) -> Result<()> {
        let rtmsg = RtMsg {
            rtm_family: self.family(),
            rtm_dst_len: self.dest_len,
            rtm_src_len: self.src.map(|(_, len)| len).unwrap_or(0),
            rtm_tos: 0,
            rtm_table: if self.table <= 255 {
                self.table as u8
            } else {
                rt_fields::RT_TABLE_UNSPEC
            },
            rtm_protocol: self.protocol,
            rtm_scope: rt_fields::RT_SCOPE_UNIVERSE,
            rtm_type: rt_fields::RTN_UNICAST,
            rtm_flags: 0,
        };
        w.put_struct(&rtmsg)
    }

    fn write_prefix_attrs(&self, w: &mut FrameWriter<'_>) -> Result<()> {
        put_addr(w, rta::DST, self.dest)?;
        if let Some((src, _)) = self.src {
            put_addr(w, rta::SRC, src)?;
        }
        if self.table > 255 {
            w.put_attr_u32(rta::TABLE, self.table)?;
        }
        if let Some(metric) = self.metric {
            w.put_attr_u32(rta::PRIORITY, metric)?;
        }
        if let Some(prefsrc) = self.prefsrc {
            put_addr(w, rta::PREFSRC, prefsrc)?;
        }
        Ok(())
    }

    fn write_multipath(&self, w: &mut FrameWriter<'_>) -> Result<()> {
        // RTA_MULTIPATH is a flat attribute whose payload is the
        // rtnexthop sequence; unlike the encap nests it carries no
        // NESTED flag.
        let mp = w.region_start();
        w.put_attr(rta::MULTIPATH, &[])?;
        for nh in &self.nexthops {
            let entry = w.region_start();
            w.put_struct(&RtNextHop {
                rtnh_len: RTNH_LEN as u16,
                rtnh_flags: 0,
                rtnh_hops: nh.weight.saturating_sub(1),
                rtnh_ifindex: nh.ifindex as i32,
            })?;
            if let Some(gw) = nh.gateway {
                put_addr(w, rta::GATEWAY, gw)?;
            }
            if let Some(vni) = nh.vni {
                w.put_attr_u16(rta::ENCAP_TYPE, encap_type::VXLAN)?;
                let nest = w.nest_start(rta::ENCAP)?;
                w.put_attr_u32(vxlan::VNI, vni)?;
                w.nest_end(nest);
            }
            w.region_end(entry);
        }
        w.region_end(mp);
        Ok(())
    }
}

fn put_addr(w: &mut FrameWriter<'_>, attr_type: u16, addr: IpAddr) -> Result<()> {
    match addr {
        IpAddr::V4(v4) => w.put_attr(attr_type, &v4.octets()),
        IpAddr::V6(v6) => w.put_attr(attr_type, &v6.octets()),
    }
}

fn write_encap(w: &mut FrameWriter<'_>, encap: &FpmEncap) -> Result<()> {
    match encap {
        FpmEncap::LocalSid(local) => {
            w.put_attr_u16(rta::ENCAP_TYPE, encap_type::SRV6_LOCAL_SID)?;
            let nest = w.nest_start(rta::ENCAP)?;
            let s = &local.structure;
            w.put_attr_u8(srv6_local_sid::BLOCK_LEN, s.block_len)?;
            w.put_attr_u8(srv6_local_sid::NODE_LEN, s.node_len)?;
            w.put_attr_u8(srv6_local_sid::FUNC_LEN, s.function_len)?;
            w.put_attr_u8(srv6_local_sid::ARG_LEN, s.argument_len)?;
            w.put_attr_u32(srv6_local_sid::ACTION, local.action)?;
            if let Some(nh6) = local.nh6 {
                w.put_attr(srv6_local_sid::NH6, &nh6.octets())?;
            } else if let Some(nh4) = local.nh4 {
                w.put_attr(srv6_local_sid::NH4, &nh4.octets())?;
            } else if let Some(vrf) = &local.vrf_name {
                w.put_attr_str(srv6_local_sid::VRFNAME, vrf)?;
            }
            w.nest_end(nest);
        }
        FpmEncap::Vpn { vpn_sid, src_addr } => {
            w.put_attr_u16(rta::ENCAP_TYPE, encap_type::SRV6_ROUTE)?;
            let nest = w.nest_start(rta::ENCAP)?;
            w.put_attr(srv6_route::VPN_SID, &vpn_sid.octets())?;
            w.put_attr(srv6_route::ENCAP_SRC_ADDR, &src_addr.octets())?;
            w.nest_end(nest);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fpm::netlink::{NLMSG_HDRLEN, RTMSG_LEN};

    /// Minimal TLV walk over an encoded frame, for assertions.
    fn attrs(frame: &[u8]) -> Vec<(u16, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = &frame[NLMSG_HDRLEN + RTMSG_LEN..];
        while rest.len() >= 4 {
            let len = u16::from_ne_bytes(rest[0..2].try_into().unwrap()) as usize;
            let attr_type = u16::from_ne_bytes(rest[2..4].try_into().unwrap()) & 0x7fff;
            if len < 4 || len > rest.len() {
                break;
            }
            out.push((attr_type, rest[4..len].to_vec()));
            let advance = (len + 3) & !3;
            rest = if advance >= rest.len() {
                &[]
            } else {
                &rest[advance..]
            };
        }
        out
    }

    fn nested(payload: &[u8]) -> Vec<(u16, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = payload;
        while rest.len() >= 4 {
            let len = u16::from_ne_bytes(rest[0..2].try_into().unwrap()) as usize;
            let attr_type = u16::from_ne_bytes(rest[2..4].try_into().unwrap()) & 0x7fff;
            if len < 4 || len > rest.len() {
                break;
            }
            out.push((attr_type, rest[4..len].to_vec()));
            let advance = (len + 3) & !3;
            rest = if advance >= rest.len() {
                &[]
            } else {
                &rest[advance..]
            };
        }
        out
    }

    fn v6(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_local_sid_encap_frame() {
        // Single-nexthop route with End.DT6 local-SID encap.
        let mut route = FpmRoute::new(IpAddr::V6(v6("2001::")), 64, 11);
        route.nexthops.push(FpmNextHop::dev(3));
        route.encap = Some(FpmEncap::LocalSid(LocalSidEncap {
            action: 7,
            structure: SidStructure::new(40, 24, 16, 0).unwrap(),
            nh6: None,
            nh4: None,
            vrf_name: Some("blue".into()),
        }));

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let frame = &buf[..n];

        // Header sanity.
        assert_eq!(
            u32::from_ne_bytes(frame[0..4].try_into().unwrap()) as usize,
            n
        );
        assert_eq!(u16::from_ne_bytes(frame[4..6].try_into().unwrap()), 24);
        assert_eq!(frame[NLMSG_HDRLEN], libc::AF_INET6 as u8);
        assert_eq!(frame[NLMSG_HDRLEN + 1], 64); // dst_len

        let top = attrs(frame);
        let encap_disc = top.iter().find(|(t, _)| *t == rta::ENCAP_TYPE).unwrap();
        assert_eq!(
            u16::from_ne_bytes(encap_disc.1[0..2].try_into().unwrap()),
            102
        );

        let encap = top.iter().find(|(t, _)| *t == rta::ENCAP).unwrap();
        let inner = nested(&encap.1);
        let get = |code: u16| {
            inner
                .iter()
                .find(|(t, _)| *t == code)
                .unwrap_or_else(|| panic!("missing nested attr {}", code))
                .1
                .clone()
        };
        assert_eq!(get(srv6_local_sid::BLOCK_LEN), vec![40]);
        assert_eq!(get(srv6_local_sid::NODE_LEN), vec![24]);
        assert_eq!(get(srv6_local_sid::FUNC_LEN), vec![16]);
        assert_eq!(get(srv6_local_sid::ARG_LEN), vec![0]);
        assert_eq!(get(srv6_local_sid::ACTION), 7u32.to_ne_bytes().to_vec());
        assert_eq!(get(srv6_local_sid::VRFNAME), b"blue\0".to_vec());
    }

    #[test]
    fn test_endx_encap_carries_nh6() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("fc00:1::1")), 128, 11);
        route.nexthops.push(FpmNextHop::dev(2));
        route.encap = Some(FpmEncap::LocalSid(LocalSidEncap {
            action: 2,
            structure: SidStructure::new(32, 16, 16, 0).unwrap(),
            nh6: Some(v6("fe80::1")),
            nh4: None,
            vrf_name: None,
        }));

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let top = attrs(&buf[..n]);
        let encap = top.iter().find(|(t, _)| *t == rta::ENCAP).unwrap();
        let inner = nested(&encap.1);
        let nh6 = inner.iter().find(|(t, _)| *t == srv6_local_sid::NH6).unwrap();
        assert_eq!(nh6.1, v6("fe80::1").octets().to_vec());
        assert!(!inner.iter().any(|(t, _)| *t == srv6_local_sid::VRFNAME));
    }

    #[test]
    fn test_dx4_encap_carries_nh4() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("fc00:1::d4")), 128, 11);
        route.nexthops.push(FpmNextHop::dev(2));
        route.encap = Some(FpmEncap::LocalSid(LocalSidEncap {
            action: 6,
            structure: SidStructure::new(32, 16, 16, 0).unwrap(),
            nh6: None,
            nh4: Some("192.0.2.1".parse().unwrap()),
            vrf_name: None,
        }));

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let top = attrs(&buf[..n]);
        let encap = top.iter().find(|(t, _)| *t == rta::ENCAP).unwrap();
        let inner = nested(&encap.1);
        let action = inner
            .iter()
            .find(|(t, _)| *t == srv6_local_sid::ACTION)
            .unwrap();
        assert_eq!(action.1, 6u32.to_ne_bytes().to_vec());
        let nh4 = inner.iter().find(|(t, _)| *t == srv6_local_sid::NH4).unwrap();
        assert_eq!(nh4.1, vec![192, 0, 2, 1]);
        assert!(!inner.iter().any(|(t, _)| *t == srv6_local_sid::NH6));
        assert!(!inner.iter().any(|(t, _)| *t == srv6_local_sid::VRFNAME));
    }

    #[test]
    fn test_vpn_encap_frame() {
        let mut route = FpmRoute::new(IpAddr::V4("10.1.0.0".parse().unwrap()), 16, 11);
        route.table = 100;
        route.nexthops.push(FpmNextHop::dev(2));
        route.encap = Some(FpmEncap::Vpn {
            vpn_sid: v6("fc00:2::d4"),
            src_addr: v6("fc00:1::1"),
        });

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let top = attrs(&buf[..n]);

        let disc = top.iter().find(|(t, _)| *t == rta::ENCAP_TYPE).unwrap();
        assert_eq!(u16::from_ne_bytes(disc.1[0..2].try_into().unwrap()), 101);

        let encap = top.iter().find(|(t, _)| *t == rta::ENCAP).unwrap();
        let inner = nested(&encap.1);
        assert_eq!(inner[0].0, srv6_route::VPN_SID);
        assert_eq!(inner[0].1, v6("fc00:2::d4").octets().to_vec());
        assert_eq!(inner[1].0, srv6_route::ENCAP_SRC_ADDR);
        assert_eq!(inner[1].1, v6("fc00:1::1").octets().to_vec());
    }

    #[test]
    fn test_table_inline_vs_extended() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("2001::")), 64, 11);
        route.table = 100;
        route.nexthops.push(FpmNextHop::dev(2));

        let mut buf = [0u8; 256];
        let n = route.encode_newroute(&mut buf).unwrap();
        assert_eq!(buf[NLMSG_HDRLEN + 4], 100); // inline rtm_table
        assert!(!attrs(&buf[..n]).iter().any(|(t, _)| *t == rta::TABLE));

        route.table = 1000;
        let n = route.encode_newroute(&mut buf).unwrap();
        assert_eq!(buf[NLMSG_HDRLEN + 4], 0); // RT_TABLE_UNSPEC
        let top = attrs(&buf[..n]);
        let table = top.iter().find(|(t, _)| *t == rta::TABLE).unwrap();
        assert_eq!(u32::from_ne_bytes(table.1[0..4].try_into().unwrap()), 1000);
    }

    #[test]
    fn test_multipath_layout() {
        let mut route = FpmRoute::new(IpAddr::V4("0.0.0.0".parse().unwrap()), 0, 11);
        route.nexthops = vec![
            FpmNextHop::via(IpAddr::V4("192.0.2.1".parse().unwrap()), 2),
            FpmNextHop::via(IpAddr::V4("192.0.2.2".parse().unwrap()), 3),
        ];

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let top = attrs(&buf[..n]);
        let mp = top.iter().find(|(t, _)| *t == rta::MULTIPATH).unwrap();

        // First rtnexthop: len covers header + gateway attr.
        let entry_len = u16::from_ne_bytes(mp.1[0..2].try_into().unwrap()) as usize;
        assert_eq!(entry_len, RTNH_LEN + 8);
        let ifindex = i32::from_ne_bytes(mp.1[4..8].try_into().unwrap());
        assert_eq!(ifindex, 2);
        // Second entry follows immediately.
        let second = &mp.1[entry_len..];
        let ifindex2 = i32::from_ne_bytes(second[4..8].try_into().unwrap());
        assert_eq!(ifindex2, 3);

        assert!(!top.iter().any(|(t, _)| *t == rta::GATEWAY));
    }

    #[test]
    fn test_multipath_vxlan_encap() {
        let mut route = FpmRoute::new(IpAddr::V4("10.0.0.0".parse().unwrap()), 8, 11);
        route.nexthops = vec![
            FpmNextHop {
                gateway: Some(IpAddr::V4("192.0.2.1".parse().unwrap())),
                ifindex: 2,
                weight: 1,
                vni: Some(4096),
            },
            FpmNextHop::via(IpAddr::V4("192.0.2.2".parse().unwrap()), 3),
        ];

        let mut buf = [0u8; 512];
        let n = route.encode_newroute(&mut buf).unwrap();
        let top = attrs(&buf[..n]);
        let mp = top.iter().find(|(t, _)| *t == rta::MULTIPATH).unwrap();

        let entry_len = u16::from_ne_bytes(mp.1[0..2].try_into().unwrap()) as usize;
        let entry_attrs = nested(&mp.1[RTNH_LEN..entry_len]);
        let disc = entry_attrs
            .iter()
            .find(|(t, _)| *t == rta::ENCAP_TYPE)
            .unwrap();
        assert_eq!(u16::from_ne_bytes(disc.1[0..2].try_into().unwrap()), 100);
        let encap = entry_attrs.iter().find(|(t, _)| *t == rta::ENCAP).unwrap();
        let vni = nested(&encap.1);
        assert_eq!(vni[0].0, vxlan::VNI);
        assert_eq!(u32::from_ne_bytes(vni[0].1[0..4].try_into().unwrap()), 4096);
    }

    #[test]
    fn test_srv6_multipath_rejected() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("2001::")), 64, 11);
        route.nexthops = vec![FpmNextHop::dev(2), FpmNextHop::dev(3)];
        route.encap = Some(FpmEncap::Vpn {
            vpn_sid: v6("fc00::1"),
            src_addr: v6("fc00::2"),
        });

        let mut buf = [0u8; 512];
        let err = route.encode_newroute(&mut buf).unwrap_err();
        assert!(!err.is_overflow());
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overflow_returns_overflow() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("2001::")), 64, 11);
        route.nexthops.push(FpmNextHop::dev(2));

        let mut buf = [0u8; 32];
        let err = route.encode_newroute(&mut buf).unwrap_err();
        assert!(err.is_overflow());
    }

    #[test]
    fn test_encoder_is_pure() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("fc00:1::")), 48, 11);
        route.nexthops.push(FpmNextHop::via(
            IpAddr::V6(v6("fe80::1")),
            2,
        ));
        route.metric = Some(20);

        let mut a = [0u8; 256];
        let mut b = [0u8; 256];
        let na = route.encode_newroute(&mut a).unwrap();
        let nb = route.encode_newroute(&mut b).unwrap();
        assert_eq!(&a[..na], &b[..nb]);
    }

    #[test]
    fn test_delroute_is_key_only() {
        let mut route = FpmRoute::new(IpAddr::V6(v6("fc00:1::1")), 128, 11);
        route.nexthops.push(FpmNextHop::dev(2));
        route.encap = Some(FpmEncap::Vpn {
            vpn_sid: v6("fc00::1"),
            src_addr: v6("fc00::2"),
        });

        let mut buf = [0u8; 256];
        let n = route.encode_delroute(&mut buf).unwrap();
        assert_eq!(u16::from_ne_bytes(buf[4..6].try_into().unwrap()), 25);
        let top = attrs(&buf[..n]);
        assert!(top.iter().any(|(t, _)| *t == rta::DST));
        assert!(!top.iter().any(|(t, _)| *t == rta::ENCAP));
        assert!(!top.iter().any(|(t, _)| *t == rta::OIF));
    }
}
