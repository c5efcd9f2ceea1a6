//! Broker state: resource ownership, the local-SID table and the
//! route table, plus FPM mirror frame production.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};

use tracing::{debug, info, warn};

use seglink::broker::proto::{BrokerEvent, BrokerRequest, RouteUpdate};
use seglink::fpm::header::frame_with_header;
use seglink::fpm::{FpmEncap, FpmNextHop, FpmRoute, LocalSidEncap};
use seglink::install::{ResourceEvent, RouteNotify, SidInstall};
use seglink::sid::SidStructure;

use crate::config::RibConfig;

/// Protocol id stamped on mirrored routes.
const RT_PROTOCOL: u8 = 11;

/// Scratch buffer size for one FPM frame.
const FPM_BUF_LEN: usize = 4096;

/// The broker's view of the world and everything installed through it.
pub struct Rib {
    config: RibConfig,
    local_sids: BTreeMap<Ipv6Addr, SidInstall>,
    routes: BTreeMap<(Ipv6Addr, u8), RouteUpdate>,
    nexthop_regs: Vec<Ipv6Addr>,
}

/// What one inbound request produced: notifications for the client
/// and frames for the FPM mirror.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Events to push back to the requesting daemon.
    pub replies: Vec<BrokerEvent>,
    /// Encoded FPM frames (stream header included).
    pub fpm_frames: Vec<Vec<u8>>,
}

impl Rib {
    /// Build the broker state from configuration.
    pub fn new(config: RibConfig) -> Self {
        Self {
            config,
            local_sids: BTreeMap::new(),
            routes: BTreeMap::new(),
            nexthop_regs: Vec::new(),
        }
    }

    /// Events replayed to every newly connected daemon.
    pub fn replay(&self) -> Vec<BrokerEvent> {
        let mut events = Vec::new();
        for iface in &self.config.interfaces {
            events.push(BrokerEvent::Resource(ResourceEvent::InterfaceUp {
                name: iface.name.clone(),
                ifindex: iface.ifindex,
                loopback: iface.loopback,
            }));
        }
        for vrf in &self.config.vrfs {
            events.push(BrokerEvent::Resource(ResourceEvent::VrfUp {
                name: vrf.name.clone(),
                table_id: vrf.table,
                ifindex: vrf.ifindex,
            }));
        }
        events
    }

    /// VRF name backing a routing table, for the FPM local-SID nest.
    fn vrf_name_for_table(&self, table: u32) -> Option<&str> {
        self.config
            .vrfs
            .iter()
            .find(|v| v.table == table)
            .map(|v| v.name.as_str())
    }

    /// Whether a nexthop is currently reachable: some non-loopback
    /// interface must exist.
    fn nexthop_resolved(&self) -> bool {
        self.config.interfaces.iter().any(|i| !i.loopback)
    }

    fn local_sid_route(&self, install: &SidInstall) -> FpmRoute {
        let encap = LocalSidEncap {
            action: install.action,
            structure: install.structure.unwrap_or(SidStructure {
                block_len: 0,
                node_len: 0,
                function_len: 0,
                argument_len: 0,
            }),
            nh6: install.nh6,
            nh4: install.nh4,
            vrf_name: install
                .table
                .and_then(|t| self.vrf_name_for_table(t))
                .map(str::to_owned),
        };
        let mut route = FpmRoute::new(IpAddr::V6(install.addr), 128, RT_PROTOCOL);
        route.nexthops.push(FpmNextHop::dev(install.oif));
        route.encap = Some(FpmEncap::LocalSid(encap));
        route
    }

    fn vpn_route(update: &RouteUpdate) -> FpmRoute {
        let mut route = FpmRoute::new(IpAddr::V6(update.prefix), update.prefix_len, RT_PROTOCOL);
        if let Some(table) = update.table {
            route.table = table;
        }
        route.metric = update.metric;
        let mut nh = FpmNextHop::dev(update.oif.unwrap_or(0));
        nh.gateway = update.gateway.map(IpAddr::V6);
        route.nexthops.push(nh);
        if let (Some(vpn_sid), Some(src_addr)) = (update.vpn_sid, update.encap_src) {
            route.encap = Some(FpmEncap::Vpn { vpn_sid, src_addr });
        }
        route
    }

    fn mirror(frames: &mut Vec<Vec<u8>>, route: &FpmRoute, delete: bool) {
        let mut buf = [0u8; FPM_BUF_LEN];
        let encoded = frame_with_header(&mut buf, |payload| {
            if delete {
                route.encode_delroute(payload)
            } else {
                route.encode_newroute(payload)
            }
        });
        match encoded {
            Ok(n) => frames.push(buf[..n].to_vec()),
            // Overflow means drop this mirror frame, nothing else.
            Err(e) if e.is_overflow() => {
                warn!(dest = %route.dest, "FPM frame overflow, dropped")
            }
            Err(e) => warn!(dest = %route.dest, error = %e, "FPM encode failed"),
        }
    }

    /// Process one request from a daemon.
    pub fn handle(&mut self, req: BrokerRequest) -> Reaction {
        let mut reaction = Reaction::default();
        match req {
            BrokerRequest::AddLocalSid(install) => {
                info!(sid = %install.addr, action = install.action, oif = install.oif,
                      "local SID installed");
                let route = self.local_sid_route(&install);
                Self::mirror(&mut reaction.fpm_frames, &route, false);
                self.local_sids.insert(install.addr, install.clone());
                reaction.replies.push(BrokerEvent::RouteNotify {
                    prefix: install.addr,
                    prefix_len: 128,
                    outcome: RouteNotify::Installed,
                });
            }
            BrokerRequest::DelLocalSid(req) => {
                let outcome = match self.local_sids.remove(&req.addr) {
                    Some(install) => {
                        info!(sid = %req.addr, "local SID removed");
                        let route = self.local_sid_route(&install);
                        Self::mirror(&mut reaction.fpm_frames, &route, true);
                        RouteNotify::Removed
                    }
                    None => {
                        warn!(sid = %req.addr, "DEL_LOCALSID for unknown SID");
                        RouteNotify::RemoveFail
                    }
                };
                reaction.replies.push(BrokerEvent::RouteNotify {
                    prefix: req.addr,
                    prefix_len: 128,
                    outcome,
                });
            }
            BrokerRequest::NexthopRegister { addr } => {
                if !self.nexthop_regs.contains(&addr) {
                    self.nexthop_regs.push(addr);
                }
                reaction
                    .replies
                    .push(BrokerEvent::Resource(ResourceEvent::NexthopUpdate {
                        addr,
                        resolved: self.nexthop_resolved(),
                    }));
            }
            BrokerRequest::NexthopUnregister { addr } => {
                self.nexthop_regs.retain(|a| *a != addr);
            }
            BrokerRequest::RouteAdd(update) => {
                debug!(prefix = %update.prefix, len = update.prefix_len, "route installed");
                let route = Self::vpn_route(&update);
                Self::mirror(&mut reaction.fpm_frames, &route, false);
                reaction.replies.push(BrokerEvent::RouteNotify {
                    prefix: update.prefix,
                    prefix_len: update.prefix_len,
                    outcome: RouteNotify::Installed,
                });
                self.routes
                    .insert((update.prefix, update.prefix_len), update);
            }
            BrokerRequest::RouteDelete(update) => {
                let outcome = match self.routes.remove(&(update.prefix, update.prefix_len)) {
                    Some(stored) => {
                        let route = Self::vpn_route(&stored);
                        Self::mirror(&mut reaction.fpm_frames, &route, true);
                        RouteNotify::Removed
                    }
                    None => RouteNotify::RemoveFail,
                };
                reaction.replies.push(BrokerEvent::RouteNotify {
                    prefix: update.prefix,
                    prefix_len: update.prefix_len,
                    outcome,
                });
            }
        }
        reaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IfaceConfig, VrfConfig};
    use seglink::install::SidUninstall;

    fn rib() -> Rib {
        Rib::new(RibConfig {
            interfaces: vec![
                IfaceConfig {
                    name: "lo".into(),
                    ifindex: 1,
                    loopback: true,
                },
                IfaceConfig {
                    name: "eth0".into(),
                    ifindex: 2,
                    loopback: false,
                },
            ],
            vrfs: vec![VrfConfig {
                name: "red".into(),
                table: 100,
                ifindex: 7,
            }],
        })
    }

    fn install(addr: &str) -> SidInstall {
        SidInstall {
            addr: addr.parse().unwrap(),
            oif: 2,
            action: 8,
            nh4: None,
            nh6: None,
            table: Some(100),
            flavor: None,
            structure: Some(SidStructure::new(32, 16, 16, 0).unwrap()),
        }
    }

    #[test]
    fn test_replay_covers_config() {
        let events = rib().replay();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2],
            BrokerEvent::Resource(ResourceEvent::VrfUp { name, table_id: 100, .. })
                if name == "red"
        ));
    }

    #[test]
    fn test_add_then_del_local_sid() {
        let mut rib = rib();

        let reaction = rib.handle(BrokerRequest::AddLocalSid(install("fc00::2")));
        assert_eq!(reaction.replies.len(), 1);
        assert!(matches!(
            reaction.replies[0],
            BrokerEvent::RouteNotify {
                outcome: RouteNotify::Installed,
                ..
            }
        ));
        assert_eq!(reaction.fpm_frames.len(), 1);
        // FPM header leads the frame.
        let frame = &reaction.fpm_frames[0];
        assert_eq!(frame[0], 1);
        assert_eq!(frame[1], 1);
        // The mirrored nest carries the VRF name for table 100.
        assert!(frame.windows(4).any(|w| w == b"red\0"));

        let reaction = rib.handle(BrokerRequest::DelLocalSid(SidUninstall {
            addr: "fc00::2".parse().unwrap(),
            oif: 2,
        }));
        assert!(matches!(
            reaction.replies[0],
            BrokerEvent::RouteNotify {
                outcome: RouteNotify::Removed,
                ..
            }
        ));
        assert_eq!(reaction.fpm_frames.len(), 1);
    }

    #[test]
    fn test_del_unknown_sid_fails() {
        let mut rib = rib();
        let reaction = rib.handle(BrokerRequest::DelLocalSid(SidUninstall {
            addr: "fc00::9".parse().unwrap(),
            oif: 2,
        }));
        assert!(matches!(
            reaction.replies[0],
            BrokerEvent::RouteNotify {
                outcome: RouteNotify::RemoveFail,
                ..
            }
        ));
        assert!(reaction.fpm_frames.is_empty());
    }

    #[test]
    fn test_nexthop_register_resolves() {
        let mut rib = rib();
        let reaction = rib.handle(BrokerRequest::NexthopRegister {
            addr: "fe80::1".parse().unwrap(),
        });
        assert!(matches!(
            reaction.replies[0],
            BrokerEvent::Resource(ResourceEvent::NexthopUpdate { resolved: true, .. })
        ));
    }

    #[test]
    fn test_vpn_route_mirrors_encap() {
        let mut rib = rib();
        let reaction = rib.handle(BrokerRequest::RouteAdd(RouteUpdate {
            prefix: "2001::".parse().unwrap(),
            prefix_len: 64,
            gateway: None,
            oif: Some(2),
            metric: Some(20),
            table: Some(254),
            vpn_sid: Some("fc00:2::d4".parse().unwrap()),
            encap_src: Some("fc00:1::1".parse().unwrap()),
        }));
        assert_eq!(reaction.fpm_frames.len(), 1);
        let frame = &reaction.fpm_frames[0];
        // ENCAP_TYPE 101 appears in the netlink payload.
        let disc = 101u16.to_ne_bytes();
        assert!(frame.windows(2).any(|w| w == disc));
    }
}
