//! Per-area SRv6 state: locators, chunks and adjacency SIDs.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

use anyhow::{Context, Result};
use bytes::BytesMut;
use tracing::{debug, info};

use seglink::adjacency::{AdjSid, AdjSidManager, Adjacency, AdjacencyId, CircuitType};
use seglink::isis::{Srv6EndXSid, Srv6LanEndXSid, Srv6LocatorEntry, Srv6LocatorTlv, TlvEmit};
use seglink::locator::{LocatorRegistry, SidOwner};

use crate::config::{AreaConfig, Circuit, InterfaceConfig};

/// Runtime state of one configured area.
pub struct Area {
    /// Area tag.
    pub tag: String,
    /// The area's locator catalogue.
    pub registry: LocatorRegistry,
    /// The area's adjacency SIDs.
    pub adj_sids: AdjSidManager,
    interfaces: Vec<InterfaceConfig>,
    adj_by_ifname: BTreeMap<String, AdjacencyId>,
    next_adj_id: u64,
}

impl Area {
    /// Build the area from configuration: register every locator and
    /// take the IS-IS chunk of each.
    pub fn from_config(config: &AreaConfig) -> Result<Self> {
        let mut registry = LocatorRegistry::new();
        for def in &config.locators {
            registry
                .create(def)
                .with_context(|| format!("area {}: locator {}", config.tag, def.name))?;
            registry
                .chunk_alloc(&def.name, SidOwner::Isis)
                .with_context(|| format!("area {}: locator {}", config.tag, def.name))?;
        }
        Ok(Self {
            tag: config.tag.clone(),
            registry,
            adj_sids: AdjSidManager::new(),
            interfaces: config.interfaces.clone(),
            adj_by_ifname: BTreeMap::new(),
            next_adj_id: 1,
        })
    }

    /// Configuration of a participating interface, if any.
    pub fn interface_config(&self, name: &str) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// An interface of this area came up: the adjacency forms, and if
    /// the neighbor's IPv6 link-local address is known an End.X SID
    /// is allocated right away.
    pub fn interface_up(&mut self, name: &str, ifindex: u32) -> Result<Option<Ipv6Addr>> {
        let Some(iface) = self.interface_config(name).cloned() else {
            return Ok(None);
        };
        if self.adj_by_ifname.contains_key(name) {
            return Ok(None);
        }

        let id = AdjacencyId(self.next_adj_id);
        self.next_adj_id += 1;
        self.adj_sids.adj_up(Adjacency {
            id,
            ifname: name.to_string(),
            ifindex,
            circuit: match iface.circuit {
                Circuit::PointToPoint => CircuitType::PointToPoint,
                Circuit::Broadcast => CircuitType::Broadcast,
            },
            neighbor: None,
        });
        self.adj_by_ifname.insert(name.to_string(), id);
        info!(area = %self.tag, ifname = name, "adjacency up");

        let Some(neighbor) = iface.neighbor else {
            return Ok(None);
        };
        let allocated = self
            .adj_sids
            .adj_ipv6_enabled(id, neighbor, &self.registry, &BTreeSet::new())?
            .map(|adj_sid| adj_sid.sid.addr);
        if let Some(addr) = allocated {
            info!(area = %self.tag, ifname = name, sid = %addr, "End.X SID bound");
        }
        Ok(allocated)
    }

    /// An interface went down: tear down the adjacency and its SIDs.
    /// Returns the removed SIDs for withdrawal.
    pub fn interface_down(&mut self, name: &str) -> Vec<AdjSid> {
        let Some(id) = self.adj_by_ifname.remove(name) else {
            return Vec::new();
        };
        info!(area = %self.tag, ifname = name, "adjacency down");
        self.adj_sids.adj_down(id)
    }

    /// Delete a locator, cascading through dependent SIDs. Returns
    /// the SIDs to withdraw.
    pub fn locator_delete(&mut self, name: &str) -> Vec<AdjSid> {
        let Some(released) = self.registry.delete(name) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for chunk in &released {
            removed.extend(self.adj_sids.release_chunk(&chunk.id()));
        }
        removed
    }

    /// Produce the area's SRv6 advertisement: the Locator TLV plus
    /// one End.X sub-TLV per adjacency SID.
    pub fn advertisement(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        let locator_tlv = Srv6LocatorTlv {
            mtid: 0,
            entries: self
                .registry
                .iter()
                .map(|loc| Srv6LocatorEntry {
                    metric: 0,
                    flags: 0,
                    algo: 0,
                    loc_size: loc.prefix_len,
                    prefix: loc.prefix,
                })
                .collect(),
        };
        if !locator_tlv.entries.is_empty() {
            locator_tlv.emit(&mut buf);
        }

        for adj_sid in self.adj_sids.iter() {
            let behavior = adj_sid.sid.behavior.advert_code().unwrap_or(0);
            let adj = self.adj_sids.adjacency(adj_sid.adjacency);
            let circuit = adj.map(|a| a.circuit).unwrap_or(CircuitType::PointToPoint);
            let system_id = adj
                .and_then(|a| self.interface_config(&a.ifname))
                .and_then(|i| i.neighbor_system_id().ok().flatten());

            match (circuit, system_id) {
                (CircuitType::Broadcast, Some(neighbor)) => {
                    Srv6LanEndXSid {
                        neighbor,
                        flags: 0,
                        algo: 0,
                        weight: 0,
                        behavior,
                        sid: adj_sid.sid.addr,
                        structure: adj_sid.sid.structure,
                    }
                    .emit(&mut buf);
                }
                _ => {
                    Srv6EndXSid {
                        flags: 0,
                        algo: 0,
                        weight: 0,
                        behavior,
                        sid: adj_sid.sid.addr,
                        structure: adj_sid.sid.structure,
                    }
                    .emit(&mut buf);
                }
            }
        }

        debug!(area = %self.tag, bytes = buf.len(), "SRv6 advertisement rebuilt");
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglink::locator::LocatorDef;
    use seglink::sid::SidStructure;

    fn area_config() -> AreaConfig {
        AreaConfig {
            tag: "backbone".into(),
            locators: vec![LocatorDef {
                name: "L1".into(),
                prefix: "2001:db8::".parse().unwrap(),
                prefix_len: 48,
                structure: SidStructure::new(32, 16, 16, 0).unwrap(),
                usid: false,
            }],
            interfaces: vec![InterfaceConfig {
                name: "eth0".into(),
                circuit: Circuit::PointToPoint,
                neighbor: Some("fe80::1".parse().unwrap()),
                neighbor_system_id: None,
            }],
        }
    }

    #[test]
    fn test_interface_lifecycle_allocates_and_frees() {
        let mut area = Area::from_config(&area_config()).unwrap();

        let sid = area.interface_up("eth0", 2).unwrap().unwrap();
        assert_eq!(sid, "2001:db8:0:1::".parse::<Ipv6Addr>().unwrap());
        assert_eq!(area.adj_sids.len(), 1);

        // Unconfigured interfaces are ignored.
        assert!(area.interface_up("eth9", 9).unwrap().is_none());

        let removed = area.interface_down("eth0");
        assert_eq!(removed.len(), 1);
        assert!(area.adj_sids.is_empty());
    }

    #[test]
    fn test_advertisement_contains_locator_and_endx() {
        let mut area = Area::from_config(&area_config()).unwrap();
        area.interface_up("eth0", 2).unwrap();

        let adv = area.advertisement();
        // Locator TLV type 27 leads, End.X sub-TLV code 43 follows.
        assert_eq!(adv[0], 27);
        assert!(adv.iter().any(|&b| b == 43));
    }

    #[test]
    fn test_locator_delete_cascades() {
        let mut area = Area::from_config(&area_config()).unwrap();
        area.interface_up("eth0", 2).unwrap();

        let removed = area.locator_delete("L1");
        assert_eq!(removed.len(), 1);
        assert!(area.adj_sids.is_empty());
        assert!(area.registry.get("L1").is_none());
    }
}
