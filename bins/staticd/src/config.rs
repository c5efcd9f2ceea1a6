//! Declarative configuration for staticd.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use seglink::behavior::Behavior;
use seglink::static_sid::{SidAttribute, StaticSidTable};

/// One declared SID in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidConfig {
    /// SID address.
    pub address: Ipv6Addr,
    /// Endpoint behavior.
    pub behavior: Behavior,
    /// Attached VRF.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrf: Option<String>,
    /// Outgoing interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// IPv6 adjacency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexthop: Option<Ipv6Addr>,
    /// IPv4 nexthop, for End.DX4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexthop4: Option<Ipv4Addr>,
}

/// The staticd configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Declared SIDs, in declaration order.
    #[serde(default)]
    pub sids: Vec<SidConfig>,
}

impl StaticConfig {
    /// Load the configuration, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Write the configuration back.
    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Materialize the declared SIDs into a table, validating each
    /// declaration the way the daemon will.
    pub fn build_table(&self) -> Result<StaticSidTable> {
        let mut table = StaticSidTable::new();
        for sid in &self.sids {
            table.add(sid.address, sid.behavior)?;
            if let Some(vrf) = &sid.vrf {
                table.set_attribute(sid.address, SidAttribute::Vrf(vrf.clone()))?;
            }
            if let Some(ifname) = &sid.interface {
                table.set_attribute(sid.address, SidAttribute::Interface(ifname.clone()))?;
            }
            if let Some(nexthop) = sid.nexthop {
                table.set_attribute(sid.address, SidAttribute::Nexthop(nexthop))?;
            }
            if let Some(nexthop4) = sid.nexthop4 {
                table.set_attribute(sid.address, SidAttribute::Nexthop4(nexthop4))?;
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let config = StaticConfig {
            sids: vec![SidConfig {
                address: "fc00::2".parse().unwrap(),
                behavior: Behavior::EndDt4,
                vrf: Some("red".into()),
                interface: None,
                nexthop: None,
                nexthop4: None,
            }],
        };
        let raw = serde_json::to_string(&config).unwrap();
        assert!(raw.contains("end-dt4"));
        let back: StaticConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.sids.len(), 1);
        assert_eq!(back.sids[0].behavior, Behavior::EndDt4);
    }

    #[test]
    fn test_build_table_rejects_duplicates() {
        let sid = SidConfig {
            address: "fc00::1".parse().unwrap(),
            behavior: Behavior::End,
            vrf: None,
            interface: None,
            nexthop: None,
            nexthop4: None,
        };
        let mut dup = sid.clone();
        dup.behavior = Behavior::EndDt6;
        let config = StaticConfig {
            sids: vec![sid, dup],
        };
        assert!(config.build_table().is_err());
    }
}
