//! Declarative configuration for isisd.

use std::net::Ipv6Addr;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use seglink::isis::SystemId;
use seglink::locator::LocatorDef;

/// Circuit type of a configured interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Circuit {
    /// Point-to-point link.
    #[default]
    PointToPoint,
    /// Broadcast LAN.
    Broadcast,
}

/// One interface participating in an area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Interface name.
    pub name: String,
    /// Circuit type.
    #[serde(default)]
    pub circuit: Circuit,
    /// Neighbor IPv6 link-local address, once the hello exchange
    /// learned it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbor: Option<Ipv6Addr>,
    /// Neighbor system id in dotted form ("0000.0000.0007"), for
    /// LAN End.X advertisements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neighbor_system_id: Option<String>,
}

impl InterfaceConfig {
    /// Parse the dotted neighbor system id.
    pub fn neighbor_system_id(&self) -> Result<Option<SystemId>> {
        let Some(raw) = &self.neighbor_system_id else {
            return Ok(None);
        };
        let hex: String = raw.chars().filter(|c| *c != '.').collect();
        if hex.len() != 12 {
            bail!("system id {} must be six octets", raw);
        }
        let mut id = [0u8; 6];
        for (i, byte) in id.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .with_context(|| format!("system id {}", raw))?;
        }
        Ok(Some(SystemId(id)))
    }
}

/// One IS-IS area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    /// Area tag.
    pub tag: String,
    /// SRv6 locators of the area.
    #[serde(default)]
    pub locators: Vec<LocatorDef>,
    /// Interfaces running the protocol in this area.
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

/// The isisd configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsisConfig {
    /// Configured areas.
    #[serde(default)]
    pub areas: Vec<AreaConfig>,
}

impl IsisConfig {
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

    /// Area by tag.
    pub fn area_mut(&mut self, tag: &str) -> Option<&mut AreaConfig> {
        self.areas.iter_mut().find(|a| a.tag == tag)
    }
}
