//! Broker configuration: the forwarding resources it owns.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One interface the broker knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceConfig {
    /// Interface name.
    pub name: String,
    /// Kernel interface index.
    pub ifindex: u32,
    /// Loopback interface.
    #[serde(default)]
    pub loopback: bool,
}

/// One VRF the broker owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrfConfig {
    /// VRF name.
    pub name: String,
    /// Backing routing table.
    pub table: u32,
    /// Interface index of the VRF device.
    pub ifindex: u32,
}

/// The ribd configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RibConfig {
    /// Known interfaces.
    #[serde(default)]
    pub interfaces: Vec<IfaceConfig>,
    /// Known VRFs.
    #[serde(default)]
    pub vrfs: Vec<VrfConfig>,
}

impl RibConfig {
    /// Load the configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let raw = r#"{
            "interfaces": [
                { "name": "lo", "ifindex": 1, "loopback": true },
                { "name": "eth0", "ifindex": 2 }
            ],
            "vrfs": [{ "name": "red", "table": 100, "ifindex": 7 }]
        }"#;
        let config: RibConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.interfaces.len(), 2);
        assert!(config.interfaces[0].loopback);
        assert!(!config.interfaces[1].loopback);
        assert_eq!(config.vrfs[0].table, 100);
    }
}
