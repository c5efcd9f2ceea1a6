//! Operator-declared static SID table.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

use crate::behavior::Behavior;
use crate::error::{Error, Result};
use crate::local_sid::LocalSid;

/// One settable attribute of a static SID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SidAttribute {
    /// Attached VRF name.
    Vrf(String),
    /// Outgoing interface name.
    Interface(String),
    /// IPv6 adjacency (nexthop).
    Nexthop(Ipv6Addr),
    /// IPv4 nexthop, for End.DX4.
    Nexthop4(Ipv4Addr),
}

/// Table of operator-declared SIDs, keyed by 128-bit address.
///
/// The table is the process-wide registry of declared SIDs: at most
/// one descriptor exists per address. Insertion order is preserved
/// for the configuration pretty-printer.
#[derive(Debug, Default)]
pub struct StaticSidTable {
    sids: BTreeMap<Ipv6Addr, LocalSid>,
    order: Vec<Ipv6Addr>,
}

impl StaticSidTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a SID. A duplicate address returns the existing
    /// descriptor untouched; the declared behavior must then match.
    pub fn add(&mut self, addr: Ipv6Addr, behavior: Behavior) -> Result<&LocalSid> {
        if let Some(existing) = self.sids.get(&addr) {
            if existing.behavior != behavior {
                return Err(Error::config(format!(
                    "SID {} already declared with behavior {}",
                    addr, existing.behavior
                )));
            }
            return Ok(&self.sids[&addr]);
        }
        self.order.push(addr);
        self.sids.insert(addr, LocalSid::new(addr, behavior));
        Ok(&self.sids[&addr])
    }

    /// Set one attribute on a declared SID. Validity is re-derived by
    /// the installation controller afterwards.
    pub fn set_attribute(&mut self, addr: Ipv6Addr, attr: SidAttribute) -> Result<&LocalSid> {
        let sid = self
            .sids
            .get_mut(&addr)
            .ok_or_else(|| Error::config(format!("no SID declared at {}", addr)))?;
        match attr {
            SidAttribute::Vrf(name) => sid.vrf = Some(name),
            SidAttribute::Interface(name) => sid.ifname = Some(name),
            SidAttribute::Nexthop(nh) => sid.nexthop = Some(nh),
            SidAttribute::Nexthop4(nh) => sid.nexthop4 = Some(nh),
        }
        Ok(sid)
    }

    /// Look up a SID by address.
    pub fn lookup(&self, addr: Ipv6Addr) -> Option<&LocalSid> {
        self.sids.get(&addr)
    }

    /// Mutable lookup.
    pub fn lookup_mut(&mut self, addr: Ipv6Addr) -> Option<&mut LocalSid> {
        self.sids.get_mut(&addr)
    }

    /// Remove a SID, returning its descriptor so the caller can
    /// withdraw it from the forwarding plane.
    pub fn delete(&mut self, addr: Ipv6Addr) -> Option<LocalSid> {
        let removed = self.sids.remove(&addr)?;
        self.order.retain(|a| *a != addr);
        Some(removed)
    }

    /// Number of declared SIDs.
    pub fn len(&self) -> usize {
        self.sids.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    /// Iterate SIDs in declaration order (pretty-printer contract).
    pub fn iter_declared(&self) -> impl Iterator<Item = &LocalSid> {
        self.order.iter().filter_map(|a| self.sids.get(a))
    }

    /// Addresses in declaration order, for callers that need mutable
    /// access while walking.
    pub fn declared_order(&self) -> Vec<Ipv6Addr> {
        self.order.clone()
    }

    /// Iterate SIDs in address order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LocalSid> {
        self.sids.values_mut()
    }

    /// Whether any declared SID occupies `addr`.
    pub fn contains(&self, addr: Ipv6Addr) -> bool {
        self.sids.contains_key(&addr)
    }
}
