//! Local SID descriptor shared by static and adjacency SIDs.

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::behavior::Behavior;
use crate::sid::SidStructure;

/// Installation flags of a local SID.
///
/// VALID tracks whether the behavior's attribute requirements are met
/// against live collaborators; SENT_TO_BROKER tracks whether the SID
/// is currently programmed through the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SidFlags(u8);

impl SidFlags {
    const VALID: u8 = 0x01;
    const SENT: u8 = 0x02;

    /// No flags set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the SID currently satisfies its behavior requirements.
    pub fn is_valid(self) -> bool {
        self.0 & Self::VALID != 0
    }

    /// Whether an ADD for this SID is outstanding at the broker.
    pub fn is_sent(self) -> bool {
        self.0 & Self::SENT != 0
    }

    /// Set or clear VALID.
    pub fn set_valid(&mut self, valid: bool) {
        if valid {
            self.0 |= Self::VALID;
        } else {
            self.0 &= !Self::VALID;
        }
    }

    /// Set or clear SENT_TO_BROKER.
    pub fn set_sent(&mut self, sent: bool) {
        if sent {
            self.0 |= Self::SENT;
        } else {
            self.0 &= !Self::SENT;
        }
    }
}

/// A local SID as the installation controller sees it.
///
/// Static SIDs and adjacency SIDs both reduce to this descriptor; the
/// owning table keeps whatever extra bookkeeping it needs around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSid {
    /// The 128-bit SID address. Uniqueness key across the process.
    pub addr: Ipv6Addr,
    /// Endpoint behavior.
    pub behavior: Behavior,
    /// Attached VRF, for table-lookup behaviors.
    pub vrf: Option<String>,
    /// Explicit outgoing interface.
    pub ifname: Option<String>,
    /// IPv6 adjacency, for End.X / uA.
    pub nexthop: Option<Ipv6Addr>,
    /// IPv4 nexthop, for End.DX4.
    pub nexthop4: Option<Ipv4Addr>,
    /// Bit-field structure, when the SID was carved from a locator.
    pub structure: Option<SidStructure>,
    /// Installation flags.
    pub flags: SidFlags,
}

impl LocalSid {
    /// Create a bare descriptor with no attributes.
    pub fn new(addr: Ipv6Addr, behavior: Behavior) -> Self {
        Self {
            addr,
            behavior,
            vrf: None,
            ifname: None,
            nexthop: None,
            nexthop4: None,
            structure: None,
            flags: SidFlags::new(),
        }
    }

    /// Whether every attribute required by the behavior is present.
    /// This is necessary but not sufficient for VALID: the referenced
    /// collaborators must also be live.
    pub fn attrs_complete(&self) -> bool {
        if self.behavior.requires_vrf() && self.vrf.is_none() {
            return false;
        }
        if self.behavior.requires_nexthop() && self.nexthop.is_none() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut f = SidFlags::new();
        assert!(!f.is_valid() && !f.is_sent());
        f.set_valid(true);
        f.set_sent(true);
        assert!(f.is_valid() && f.is_sent());
        f.set_valid(false);
        assert!(!f.is_valid() && f.is_sent());
    }

    #[test]
    fn test_attrs_complete_per_behavior() {
        let addr: Ipv6Addr = "fc00::1".parse().unwrap();

        let sid = LocalSid::new(addr, Behavior::End);
        assert!(sid.attrs_complete());

        let mut sid = LocalSid::new(addr, Behavior::EndDt4);
        assert!(!sid.attrs_complete());
        sid.vrf = Some("red".into());
        assert!(sid.attrs_complete());

        let mut sid = LocalSid::new(addr, Behavior::EndX);
        assert!(!sid.attrs_complete());
        sid.nexthop = Some("fe80::1".parse().unwrap());
        assert!(sid.attrs_complete());

        let mut sid = LocalSid::new(addr, Behavior::UA);
        sid.nexthop = Some("fe80::1".parse().unwrap());
        assert!(sid.attrs_complete());
    }
}
