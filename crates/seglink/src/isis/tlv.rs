//! SRv6 TLV production for the link-state protocol.
//!
//! Only the SRv6-relevant TLVs this node originates are built here:
//! the SRv6 Locator TLV and the End.X SID sub-TLVs (point-to-point
//! and LAN variants) with their SID Structure sub-sub-TLV. Nothing
//! in this module parses or floods LSPs.

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::sid::SidStructure;

/// SRv6 Locator TLV type.
pub const TLV_SRV6_LOCATOR: u8 = 27;

/// SRv6 End.X SID sub-TLV code (point-to-point adjacencies).
pub const SUB_TLV_SRV6_ENDX_SID: u8 = 43;

/// SRv6 LAN End.X SID sub-TLV code (broadcast adjacencies).
pub const SUB_TLV_SRV6_LAN_ENDX_SID: u8 = 44;

/// SRv6 SID Structure sub-sub-TLV code.
pub const SUB_SUB_TLV_SID_STRUCTURE: u8 = 1;

/// An emitted TLV: code, length, big-endian payload.
pub trait TlvEmit {
    /// TLV or sub-TLV code.
    fn code(&self) -> u8;
    /// Payload length in bytes.
    fn len(&self) -> u8;
    /// Append the payload.
    fn emit_payload(&self, buf: &mut BytesMut);

    /// Append code, length and payload.
    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u8(self.code());
        buf.put_u8(self.len());
        self.emit_payload(buf);
    }
}

/// IS-IS system identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemId(pub [u8; 6]);

fn emit_sid_structure(structure: &SidStructure, buf: &mut BytesMut) {
    buf.put_u8(SUB_SUB_TLV_SID_STRUCTURE);
    buf.put_u8(4);
    buf.put_slice(&structure.to_bytes());
}

/// SRv6 End.X SID sub-TLV, advertised on point-to-point adjacencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv6EndXSid {
    /// B / S / P flags.
    pub flags: u8,
    /// SR algorithm.
    pub algo: u8,
    /// Weight for load-balancing.
    pub weight: u8,
    /// Endpoint behavior codepoint.
    pub behavior: u16,
    /// The SID.
    pub sid: Ipv6Addr,
    /// SID structure advertised as a sub-sub-TLV.
    pub structure: Option<SidStructure>,
}

impl Srv6EndXSid {
    fn sub_sub_len(&self) -> u8 {
        // Code + length + 4 payload bytes per structure sub-sub-TLV.
        match self.structure {
            Some(_) => 6,
            None => 0,
        }
    }
}

impl TlvEmit for Srv6EndXSid {
    fn code(&self) -> u8 {
        SUB_TLV_SRV6_ENDX_SID
    }

    fn len(&self) -> u8 {
        // Flags(1) + Algo(1) + Weight(1) + Behavior(2) + SID(16) +
        // SubSubLen(1) + sub-sub-TLVs.
        22 + self.sub_sub_len()
    }

    fn emit_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags);
        buf.put_u8(self.algo);
        buf.put_u8(self.weight);
        buf.put_u16(self.behavior);
        buf.put_slice(&self.sid.octets());
        buf.put_u8(self.sub_sub_len());
        if let Some(structure) = &self.structure {
            emit_sid_structure(structure, buf);
        }
    }
}

/// SRv6 LAN End.X SID sub-TLV, advertised on broadcast adjacencies.
/// Identical to [`Srv6EndXSid`] with the neighbor system id prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv6LanEndXSid {
    /// Neighbor system identifier.
    pub neighbor: SystemId,
    /// B / S / P flags.
    pub flags: u8,
    /// SR algorithm.
    pub algo: u8,
    /// Weight for load-balancing.
    pub weight: u8,
    /// Endpoint behavior codepoint.
    pub behavior: u16,
    /// The SID.
    pub sid: Ipv6Addr,
    /// SID structure advertised as a sub-sub-TLV.
    pub structure: Option<SidStructure>,
}

impl Srv6LanEndXSid {
    fn sub_sub_len(&self) -> u8 {
        match self.structure {
            Some(_) => 6,
            None => 0,
        }
    }
}

impl TlvEmit for Srv6LanEndXSid {
    fn code(&self) -> u8 {
        SUB_TLV_SRV6_LAN_ENDX_SID
    }

    fn len(&self) -> u8 {
        // SystemId(6) + Flags(1) + Algo(1) + Weight(1) + Behavior(2) +
        // SID(16) + SubSubLen(1) + sub-sub-TLVs.
        28 + self.sub_sub_len()
    }

    fn emit_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.neighbor.0);
        buf.put_u8(self.flags);
        buf.put_u8(self.algo);
        buf.put_u8(self.weight);
        buf.put_u16(self.behavior);
        buf.put_slice(&self.sid.octets());
        buf.put_u8(self.sub_sub_len());
        if let Some(structure) = &self.structure {
            emit_sid_structure(structure, buf);
        }
    }
}

/// One locator entry inside the SRv6 Locator TLV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv6LocatorEntry {
    /// Advertisement metric.
    pub metric: u32,
    /// D flag and reserved bits.
    pub flags: u8,
    /// SR algorithm.
    pub algo: u8,
    /// Locator prefix length in bits.
    pub loc_size: u8,
    /// Locator prefix.
    pub prefix: Ipv6Addr,
}

impl Srv6LocatorEntry {
    fn prefix_octets(&self) -> usize {
        self.loc_size.div_ceil(8) as usize
    }

    fn len(&self) -> u8 {
        // Metric(4) + Flags(1) + Algo(1) + LocSize(1) + prefix +
        // SubTlvLen(1); no sub-TLVs are originated per entry.
        (7 + self.prefix_octets() + 1) as u8
    }

    fn emit(&self, buf: &mut BytesMut) {
        buf.put_u32(self.metric);
        buf.put_u8(self.flags);
        buf.put_u8(self.algo);
        buf.put_u8(self.loc_size);
        buf.put_slice(&self.prefix.octets()[..self.prefix_octets()]);
        buf.put_u8(0);
    }
}

/// SRv6 Locator TLV.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Srv6LocatorTlv {
    /// Multi-topology identifier.
    pub mtid: u16,
    /// Advertised locators.
    pub entries: Vec<Srv6LocatorEntry>,
}

impl TlvEmit for Srv6LocatorTlv {
    fn code(&self) -> u8 {
        TLV_SRV6_LOCATOR
    }

    fn len(&self) -> u8 {
        2 + self.entries.iter().map(|e| e.len()).sum::<u8>()
    }

    fn emit_payload(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtid & 0x0fff);
        for entry in &self.entries {
            entry.emit(buf);
        }
    }
}
