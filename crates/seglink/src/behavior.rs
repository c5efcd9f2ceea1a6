//! SRv6 endpoint behaviors.
//!
//! The numeric codes are the ones used on the broker protocol and
//! inside the FPM local-SID encapsulation. The compressed-SID flavors
//! (uN, uA) are not separate actions at the forwarding boundary: they
//! resolve to End / End.X plus a NEXT-C-SID flavor descriptor.

use serde::{Deserialize, Serialize};

/// Default locator-block length attached to compressed-SID flavors.
pub const CSID_DEFAULT_BLOCK_LEN: u8 = 32;

/// Default locator-node + function length attached to compressed-SID
/// flavors.
pub const CSID_DEFAULT_NODE_FN_LEN: u8 = 16;

/// SRv6 endpoint behavior.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u32)]
pub enum Behavior {
    /// Unknown behavior.
    #[default]
    Unspec = 0,
    /// End: pop and continue.
    End = 1,
    /// End.X: pop and forward to an IPv6 adjacency.
    EndX = 2,
    /// End.T: pop and lookup in a table.
    EndT = 3,
    /// End.DX2: decap and forward the L2 frame.
    EndDx2 = 4,
    /// End.DX6: decap and forward the IPv6 packet.
    EndDx6 = 5,
    /// End.DX4: decap and forward the IPv4 packet.
    EndDx4 = 6,
    /// End.DT6: decap and lookup IPv6 in a table.
    EndDt6 = 7,
    /// End.DT4: decap and lookup IPv4 in a table.
    EndDt4 = 8,
    /// End.B6: insert SRH and forward.
    EndB6 = 9,
    /// End.B6.Encaps: encapsulate with a new header and SRH.
    #[serde(rename = "end-b6-encaps")]
    EndB6Encap = 10,
    /// End.BM: forward to a binding SID.
    EndBm = 11,
    /// End.S: source address lookup.
    EndS = 12,
    /// End.AS: static proxy.
    EndAs = 13,
    /// End.AM: masquerading proxy.
    EndAm = 14,
    /// End.BPF: run a BPF program.
    EndBpf = 15,
    /// End.DT46: decap and lookup IPv4 or IPv6 in a table.
    EndDt46 = 16,
    /// uDT4: compressed End.DT4.
    #[serde(rename = "udt4")]
    UDt4 = 100,
    /// uDT6: compressed End.DT6.
    #[serde(rename = "udt6")]
    UDt6 = 101,
    /// uDT46: compressed End.DT46.
    #[serde(rename = "udt46")]
    UDt46 = 102,
    /// uN: compressed End with the NEXT-C-SID flavor.
    #[serde(rename = "un")]
    UN = 103,
    /// uA: compressed End.X with the NEXT-C-SID flavor.
    #[serde(rename = "ua")]
    UA = 104,
}

impl Behavior {
    /// Numeric code carried in configuration and notifications.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Code sent to the forwarding broker and inside the FPM
    /// local-SID nest. uN and uA resolve to End and End.X; the caller
    /// attaches the NEXT-C-SID flavor descriptor.
    pub fn wire_code(self) -> u32 {
        match self {
            Self::UN => Self::End as u32,
            Self::UA => Self::EndX as u32,
            other => other as u32,
        }
    }

    /// IGP advertisement codepoint, for the behaviors this node ever
    /// advertises. Returns `None` for behaviors that stay local.
    pub fn advert_code(self) -> Option<u16> {
        match self {
            Self::End => Some(1),
            Self::EndX => Some(5),
            Self::UN => Some(43),
            Self::UA => Some(52),
            _ => None,
        }
    }

    /// Parse a numeric configuration code.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Self::Unspec,
            1 => Self::End,
            2 => Self::EndX,
            3 => Self::EndT,
            4 => Self::EndDx2,
            5 => Self::EndDx6,
            6 => Self::EndDx4,
            7 => Self::EndDt6,
            8 => Self::EndDt4,
            9 => Self::EndB6,
            10 => Self::EndB6Encap,
            11 => Self::EndBm,
            12 => Self::EndS,
            13 => Self::EndAs,
            14 => Self::EndAm,
            15 => Self::EndBpf,
            16 => Self::EndDt46,
            100 => Self::UDt4,
            101 => Self::UDt6,
            102 => Self::UDt46,
            103 => Self::UN,
            104 => Self::UA,
            _ => return None,
        })
    }

    /// Canonical display rendering ("End.DT4").
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Unspec => "unspec",
            Self::End => "End",
            Self::EndX => "End.X",
            Self::EndT => "End.T",
            Self::EndDx2 => "End.DX2",
            Self::EndDx6 => "End.DX6",
            Self::EndDx4 => "End.DX4",
            Self::EndDt6 => "End.DT6",
            Self::EndDt4 => "End.DT4",
            Self::EndB6 => "End.B6",
            Self::EndB6Encap => "End.B6.Encaps",
            Self::EndBm => "End.BM",
            Self::EndS => "End.S",
            Self::EndAs => "End.AS",
            Self::EndAm => "End.AM",
            Self::EndBpf => "End.BPF",
            Self::EndDt46 => "End.DT46",
            Self::UDt4 => "uDT4",
            Self::UDt6 => "uDT6",
            Self::UDt46 => "uDT46",
            Self::UN => "uN",
            Self::UA => "uA",
        }
    }

    /// Canonical configuration rendering ("end-dt4").
    pub fn cli_name(self) -> &'static str {
        match self {
            Self::Unspec => "unspec",
            Self::End => "end",
            Self::EndX => "end-x",
            Self::EndT => "end-t",
            Self::EndDx2 => "end-dx2",
            Self::EndDx6 => "end-dx6",
            Self::EndDx4 => "end-dx4",
            Self::EndDt6 => "end-dt6",
            Self::EndDt4 => "end-dt4",
            Self::EndB6 => "end-b6",
            Self::EndB6Encap => "end-b6-encaps",
            Self::EndBm => "end-bm",
            Self::EndS => "end-s",
            Self::EndAs => "end-as",
            Self::EndAm => "end-am",
            Self::EndBpf => "end-bpf",
            Self::EndDt46 => "end-dt46",
            Self::UDt4 => "udt4",
            Self::UDt6 => "udt6",
            Self::UDt46 => "udt46",
            Self::UN => "un",
            Self::UA => "ua",
        }
    }

    /// Parse a configuration rendering.
    pub fn from_cli(name: &str) -> Option<Self> {
        Some(match name {
            "end" => Self::End,
            "end-x" => Self::EndX,
            "end-t" => Self::EndT,
            "end-dx2" => Self::EndDx2,
            "end-dx6" => Self::EndDx6,
            "end-dx4" => Self::EndDx4,
            "end-dt6" => Self::EndDt6,
            "end-dt4" => Self::EndDt4,
            "end-b6" => Self::EndB6,
            "end-b6-encaps" => Self::EndB6Encap,
            "end-bm" => Self::EndBm,
            "end-s" => Self::EndS,
            "end-as" => Self::EndAs,
            "end-am" => Self::EndAm,
            "end-bpf" => Self::EndBpf,
            "end-dt46" => Self::EndDt46,
            "udt4" => Self::UDt4,
            "udt6" => Self::UDt6,
            "udt46" => Self::UDt46,
            "un" => Self::UN,
            "ua" => Self::UA,
            _ => return None,
        })
    }

    /// Whether this behavior is a compressed-SID (NEXT-C-SID) flavor.
    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::UDt4 | Self::UDt6 | Self::UDt46 | Self::UN | Self::UA
        )
    }

    /// Whether a SID with this behavior must carry a VRF attribute.
    pub fn requires_vrf(self) -> bool {
        matches!(
            self,
            Self::EndT
                | Self::EndDt4
                | Self::EndDt6
                | Self::EndDt46
                | Self::UDt4
                | Self::UDt6
                | Self::UDt46
        )
    }

    /// Whether a SID with this behavior must carry an IPv6 adjacency
    /// attribute.
    pub fn requires_nexthop(self) -> bool {
        matches!(self, Self::EndX | Self::UA)
    }
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes_are_stable() {
        assert_eq!(Behavior::End.code(), 1);
        assert_eq!(Behavior::EndX.code(), 2);
        assert_eq!(Behavior::EndDt6.code(), 7);
        assert_eq!(Behavior::EndDt4.code(), 8);
        assert_eq!(Behavior::EndDt46.code(), 16);
        assert_eq!(Behavior::UDt4.code(), 100);
        assert_eq!(Behavior::UDt6.code(), 101);
        assert_eq!(Behavior::UDt46.code(), 102);
        assert_eq!(Behavior::UN.code(), 103);
        assert_eq!(Behavior::UA.code(), 104);
    }

    #[test]
    fn test_compressed_wire_resolution() {
        assert_eq!(Behavior::UN.wire_code(), Behavior::End.code());
        assert_eq!(Behavior::UA.wire_code(), Behavior::EndX.code());
        // uDT* keep their own codes on the wire.
        assert_eq!(Behavior::UDt4.wire_code(), 100);
        assert_eq!(Behavior::End.wire_code(), 1);
    }

    #[test]
    fn test_renderings() {
        assert_eq!(Behavior::EndDt4.display_name(), "End.DT4");
        assert_eq!(Behavior::EndDt4.cli_name(), "end-dt4");
        assert_eq!(Behavior::EndB6Encap.display_name(), "End.B6.Encaps");
        assert_eq!(Behavior::UN.display_name(), "uN");
        assert_eq!(Behavior::from_cli("end-dt46"), Some(Behavior::EndDt46));
        assert_eq!(Behavior::from_cli("ua"), Some(Behavior::UA));
        assert_eq!(Behavior::from_cli("nope"), None);
    }

    #[test]
    fn test_cli_roundtrip() {
        for code in (0..=16).chain(100..=104) {
            let b = Behavior::from_code(code).unwrap();
            if b == Behavior::Unspec {
                continue;
            }
            assert_eq!(Behavior::from_cli(b.cli_name()), Some(b));
        }
    }

    #[test]
    fn test_serde_rendering_matches_cli() {
        // Configuration files and the CLI must agree on spelling.
        for code in (1..=16).chain(100..=104) {
            let b = Behavior::from_code(code).unwrap();
            let json = serde_json::to_string(&b).unwrap();
            assert_eq!(json, format!("\"{}\"", b.cli_name()));
            let back: Behavior = serde_json::from_str(&json).unwrap();
            assert_eq!(back, b);
        }
    }

    #[test]
    fn test_attribute_requirements() {
        assert!(Behavior::EndT.requires_vrf());
        assert!(Behavior::EndDt4.requires_vrf());
        assert!(Behavior::EndDt6.requires_vrf());
        assert!(Behavior::EndDt46.requires_vrf());
        assert!(Behavior::UDt46.requires_vrf());
        assert!(!Behavior::End.requires_vrf());

        assert!(Behavior::EndX.requires_nexthop());
        assert!(Behavior::UA.requires_nexthop());
        assert!(!Behavior::EndDt4.requires_nexthop());
    }

    #[test]
    fn test_advert_codes() {
        assert_eq!(Behavior::End.advert_code(), Some(1));
        assert_eq!(Behavior::EndX.advert_code(), Some(5));
        assert_eq!(Behavior::UN.advert_code(), Some(43));
        assert_eq!(Behavior::UA.advert_code(), Some(52));
        assert_eq!(Behavior::EndDt4.advert_code(), None);
    }
}
