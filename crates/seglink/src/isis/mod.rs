//! SRv6 support for the link-state protocol: TLV production only.

pub mod tlv;

pub use tlv::{Srv6EndXSid, Srv6LanEndXSid, Srv6LocatorEntry, Srv6LocatorTlv, SystemId, TlvEmit};
