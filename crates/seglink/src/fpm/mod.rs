//! FPM mirror encoding.
//!
//! Produces Netlink-compatible RTM_NEWROUTE / RTM_DELROUTE frames
//! for routes the broker mirrors to a downstream Forwarding Plane
//! Manager, including the SRv6 local-SID and SRv6 route
//! encapsulations. Encoding is allocation-free over a caller-owned
//! buffer; the whole module is encode-only.

pub mod frame;
pub mod header;
pub mod netlink;
pub mod route;

pub use frame::FrameWriter;
pub use route::{FpmEncap, FpmNextHop, FpmRoute, LocalSidEncap};
