//! SRv6 control-plane library.
//!
//! This crate carries the shared machinery of the seglink daemons:
//! SID address math, the locator registry, the static SID table,
//! adjacency End.X SID management, the installation state machine,
//! the forwarding-broker protocol, and the FPM netlink mirror
//! encoder.
//!
//! # Example
//!
//! ```ignore
//! use seglink::behavior::Behavior;
//! use seglink::install::{InstallController, ResourceEvent};
//! use seglink::static_sid::{SidAttribute, StaticSidTable};
//!
//! let mut table = StaticSidTable::new();
//! table.add("fc00::2".parse()?, Behavior::EndDt4)?;
//! table.set_attribute("fc00::2".parse()?, SidAttribute::Vrf("red".into()))?;
//!
//! let mut ctl = InstallController::new();
//! let mut broker = seglink::broker::BrokerConnection::connect("/run/seglink.sock").await?;
//!
//! // The SID installs once the VRF is known and active.
//! ctl.handle_event(
//!     &ResourceEvent::VrfUp { name: "red".into(), table_id: 100, ifindex: 7 },
//!     &mut table,
//!     &mut broker,
//! )?;
//! broker.flush().await?;
//! ```

pub mod adjacency;
pub mod behavior;
pub mod broker;
pub mod error;
pub mod fpm;
pub mod install;
pub mod isis;
pub mod local_sid;
pub mod locator;
pub mod sid;
pub mod static_sid;

pub use behavior::Behavior;
pub use error::{Error, Result};
pub use local_sid::{LocalSid, SidFlags};
pub use sid::{SidStructure, transpose};
