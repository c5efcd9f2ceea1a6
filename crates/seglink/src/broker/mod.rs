//! Forwarding broker protocol: message model, wire codec and async
//! connections.

pub mod client;
pub mod codec;
pub mod proto;

pub use client::{BrokerConnection, BrokerPeer};
pub use proto::{BrokerEvent, BrokerRequest, RouteUpdate};
