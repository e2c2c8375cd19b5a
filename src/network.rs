//! Linux networking primitives for the test path
//!
//! Provides:
//! - The host seam over kernel tables (`NetHost`) and its `ip`/`iptables` backend
//! - Veth pair creation and destruction
//! - Bridge membership of the root-side endpoint
//! - Namespace relocation, addressing and routing
//! - Source NAT rules
//! - The addressing plan for the isolated segment

pub mod bridge;
pub mod command;
pub mod host;
pub mod ip;
#[cfg(test)]
pub mod memory;
pub mod netns;
pub mod snat;
pub mod veth;

pub use bridge::Bridge;
pub use host::{LinkInfo, NetHost, SystemHost};
pub use ip::AddressPlan;
pub use netns::Namespace;
pub use snat::SnatRule;
pub use veth::VethPair;
