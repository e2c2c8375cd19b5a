//! Addressing plan for the isolated segment
//!
//! Provides:
//! - Derivation of both endpoint addresses and the gateway from one subnet
//! - Validation of explicit overrides against that subnet

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Addresses used on the two sides of the virtual link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPlan {
    /// Isolated subnet shared by both endpoints
    subnet: Ipv4Net,
    /// Root-namespace side (endpoint A), a host route
    host_side: Ipv4Net,
    /// Namespace side (endpoint B), carries the subnet prefix
    namespace_side: Ipv4Net,
    /// Default-route next hop inside the namespace
    gateway: Ipv4Addr,
}

impl AddressPlan {
    /// Derive the plan from a subnet
    ///
    /// Endpoint A gets the first usable address as a /32, endpoint B the same
    /// address with the subnet prefix (each is only visible in its own
    /// namespace), and the namespace routes via the second usable address.
    pub fn from_subnet(subnet: Ipv4Net) -> Result<Self> {
        let subnet = subnet.trunc();
        let mut hosts = subnet.hosts();
        let first = hosts.next();
        let second = hosts.next();

        match (first, second) {
            (Some(first), Some(second)) if subnet.prefix_len() <= 30 => Ok(Self {
                subnet,
                host_side: host_route(first),
                namespace_side: Self::in_subnet(subnet, first)?,
                gateway: second,
            }),
            _ => Err(Error::ConfigValidation(format!(
                "Subnet {} is too small for an isolated path (need at least a /30)",
                subnet
            ))),
        }
    }

    /// Override the root-side address
    pub fn with_host_side(mut self, addr: Ipv4Net) -> Self {
        self.host_side = addr;
        self
    }

    /// Override the namespace-side address (must sit in the subnet)
    pub fn with_namespace_side(mut self, addr: Ipv4Addr) -> Result<Self> {
        self.namespace_side = Self::in_subnet(self.subnet, addr)?;
        Ok(self)
    }

    /// Override the gateway (must sit in the subnet)
    pub fn with_gateway(mut self, gateway: Ipv4Addr) -> Result<Self> {
        if !self.subnet.contains(&gateway) {
            return Err(Error::ConfigValidation(format!(
                "Gateway {} is not in subnet {}",
                gateway, self.subnet
            )));
        }
        self.gateway = gateway;
        Ok(self)
    }

    pub fn host_side(&self) -> Ipv4Net {
        self.host_side
    }

    pub fn namespace_side(&self) -> Ipv4Net {
        self.namespace_side
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Check the plan is routable from inside the namespace
    pub fn validate(&self) -> Result<()> {
        if !self.namespace_side.contains(&self.gateway) {
            return Err(Error::ConfigValidation(format!(
                "Gateway {} is not reachable from {}",
                self.gateway, self.namespace_side
            )));
        }
        if self.namespace_side.addr() == self.gateway {
            return Err(Error::ConfigValidation(format!(
                "Gateway {} collides with the namespace address",
                self.gateway
            )));
        }
        Ok(())
    }

    fn in_subnet(subnet: Ipv4Net, addr: Ipv4Addr) -> Result<Ipv4Net> {
        if !subnet.contains(&addr) || addr == subnet.network() || addr == subnet.broadcast() {
            return Err(Error::ConfigValidation(format!(
                "Address {} is not a usable host in subnet {}",
                addr, subnet
            )));
        }
        Ipv4Net::new(addr, subnet.prefix_len())
            .map_err(|e| Error::ConfigValidation(format!("Invalid prefix: {}", e)))
    }
}

fn host_route(addr: Ipv4Addr) -> Ipv4Net {
    Ipv4Net::from(addr)
}
