//! Isolated namespace handling
//!
//! Provides:
//! - Namespace creation and removal
//! - Relocation of an endpoint into the namespace
//! - Address assignment on either side
//! - The namespace default route

use crate::error::{Error, ErrorKind, Result};
use crate::network::NetHost;
use ipnet::{IpNet, Ipv4Net};
use std::net::Ipv4Addr;
use tracing::info;

/// A named network namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
}

impl Namespace {
    /// Refer to a namespace by name without touching the OS
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Create the namespace; an existing one is a `Conflict`
    pub fn create<H: NetHost>(host: &H, name: &str) -> Result<Self> {
        validate_name(name)?;
        if host.netns_exists(name)? {
            return Err(Error::os(
                ErrorKind::Conflict,
                name,
                "network namespace already exists",
            ));
        }
        host.add_netns(name)?;

        // Loopback comes up down in a fresh namespace
        if let Err(e) = host.set_up("lo", Some(name)) {
            if let Err(cleanup) = host.delete_netns(name) {
                tracing::warn!(netns = name, error = %cleanup, "failed to remove half-created namespace");
            }
            return Err(e);
        }
        info!(netns = name, "namespace created");
        Ok(Self::new(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists<H: NetHost>(&self, host: &H) -> Result<bool> {
        host.netns_exists(&self.name)
    }

    /// Remove the namespace and every interface inside it
    pub fn destroy<H: NetHost>(&self, host: &H) -> Result<()> {
        if !host.netns_exists(&self.name)? {
            return Err(Error::os(
                ErrorKind::NotFound,
                self.name.as_str(),
                "network namespace does not exist",
            ));
        }
        host.delete_netns(&self.name)?;
        info!(netns = %self.name, "namespace destroyed");
        Ok(())
    }

    /// Move a root-namespace endpoint in here
    ///
    /// The endpoint must carry no addresses of any family, link-local
    /// included; flush it first. Moving an
    /// addressed endpoint would leave routes behind in the root namespace.
    pub fn relocate<H: NetHost>(&self, host: &H, endpoint: &str) -> Result<()> {
        if host.link(endpoint, Some(&self.name))?.is_some()
            && host.link(endpoint, None)?.is_none()
        {
            info!(endpoint, netns = %self.name, "endpoint already relocated");
            return Ok(());
        }

        if host.link(endpoint, None)?.is_none() {
            return Err(Error::os(ErrorKind::NotFound, endpoint, "endpoint does not exist"));
        }

        let addrs = host.all_link_addresses(endpoint, None)?;
        if !addrs.is_empty() {
            let list: Vec<String> = addrs.iter().map(|a| a.to_string()).collect();
            return Err(Error::os(
                ErrorKind::Precondition,
                endpoint,
                format!("still has address(es) {}; flush before relocating", list.join(", ")),
            ));
        }

        if !self.exists(host)? {
            return Err(Error::os(
                ErrorKind::NotFound,
                self.name.as_str(),
                "network namespace does not exist",
            ));
        }

        host.move_to_netns(endpoint, &self.name)?;
        info!(endpoint, netns = %self.name, "endpoint relocated");
        Ok(())
    }

    /// Install the default route via `next_hop`
    ///
    /// Some endpoint in the namespace must have a subnet containing the next
    /// hop. An identical existing route is accepted as is.
    pub fn set_default_route<H: NetHost>(&self, host: &H, next_hop: Ipv4Addr) -> Result<()> {
        let on_link = host
            .addresses(Some(&self.name))?
            .iter()
            .any(|a| matches!(a.addr, IpNet::V4(net) if net.contains(&next_hop)));
        if !on_link {
            return Err(Error::os(
                ErrorKind::Precondition,
                self.name.as_str(),
                format!("next hop {} is not on any subnet in the namespace", next_hop),
            ));
        }

        match host.default_route(&self.name)? {
            Some(via) if via == next_hop => {
                info!(netns = %self.name, via = %next_hop, "default route already present");
                return Ok(());
            }
            Some(via) => {
                return Err(Error::os(
                    ErrorKind::Conflict,
                    self.name.as_str(),
                    format!("default route via {} already present", via),
                ));
            }
            None => {}
        }

        host.add_default_route(&self.name, next_hop)?;
        info!(netns = %self.name, via = %next_hop, "default route installed");
        Ok(())
    }

    /// Remove the default route
    pub fn clear_default_route<H: NetHost>(&self, host: &H) -> Result<()> {
        if !self.exists(host)? {
            return Err(Error::os(
                ErrorKind::NotFound,
                self.name.as_str(),
                "network namespace does not exist",
            ));
        }
        host.delete_default_route(&self.name)
    }
}

/// Remove every address from an endpoint
pub fn flush_addresses<H: NetHost>(host: &H, endpoint: &str, netns: Option<&str>) -> Result<()> {
    if host.link(endpoint, netns)?.is_none() {
        return Err(Error::os(ErrorKind::NotFound, endpoint, "endpoint does not exist"));
    }
    host.flush_addresses(endpoint, netns)?;
    info!(endpoint, netns = netns.unwrap_or("root"), "addresses flushed");
    Ok(())
}

/// Assign `cidr` to an endpoint and bring it up
///
/// With `netns` set the endpoint must already live inside that namespace.
/// Assigning an address the endpoint already has is a no-op.
pub fn configure<H: NetHost>(
    host: &H,
    endpoint: &str,
    cidr: Ipv4Net,
    netns: Option<&str>,
) -> Result<()> {
    if host.link(endpoint, netns)?.is_none() {
        return Err(match netns {
            Some(ns) => Error::os(
                ErrorKind::Precondition,
                endpoint,
                format!("not relocated into {} yet", ns),
            ),
            None => Error::os(ErrorKind::NotFound, endpoint, "endpoint does not exist"),
        });
    }

    if !host.link_addresses(endpoint, netns)?.contains(&cidr) {
        host.add_address(endpoint, netns, cidr)?;
    }
    host.set_up(endpoint, netns)?;
    info!(endpoint, address = %cidr, netns = netns.unwrap_or("root"), "address assigned");
    Ok(())
}

/// Check a namespace name is usable as a file under /run/netns
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(Error::ConfigValidation(format!(
            "Invalid namespace name '{}'",
            name
        )));
    }
    Ok(())
}
