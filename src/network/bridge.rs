//! Bridge membership of the root-side endpoint
//!
//! Provides:
//! - Lookup of the pre-existing LAN bridge (never created or destroyed here)
//! - Attaching an endpoint as a forwarding member
//! - Releasing it from bridge control while leaving it up

use crate::error::{Error, ErrorKind, Result};
use crate::network::NetHost;
use tracing::info;

/// An existing bridge interface
#[derive(Debug, Clone)]
pub struct Bridge {
    /// Bridge interface name (e.g., "br0")
    name: String,
}

impl Bridge {
    /// Open an existing bridge interface
    pub fn open<H: NetHost>(host: &H, name: &str) -> Result<Self> {
        let link = host
            .link(name, None)?
            .ok_or_else(|| Error::os(ErrorKind::NotFound, name, "bridge does not exist"))?;

        if link.kind.as_deref() != Some("bridge") {
            return Err(Error::os(
                ErrorKind::Precondition,
                name,
                format!(
                    "interface is a {}, not a bridge",
                    link.kind.as_deref().unwrap_or("device")
                ),
            ));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Make `endpoint` a forwarding member and bring it up
    ///
    /// `peer` is the other end of the same pair; it must not be a member
    /// already, since only one end of a pair may sit on the bridge.
    pub fn attach<H: NetHost>(&self, host: &H, endpoint: &str, peer: &str) -> Result<()> {
        if let Some(p) = host.link(peer, None)? {
            if p.master.is_some() {
                return Err(Error::os(
                    ErrorKind::Precondition,
                    endpoint,
                    format!("peer {} is already a bridge member", peer),
                ));
            }
        }

        let link = host
            .link(endpoint, None)?
            .ok_or_else(|| Error::os(ErrorKind::NotFound, endpoint, "endpoint does not exist"))?;

        match link.master.as_deref() {
            Some(m) if m == self.name => {}
            Some(other) => {
                return Err(Error::os(
                    ErrorKind::Conflict,
                    endpoint,
                    format!("already a member of bridge {}", other),
                ));
            }
            None => host.set_master(endpoint, &self.name)?,
        }

        host.set_up(endpoint, None)?;
        info!(endpoint, bridge = %self.name, "attached to bridge");
        Ok(())
    }

    /// Release `endpoint` from bridge control, leaving it up
    pub fn detach<H: NetHost>(&self, host: &H, endpoint: &str) -> Result<()> {
        let link = host
            .link(endpoint, None)?
            .ok_or_else(|| Error::os(ErrorKind::NotFound, endpoint, "endpoint does not exist"))?;

        match link.master.as_deref() {
            Some(m) if m == self.name => host.clear_master(endpoint)?,
            Some(other) => {
                return Err(Error::os(
                    ErrorKind::Precondition,
                    endpoint,
                    format!("member of {} rather than {}", other, self.name),
                ));
            }
            None => {
                return Err(Error::os(
                    ErrorKind::NotFound,
                    endpoint,
                    format!("not a member of {}", self.name),
                ));
            }
        }

        if !link.up {
            host.set_up(endpoint, None)?;
        }
        info!(endpoint, bridge = %self.name, "detached from bridge control");
        Ok(())
    }

    /// Whether `endpoint` is currently a member of this bridge
    pub fn has_member<H: NetHost>(&self, host: &H, endpoint: &str) -> Result<bool> {
        Ok(host
            .link(endpoint, None)?
            .and_then(|l| l.master)
            .is_some_and(|m| m == self.name))
    }
}
