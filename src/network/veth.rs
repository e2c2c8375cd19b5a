//! Veth pair management for the test path
//!
//! A veth pair is two Ethernet endpoints wired to each other. Endpoint A stays
//! in the root namespace next to the bridge, endpoint B is later moved into the
//! isolated namespace.

use crate::error::{Error, ErrorKind, Result};
use crate::network::NetHost;
use tracing::{info, warn};

/// Maximum interface name length on Linux (excluding the terminator)
pub const MAX_IFNAME_LEN: usize = libc::IF_NAMESIZE - 1;

/// A veth pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Root-side endpoint (A)
    host_side: String,
    /// Namespace-side endpoint (B)
    peer_side: String,
}

impl VethPair {
    /// Refer to a pair by its endpoint names without touching the OS
    pub fn new(host_side: &str, peer_side: &str) -> Self {
        Self {
            host_side: host_side.to_string(),
            peer_side: peer_side.to_string(),
        }
    }

    /// Create the pair
    ///
    /// Either both ends exist afterwards or neither does. An end that already
    /// exists is reported as `Conflict` without touching anything.
    pub fn create<H: NetHost>(host: &H, host_side: &str, peer_side: &str) -> Result<Self> {
        validate_name(host_side)?;
        validate_name(peer_side)?;
        if host_side == peer_side {
            return Err(Error::os(
                ErrorKind::Precondition,
                host_side,
                "both endpoints of a veth pair need distinct names",
            ));
        }

        for name in [host_side, peer_side] {
            if host.link(name, None)?.is_some() {
                return Err(Error::os(
                    ErrorKind::Conflict,
                    name,
                    "an interface with this name already exists",
                ));
            }
        }

        if let Err(e) = host.add_veth(host_side, peer_side) {
            // Clean up whatever half of the pair the kernel managed to create
            for name in [host_side, peer_side] {
                match host.link(name, None) {
                    Ok(Some(_)) => {
                        if let Err(cleanup) = host.delete_link(name, None) {
                            if !cleanup.is_not_found() {
                                warn!(endpoint = name, error = %cleanup, "failed to remove partial veth end");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(query) => warn!(endpoint = name, error = %query, "failed to query partial veth end"),
                }
            }
            return Err(e);
        }

        info!(a = host_side, b = peer_side, "veth pair created");
        Ok(Self::new(host_side, peer_side))
    }

    /// Destroy the pair (destroys both ends)
    ///
    /// The ends are looked for in the root namespace and, if given, in the
    /// namespace B may have been moved to. `NotFound` means no end existed.
    pub fn destroy<H: NetHost>(&self, host: &H, netns: Option<&str>) -> Result<()> {
        let mut candidates: Vec<(&str, Option<&str>)> =
            vec![(self.host_side.as_str(), None), (self.peer_side.as_str(), None)];
        if let Some(ns) = netns {
            if host.netns_exists(ns)? {
                candidates.push((self.peer_side.as_str(), Some(ns)));
                candidates.push((self.host_side.as_str(), Some(ns)));
            }
        }

        for (name, scope) in candidates {
            if host.link(name, scope)?.is_none() {
                continue;
            }
            match host.delete_link(name, scope) {
                Ok(()) => {
                    info!(endpoint = name, netns = scope.unwrap_or("root"), "veth pair destroyed");
                    return Ok(());
                }
                // Raced with the peer going away
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }

        Err(Error::os(
            ErrorKind::NotFound,
            self.host_side.as_str(),
            format!("neither {} nor {} exists", self.host_side, self.peer_side),
        ))
    }
}

/// Check an interface name is acceptable to the kernel
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN {
        return Err(Error::ConfigValidation(format!(
            "Interface name '{}' must be 1-{} characters",
            name, MAX_IFNAME_LEN
        )));
    }
    if name == "." || name == ".." || name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
        return Err(Error::ConfigValidation(format!(
            "Interface name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}
