//! Host networking primitives
//!
//! `NetHost` is the single seam between netpath and the kernel tables:
//! interfaces, addresses, namespaces, routes and NAT rules. `SystemHost`
//! drives the real kernel through `ip` (JSON output) and `iptables`.
//!
//! A `netns` of `None` means the root namespace.

use crate::error::{Error, Result};
use crate::network::command;
use crate::network::snat::SnatRule;
use ipnet::{IpNet, Ipv4Net};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};

/// Snapshot of one interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Interface name
    pub name: String,
    /// Link kind reported by the kernel (`veth`, `bridge`, ...)
    pub kind: Option<String>,
    /// Administratively up
    pub up: bool,
    /// Bridge this interface is a member of
    pub master: Option<String>,
}

/// An address of any family assigned to an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assigned {
    pub link: String,
    pub addr: IpNet,
}

/// Operations on the OS networking subsystem
///
/// Every mutating call returns once the OS has confirmed the change.
pub trait NetHost {
    /// Look up an interface; `Ok(None)` if it does not exist
    fn link(&self, name: &str, netns: Option<&str>) -> Result<Option<LinkInfo>>;

    /// Create a veth pair in the root namespace
    fn add_veth(&self, a: &str, b: &str) -> Result<()>;

    /// Delete an interface (for a veth end this removes the peer too)
    fn delete_link(&self, name: &str, netns: Option<&str>) -> Result<()>;

    /// Enslave an interface to a bridge
    fn set_master(&self, name: &str, bridge: &str) -> Result<()>;

    /// Release an interface from its bridge
    fn clear_master(&self, name: &str) -> Result<()>;

    /// Bring an interface administratively up
    fn set_up(&self, name: &str, netns: Option<&str>) -> Result<()>;

    /// Move a root-namespace interface into `netns`
    fn move_to_netns(&self, name: &str, netns: &str) -> Result<()>;

    /// All addresses of every family in a namespace
    fn addresses(&self, netns: Option<&str>) -> Result<Vec<Assigned>>;

    /// Assign an IPv4 address
    fn add_address(&self, name: &str, netns: Option<&str>, addr: Ipv4Net) -> Result<()>;

    /// Remove every address of every family from an interface
    fn flush_addresses(&self, name: &str, netns: Option<&str>) -> Result<()>;

    /// Whether a named namespace exists
    fn netns_exists(&self, name: &str) -> Result<bool>;

    /// Create a named namespace
    fn add_netns(&self, name: &str) -> Result<()>;

    /// Delete a named namespace and everything in it
    fn delete_netns(&self, name: &str) -> Result<()>;

    /// Next hop of the default route in `netns`
    fn default_route(&self, netns: &str) -> Result<Option<Ipv4Addr>>;

    fn add_default_route(&self, netns: &str, via: Ipv4Addr) -> Result<()>;

    fn delete_default_route(&self, netns: &str) -> Result<()>;

    /// SNAT rules currently active in nat POSTROUTING
    fn nat_rules(&self) -> Result<Vec<SnatRule>>;

    fn append_nat_rule(&self, rule: &SnatRule) -> Result<()>;

    fn delete_nat_rule(&self, rule: &SnatRule) -> Result<()>;

    /// IPv4 addresses of one interface
    fn link_addresses(&self, name: &str, netns: Option<&str>) -> Result<Vec<Ipv4Net>> {
        Ok(self
            .all_link_addresses(name, netns)?
            .into_iter()
            .filter_map(|a| match a {
                IpNet::V4(net) => Some(net),
                IpNet::V6(_) => None,
            })
            .collect())
    }

    /// Addresses of every family on one interface, link-local included
    fn all_link_addresses(&self, name: &str, netns: Option<&str>) -> Result<Vec<IpNet>> {
        Ok(self
            .addresses(netns)?
            .into_iter()
            .filter(|a| a.link == name)
            .map(|a| a.addr)
            .collect())
    }
}

// `ip -j` output shapes

#[derive(Debug, Deserialize)]
struct IpLink {
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    master: Option<String>,
    linkinfo: Option<IpLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct IpLinkInfo {
    info_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpAddrEntry {
    ifname: String,
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfo {
    family: String,
    local: String,
    prefixlen: u8,
}

#[derive(Debug, Deserialize)]
struct IpRoute {
    dst: String,
    gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpNetns {
    name: String,
}

/// Parse `ip -j` output; the tool prints nothing at all for empty tables
fn parse_json<T: for<'de> Deserialize<'de>>(command: &str, stdout: &str) -> Result<Vec<T>> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(stdout).map_err(|e| Error::OutputParse {
        command: command.to_string(),
        message: e.to_string(),
    })
}

/// Parse `ip -j addr show`, keeping both families
fn parse_addresses(stdout: &str) -> Result<Vec<Assigned>> {
    let entries: Vec<IpAddrEntry> = parse_json("ip addr show", stdout)?;

    let mut assigned = Vec::new();
    for entry in entries {
        for info in entry
            .addr_info
            .iter()
            .filter(|i| i.family == "inet" || i.family == "inet6")
        {
            let local: IpAddr = info.local.parse().map_err(|e| Error::OutputParse {
                command: "ip addr show".to_string(),
                message: format!("bad address '{}': {}", info.local, e),
            })?;
            let addr = IpNet::new(local, info.prefixlen).map_err(|e| Error::OutputParse {
                command: "ip addr show".to_string(),
                message: format!("bad prefix {}: {}", info.prefixlen, e),
            })?;
            assigned.push(Assigned {
                link: entry.ifname.clone(),
                addr,
            });
        }
    }
    Ok(assigned)
}

/// The real kernel, reached through `ip` and `iptables`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl SystemHost {
    pub fn new() -> Self {
        Self
    }
}

impl NetHost for SystemHost {
    fn link(&self, name: &str, netns: Option<&str>) -> Result<Option<LinkInfo>> {
        let stdout = match command::ip(netns, &["-j", "-d", "link", "show", "dev", name], name) {
            Ok(out) => out,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let links: Vec<IpLink> = parse_json("ip link show", &stdout)?;
        Ok(links.into_iter().find(|l| l.ifname == name).map(|l| LinkInfo {
            up: l.flags.iter().any(|f| f == "UP"),
            kind: l.linkinfo.and_then(|i| i.info_kind),
            master: l.master,
            name: l.ifname,
        }))
    }

    fn add_veth(&self, a: &str, b: &str) -> Result<()> {
        command::ip(None, &["link", "add", a, "type", "veth", "peer", "name", b], a)?;
        Ok(())
    }

    fn delete_link(&self, name: &str, netns: Option<&str>) -> Result<()> {
        command::ip(netns, &["link", "del", "dev", name], name)?;
        Ok(())
    }

    fn set_master(&self, name: &str, bridge: &str) -> Result<()> {
        command::ip(None, &["link", "set", "dev", name, "master", bridge], name)?;
        Ok(())
    }

    fn clear_master(&self, name: &str) -> Result<()> {
        command::ip(None, &["link", "set", "dev", name, "nomaster"], name)?;
        Ok(())
    }

    fn set_up(&self, name: &str, netns: Option<&str>) -> Result<()> {
        command::ip(netns, &["link", "set", "dev", name, "up"], name)?;
        Ok(())
    }

    fn move_to_netns(&self, name: &str, netns: &str) -> Result<()> {
        command::ip(None, &["link", "set", "dev", name, "netns", netns], name)?;
        Ok(())
    }

    fn addresses(&self, netns: Option<&str>) -> Result<Vec<Assigned>> {
        let stdout = command::ip(netns, &["-j", "addr", "show"], netns.unwrap_or("root"))?;
        parse_addresses(&stdout)
    }

    fn add_address(&self, name: &str, netns: Option<&str>, addr: Ipv4Net) -> Result<()> {
        let cidr = addr.to_string();
        command::ip(netns, &["addr", "add", &cidr, "dev", name], name)?;
        Ok(())
    }

    fn flush_addresses(&self, name: &str, netns: Option<&str>) -> Result<()> {
        command::ip(netns, &["addr", "flush", "dev", name], name)?;
        Ok(())
    }

    fn netns_exists(&self, name: &str) -> Result<bool> {
        let stdout = command::ip(None, &["-j", "netns", "list"], name)?;
        let namespaces: Vec<IpNetns> = parse_json("ip netns list", &stdout)?;
        Ok(namespaces.iter().any(|n| n.name == name))
    }

    fn add_netns(&self, name: &str) -> Result<()> {
        command::ip(None, &["netns", "add", name], name)?;
        Ok(())
    }

    fn delete_netns(&self, name: &str) -> Result<()> {
        command::ip(None, &["netns", "del", name], name)?;
        Ok(())
    }

    fn default_route(&self, netns: &str) -> Result<Option<Ipv4Addr>> {
        let stdout = command::ip(Some(netns), &["-j", "-4", "route", "show", "default"], netns)?;
        let routes: Vec<IpRoute> = parse_json("ip route show", &stdout)?;
        Ok(routes
            .into_iter()
            .filter(|r| r.dst == "default")
            .find_map(|r| r.gateway.and_then(|g| g.parse().ok())))
    }

    fn add_default_route(&self, netns: &str, via: Ipv4Addr) -> Result<()> {
        let via = via.to_string();
        command::ip(Some(netns), &["route", "add", "default", "via", &via], netns)?;
        Ok(())
    }

    fn delete_default_route(&self, netns: &str) -> Result<()> {
        command::ip(Some(netns), &["route", "del", "default"], netns)?;
        Ok(())
    }

    fn nat_rules(&self) -> Result<Vec<SnatRule>> {
        let stdout = command::iptables_nat(&["-S", "POSTROUTING"], "nat/POSTROUTING")?;
        Ok(stdout.lines().filter_map(SnatRule::parse_rule_spec).collect())
    }

    fn append_nat_rule(&self, rule: &SnatRule) -> Result<()> {
        let spec = rule.to_args();
        let mut args = vec!["-A", "POSTROUTING"];
        args.extend(spec.iter().map(String::as_str));
        command::iptables_nat(&args, &rule.uplink)?;
        Ok(())
    }

    fn delete_nat_rule(&self, rule: &SnatRule) -> Result<()> {
        let spec = rule.to_args();
        let mut args = vec!["-D", "POSTROUTING"];
        args.extend(spec.iter().map(String::as_str));
        command::iptables_nat(&args, &rule.uplink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_json() {
        let out = r#"[{"ifindex":7,"ifname":"veth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],"mtu":1500,"master":"br0","operstate":"UP","linkinfo":{"info_kind":"veth","info_slave_kind":"bridge"}}]"#;
        let links: Vec<IpLink> = parse_json("ip link show", out).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].ifname, "veth0");
        assert_eq!(links[0].master.as_deref(), Some("br0"));
        assert!(links[0].flags.iter().any(|f| f == "UP"));
        assert_eq!(
            links[0].linkinfo.as_ref().and_then(|i| i.info_kind.as_deref()),
            Some("veth")
        );
    }

    #[test]
    fn test_parse_addr_json() {
        let out = r#"[{"ifindex":1,"ifname":"lo","addr_info":[{"family":"inet","local":"127.0.0.1","prefixlen":8,"scope":"host"}]},{"ifindex":9,"ifname":"veth1","addr_info":[{"family":"inet","local":"1.1.1.1","prefixlen":24}]}]"#;
        let entries: Vec<IpAddrEntry> = parse_json("ip addr show", out).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].addr_info[0].local, "1.1.1.1");
        assert_eq!(entries[1].addr_info[0].prefixlen, 24);
    }

    #[test]
    fn test_parse_addresses_keeps_link_local() {
        let out = r#"[{"ifindex":9,"ifname":"veth1","addr_info":[{"family":"inet6","local":"fe80::a8c1:abff:fe12:3456","prefixlen":64,"scope":"link"}]},{"ifindex":10,"ifname":"veth0","addr_info":[{"family":"inet","local":"1.1.1.1","prefixlen":32},{"family":"inet6","local":"fe80::1","prefixlen":64}]}]"#;
        let assigned = parse_addresses(out).unwrap();
        assert_eq!(assigned.len(), 3);
        assert_eq!(assigned[0].link, "veth1");
        assert_eq!(
            assigned[0].addr,
            "fe80::a8c1:abff:fe12:3456/64".parse::<IpNet>().unwrap()
        );
        assert_eq!(assigned[1].addr, "1.1.1.1/32".parse::<IpNet>().unwrap());
    }

    #[test]
    fn test_parse_route_json() {
        let out = r#"[{"dst":"default","gateway":"1.1.1.2","dev":"veth1","flags":[]}]"#;
        let routes: Vec<IpRoute> = parse_json("ip route show", out).unwrap();
        assert_eq!(routes[0].gateway.as_deref(), Some("1.1.1.2"));
    }

    #[test]
    fn test_empty_output_is_empty_table() {
        let namespaces: Vec<IpNetns> = parse_json("ip netns list", "").unwrap();
        assert!(namespaces.is_empty());
    }

    #[test]
    fn test_garbage_output_is_parse_error() {
        let err = parse_json::<IpNetns>("ip netns list", "not json").unwrap_err();
        assert!(matches!(err, Error::OutputParse { .. }));
    }
}
