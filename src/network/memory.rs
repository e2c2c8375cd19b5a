//! In-memory kernel tables for tests
//!
//! Models interfaces, veth peering, bridge membership, namespaces, default
//! routes and the nat POSTROUTING chain closely enough to exercise the
//! provisioning sequence, with per-operation failure injection.

use crate::error::{Error, ErrorKind, Result};
use crate::network::host::{Assigned, LinkInfo, NetHost};
use crate::network::snat::SnatRule;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Host operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    AddVeth,
    DeleteLink,
    SetMaster,
    ClearMaster,
    SetUp,
    MoveToNetns,
    AddAddress,
    FlushAddresses,
    AddNetns,
    DeleteNetns,
    AddDefaultRoute,
    DeleteDefaultRoute,
    AppendNatRule,
    DeleteNatRule,
}

type Key = (Option<String>, String);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Iface {
    kind: String,
    peer: Option<Key>,
    up: bool,
    master: Option<String>,
    addrs: Vec<IpNet>,
}

/// Comparable copy of every table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tables {
    links: BTreeMap<Key, Iface>,
    namespaces: BTreeSet<String>,
    routes: BTreeMap<String, Ipv4Addr>,
    nat: Vec<SnatRule>,
}

#[derive(Debug, Default)]
struct Faults {
    remaining: HashMap<Op, (ErrorKind, u32)>,
    partial_veth: bool,
    calls: HashMap<Op, usize>,
}

/// Kernel stand-in
#[derive(Debug, Default)]
pub struct MemoryHost {
    tables: RefCell<Tables>,
    faults: RefCell<Faults>,
}

fn key(name: &str, netns: Option<&str>) -> Key {
    (netns.map(str::to_string), name.to_string())
}

/// Whether an IPv4 prefix on `addrs` covers `via`
fn on_link(addrs: &[IpNet], via: &Ipv4Addr) -> bool {
    addrs
        .iter()
        .any(|a| matches!(a, IpNet::V4(net) if net.contains(via)))
}

/// Link-local address the kernel assigns when a veth first comes up
fn link_local() -> IpNet {
    IpNet::V6(Ipv6Net::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1), 64).unwrap())
}

fn missing_device(name: &str) -> Error {
    Error::os(
        ErrorKind::NotFound,
        name,
        format!("Cannot find device \"{}\"", name),
    )
}

fn missing_netns(name: &str) -> Error {
    Error::os(
        ErrorKind::NotFound,
        name,
        format!("Cannot open network namespace \"{}\": No such file or directory", name),
    )
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing bridge in the root namespace
    pub fn with_bridge(self, name: &str) -> Self {
        self.tables.borrow_mut().links.insert(
            key(name, None),
            Iface {
                kind: "bridge".to_string(),
                peer: None,
                up: true,
                master: None,
                addrs: Vec::new(),
            },
        );
        self
    }

    /// Seed a plain interface in the root namespace
    pub fn with_device(self, name: &str) -> Self {
        self.tables.borrow_mut().links.insert(
            key(name, None),
            Iface {
                kind: "dummy".to_string(),
                peer: None,
                up: false,
                master: None,
                addrs: Vec::new(),
            },
        );
        self
    }

    /// Make every call of `op` fail with `kind`
    pub fn fail(&self, op: Op, kind: ErrorKind) {
        self.fail_times(op, kind, u32::MAX);
    }

    /// Make the next `times` calls of `op` fail with `kind`
    pub fn fail_times(&self, op: Op, kind: ErrorKind, times: u32) {
        self.faults.borrow_mut().remaining.insert(op, (kind, times));
    }

    /// Make veth creation leave the first end behind and then fail
    pub fn fail_veth_partway(&self) {
        let mut faults = self.faults.borrow_mut();
        faults.partial_veth = true;
        faults.remaining.insert(Op::AddVeth, (ErrorKind::Unknown, u32::MAX));
    }

    /// Number of times `op` was invoked
    pub fn calls(&self, op: Op) -> usize {
        self.faults.borrow().calls.get(&op).copied().unwrap_or(0)
    }

    /// Copy of all tables
    pub fn snapshot(&self) -> Tables {
        self.tables.borrow().clone()
    }

    fn check(&self, op: Op, entity: &str) -> Result<()> {
        let mut faults = self.faults.borrow_mut();
        *faults.calls.entry(op).or_default() += 1;
        if let Some((kind, left)) = faults.remaining.get_mut(&op) {
            if *left > 0 {
                *left -= 1;
                let kind = *kind;
                return Err(Error::os(kind, entity, format!("injected {:?} failure", op)));
            }
        }
        Ok(())
    }

    fn remove_with_peer(tables: &mut Tables, k: &Key) {
        if let Some(iface) = tables.links.remove(k) {
            if let Some(peer) = iface.peer {
                tables.links.remove(&peer);
            }
        }
        Self::prune_routes(tables);
    }

    /// Drop default routes whose next hop is no longer on-link
    fn prune_routes(tables: &mut Tables) {
        let links = &tables.links;
        tables.routes.retain(|ns, via| {
            let via: &Ipv4Addr = via;
            links
                .iter()
                .filter(|((n, _), _)| n.as_deref() == Some(ns.as_str()))
                .any(|(_, i)| on_link(&i.addrs, via))
        });
    }
}

impl NetHost for MemoryHost {
    fn link(&self, name: &str, netns: Option<&str>) -> Result<Option<LinkInfo>> {
        let tables = self.tables.borrow();
        Ok(tables.links.get(&key(name, netns)).map(|i| LinkInfo {
            name: name.to_string(),
            kind: Some(i.kind.clone()),
            up: i.up,
            master: i.master.clone(),
        }))
    }

    fn add_veth(&self, a: &str, b: &str) -> Result<()> {
        let partial = self.faults.borrow().partial_veth;
        if let Err(e) = self.check(Op::AddVeth, a) {
            if partial {
                self.tables.borrow_mut().links.insert(
                    key(a, None),
                    Iface {
                        kind: "veth".to_string(),
                        peer: None,
                        up: false,
                        master: None,
                        addrs: Vec::new(),
                    },
                );
            }
            return Err(e);
        }

        let mut tables = self.tables.borrow_mut();
        for name in [a, b] {
            if tables.links.contains_key(&key(name, None)) {
                return Err(Error::os(
                    ErrorKind::Conflict,
                    name,
                    "RTNETLINK answers: File exists",
                ));
            }
        }

        for (name, peer) in [(a, b), (b, a)] {
            tables.links.insert(
                key(name, None),
                Iface {
                    kind: "veth".to_string(),
                    peer: Some(key(peer, None)),
                    up: false,
                    master: None,
                    addrs: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn delete_link(&self, name: &str, netns: Option<&str>) -> Result<()> {
        self.check(Op::DeleteLink, name)?;
        let mut tables = self.tables.borrow_mut();
        let k = key(name, netns);
        if !tables.links.contains_key(&k) {
            return Err(missing_device(name));
        }
        Self::remove_with_peer(&mut tables, &k);
        Ok(())
    }

    fn set_master(&self, name: &str, bridge: &str) -> Result<()> {
        self.check(Op::SetMaster, name)?;
        let mut tables = self.tables.borrow_mut();
        match tables.links.get(&key(bridge, None)) {
            Some(b) if b.kind == "bridge" => {}
            Some(_) => {
                return Err(Error::os(
                    ErrorKind::Unknown,
                    name,
                    format!("{} is not a bridge", bridge),
                ));
            }
            None => return Err(missing_device(bridge)),
        }
        let iface = tables
            .links
            .get_mut(&key(name, None))
            .ok_or_else(|| missing_device(name))?;
        iface.master = Some(bridge.to_string());
        Ok(())
    }

    fn clear_master(&self, name: &str) -> Result<()> {
        self.check(Op::ClearMaster, name)?;
        let mut tables = self.tables.borrow_mut();
        let iface = tables
            .links
            .get_mut(&key(name, None))
            .ok_or_else(|| missing_device(name))?;
        iface.master = None;
        Ok(())
    }

    fn set_up(&self, name: &str, netns: Option<&str>) -> Result<()> {
        self.check(Op::SetUp, name)?;
        let mut tables = self.tables.borrow_mut();
        let iface = tables
            .links
            .get_mut(&key(name, netns))
            .ok_or_else(|| missing_device(name))?;
        // IPv6 autoconfiguration gives a veth its link-local address on the way up
        if !iface.up
            && iface.kind == "veth"
            && !iface.addrs.iter().any(|a| matches!(a, IpNet::V6(_)))
        {
            iface.addrs.push(link_local());
        }
        iface.up = true;
        Ok(())
    }

    fn move_to_netns(&self, name: &str, netns: &str) -> Result<()> {
        self.check(Op::MoveToNetns, name)?;
        let mut tables = self.tables.borrow_mut();
        if !tables.namespaces.contains(netns) {
            return Err(missing_netns(netns));
        }
        let from = key(name, None);
        let to = key(name, Some(netns));
        if tables.links.contains_key(&to) {
            return Err(Error::os(ErrorKind::Conflict, name, "RTNETLINK answers: File exists"));
        }
        let mut iface = tables.links.remove(&from).ok_or_else(|| missing_device(name))?;

        // The kernel takes the device down and drops its addresses on the way
        iface.up = false;
        iface.master = None;
        iface.addrs.clear();

        if let Some(peer) = iface.peer.clone() {
            if let Some(p) = tables.links.get_mut(&peer) {
                p.peer = Some(to.clone());
            }
        }
        tables.links.insert(to, iface);
        Ok(())
    }

    fn addresses(&self, netns: Option<&str>) -> Result<Vec<Assigned>> {
        let tables = self.tables.borrow();
        if let Some(ns) = netns {
            if !tables.namespaces.contains(ns) {
                return Err(missing_netns(ns));
            }
        }
        Ok(tables
            .links
            .iter()
            .filter(|((n, _), _)| n.as_deref() == netns)
            .flat_map(|((_, name), i)| {
                i.addrs.iter().map(move |a| Assigned {
                    link: name.clone(),
                    addr: *a,
                })
            })
            .collect())
    }

    fn add_address(&self, name: &str, netns: Option<&str>, addr: Ipv4Net) -> Result<()> {
        self.check(Op::AddAddress, name)?;
        let mut tables = self.tables.borrow_mut();
        let iface = tables
            .links
            .get_mut(&key(name, netns))
            .ok_or_else(|| missing_device(name))?;
        let addr = IpNet::V4(addr);
        if iface.addrs.contains(&addr) {
            return Err(Error::os(ErrorKind::Conflict, name, "RTNETLINK answers: File exists"));
        }
        iface.addrs.push(addr);
        Ok(())
    }

    fn flush_addresses(&self, name: &str, netns: Option<&str>) -> Result<()> {
        self.check(Op::FlushAddresses, name)?;
        let mut tables = self.tables.borrow_mut();
        let iface = tables
            .links
            .get_mut(&key(name, netns))
            .ok_or_else(|| missing_device(name))?;
        iface.addrs.clear();
        Self::prune_routes(&mut tables);
        Ok(())
    }

    fn netns_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.borrow().namespaces.contains(name))
    }

    fn add_netns(&self, name: &str) -> Result<()> {
        self.check(Op::AddNetns, name)?;
        let mut tables = self.tables.borrow_mut();
        if !tables.namespaces.insert(name.to_string()) {
            return Err(Error::os(
                ErrorKind::Conflict,
                name,
                format!("Cannot create namespace file \"/run/netns/{}\": File exists", name),
            ));
        }
        tables.links.insert(
            key("lo", Some(name)),
            Iface {
                kind: "loopback".to_string(),
                peer: None,
                up: false,
                master: None,
                addrs: Vec::new(),
            },
        );
        Ok(())
    }

    fn delete_netns(&self, name: &str) -> Result<()> {
        self.check(Op::DeleteNetns, name)?;
        let mut tables = self.tables.borrow_mut();
        if !tables.namespaces.remove(name) {
            return Err(missing_netns(name));
        }
        let inside: Vec<Key> = tables
            .links
            .keys()
            .filter(|(n, _)| n.as_deref() == Some(name))
            .cloned()
            .collect();
        for k in inside {
            Self::remove_with_peer(&mut tables, &k);
        }
        tables.routes.remove(name);
        Ok(())
    }

    fn default_route(&self, netns: &str) -> Result<Option<Ipv4Addr>> {
        let tables = self.tables.borrow();
        if !tables.namespaces.contains(netns) {
            return Err(missing_netns(netns));
        }
        Ok(tables.routes.get(netns).copied())
    }

    fn add_default_route(&self, netns: &str, via: Ipv4Addr) -> Result<()> {
        self.check(Op::AddDefaultRoute, netns)?;
        let mut tables = self.tables.borrow_mut();
        if !tables.namespaces.contains(netns) {
            return Err(missing_netns(netns));
        }
        if tables.routes.contains_key(netns) {
            return Err(Error::os(ErrorKind::Conflict, netns, "RTNETLINK answers: File exists"));
        }
        let on_link = tables
            .links
            .iter()
            .filter(|((n, _), _)| n.as_deref() == Some(netns))
            .any(|(_, i)| on_link(&i.addrs, &via));
        if !on_link {
            return Err(Error::os(
                ErrorKind::Unknown,
                netns,
                "Error: Nexthop has invalid gateway.",
            ));
        }
        tables.routes.insert(netns.to_string(), via);
        Ok(())
    }

    fn delete_default_route(&self, netns: &str) -> Result<()> {
        self.check(Op::DeleteDefaultRoute, netns)?;
        let mut tables = self.tables.borrow_mut();
        if !tables.namespaces.contains(netns) {
            return Err(missing_netns(netns));
        }
        if tables.routes.remove(netns).is_none() {
            return Err(Error::os(
                ErrorKind::NotFound,
                netns,
                "RTNETLINK answers: No such process",
            ));
        }
        Ok(())
    }

    fn nat_rules(&self) -> Result<Vec<SnatRule>> {
        Ok(self.tables.borrow().nat.clone())
    }

    fn append_nat_rule(&self, rule: &SnatRule) -> Result<()> {
        self.check(Op::AppendNatRule, &rule.uplink)?;
        self.tables.borrow_mut().nat.push(rule.clone());
        Ok(())
    }

    fn delete_nat_rule(&self, rule: &SnatRule) -> Result<()> {
        self.check(Op::DeleteNatRule, &rule.uplink)?;
        let mut tables = self.tables.borrow_mut();
        match tables.nat.iter().position(|r| r == rule) {
            Some(i) => {
                tables.nat.remove(i);
                Ok(())
            }
            None => Err(Error::os(
                ErrorKind::NotFound,
                rule.uplink.as_str(),
                "iptables: Bad rule (does a matching rule exist in that chain?).",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleting_one_end_removes_peer_across_namespaces() {
        let host = MemoryHost::new();
        host.add_veth("veth0", "veth1").unwrap();
        host.add_netns("test-ns").unwrap();
        host.move_to_netns("veth1", "test-ns").unwrap();

        host.delete_link("veth0", None).unwrap();
        assert!(host.link("veth1", Some("test-ns")).unwrap().is_none());
    }

    #[test]
    fn test_deleting_namespace_removes_contained_links_and_peers() {
        let host = MemoryHost::new();
        host.add_veth("veth0", "veth1").unwrap();
        host.add_netns("test-ns").unwrap();
        host.move_to_netns("veth1", "test-ns").unwrap();

        host.delete_netns("test-ns").unwrap();
        assert!(host.link("veth0", None).unwrap().is_none());
        assert!(!host.netns_exists("test-ns").unwrap());
    }

    #[test]
    fn test_raising_veth_adds_link_local() {
        let host = MemoryHost::new();
        host.add_veth("veth0", "veth1").unwrap();
        host.set_up("veth1", None).unwrap();
        host.set_up("veth1", None).unwrap();

        let all = host.all_link_addresses("veth1", None).unwrap();
        assert_eq!(all, vec!["fe80::1/64".parse::<IpNet>().unwrap()]);
        // IPv4 view stays empty
        assert!(host.link_addresses("veth1", None).unwrap().is_empty());

        host.flush_addresses("veth1", None).unwrap();
        assert!(host.all_link_addresses("veth1", None).unwrap().is_empty());
    }

    #[test]
    fn test_route_pruned_when_next_hop_leaves() {
        let host = MemoryHost::new();
        host.add_veth("veth0", "veth1").unwrap();
        host.add_netns("test-ns").unwrap();
        host.move_to_netns("veth1", "test-ns").unwrap();
        host.add_address("veth1", Some("test-ns"), "1.1.1.1/24".parse().unwrap())
            .unwrap();
        host.add_default_route("test-ns", "1.1.1.2".parse().unwrap()).unwrap();

        host.flush_addresses("veth1", Some("test-ns")).unwrap();
        assert_eq!(host.default_route("test-ns").unwrap(), None);
    }

    #[test]
    fn test_injected_failure_counts_down() {
        let host = MemoryHost::new();
        host.fail_times(Op::AddNetns, ErrorKind::Unknown, 1);
        assert!(host.add_netns("a").is_err());
        assert!(host.add_netns("a").is_ok());
        assert_eq!(host.calls(Op::AddNetns), 2);
    }
}
