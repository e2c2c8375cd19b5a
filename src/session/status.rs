//! Live status of a test path
//!
//! Reads the OS tables and infers the furthest lifecycle state the path has
//! reached. Used by `netpath status` and by the readiness check that closes
//! the provisioning sequence.

use crate::error::Result;
use crate::manifest::PathSpec;
use crate::network::NetHost;
use crate::session::state::State;
use ipnet::Ipv4Net;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// Observed state of one veth end
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    /// Namespace the end lives in (`None` for root)
    pub netns: Option<String>,
    pub up: bool,
    pub master: Option<String>,
    pub addresses: Vec<Ipv4Net>,
}

/// Everything netpath can observe about one path
#[derive(Debug, Clone, Serialize)]
pub struct PathStatus {
    pub bridge: String,
    pub bridge_present: bool,
    pub namespace: String,
    pub namespace_present: bool,
    pub host_endpoint: Option<EndpointStatus>,
    pub namespace_endpoint: Option<EndpointStatus>,
    pub default_route: Option<Ipv4Addr>,
    pub snat_rules: usize,
    pub state: String,
    #[serde(skip)]
    inferred: State,
}

/// Look up an endpoint in root first, then in the namespace
fn observe<H: NetHost>(
    host: &H,
    name: &str,
    namespace: &str,
    namespace_present: bool,
) -> Result<Option<EndpointStatus>> {
    let mut places = vec![None];
    if namespace_present {
        places.push(Some(namespace));
    }

    for netns in places {
        if let Some(link) = host.link(name, netns)? {
            return Ok(Some(EndpointStatus {
                name: link.name,
                netns: netns.map(str::to_string),
                up: link.up,
                master: link.master,
                addresses: host.link_addresses(name, netns)?,
            }));
        }
    }
    Ok(None)
}

/// Read the live state of `spec` from the OS
pub fn inspect<H: NetHost>(host: &H, spec: &PathSpec) -> Result<PathStatus> {
    let bridge_present = host
        .link(&spec.bridge, None)?
        .is_some_and(|l| l.kind.as_deref() == Some("bridge"));
    let namespace_present = host.netns_exists(&spec.namespace)?;

    let a = observe(host, &spec.host_endpoint, &spec.namespace, namespace_present)?;
    let b = observe(host, &spec.namespace_endpoint, &spec.namespace, namespace_present)?;

    let default_route = if namespace_present {
        host.default_route(&spec.namespace)?
    } else {
        None
    };

    let snat_rules = host
        .nat_rules()?
        .iter()
        .filter(|r| **r == spec.snat)
        .count();

    let inferred = infer(spec, a.as_ref(), b.as_ref(), default_route, snat_rules);

    Ok(PathStatus {
        bridge: spec.bridge.clone(),
        bridge_present,
        namespace: spec.namespace.clone(),
        namespace_present,
        host_endpoint: a,
        namespace_endpoint: b,
        default_route,
        snat_rules,
        state: inferred.to_string(),
        inferred,
    })
}

fn infer(
    spec: &PathSpec,
    a: Option<&EndpointStatus>,
    b: Option<&EndpointStatus>,
    route: Option<Ipv4Addr>,
    snat_rules: usize,
) -> State {
    let (Some(a), Some(b)) = (a, b) else {
        return State::Uncreated;
    };

    // A never leaves root; anything else is someone else's link
    if a.netns.is_some() {
        return State::Uncreated;
    }

    if b.netns.as_deref() == Some(spec.namespace.as_str()) {
        if !b.addresses.contains(&spec.plan.namespace_side()) {
            return State::Relocated;
        }
        if route != Some(spec.plan.gateway()) {
            return State::NamespaceAddressed;
        }
        if snat_rules == 0 || !b.up || !a.addresses.contains(&spec.plan.host_side()) {
            return State::Routed;
        }
        return State::Ready;
    }

    if a.master.as_deref() == Some(spec.bridge.as_str()) {
        if a.up && b.up {
            return State::LinkUp;
        }
        return State::BridgeAttached;
    }

    if a.addresses.contains(&spec.plan.host_side()) {
        return State::HostAddressed;
    }
    if a.up && b.up {
        return State::BridgeDetached;
    }
    State::Created
}

impl PathStatus {
    /// Furthest lifecycle state reached
    pub fn inferred_state(&self) -> State {
        self.inferred
    }

    pub fn is_ready(&self) -> bool {
        self.inferred == State::Ready
    }
}

fn describe(endpoint: &Option<EndpointStatus>) -> String {
    match endpoint {
        None => "absent".to_string(),
        Some(e) => {
            let addrs: Vec<String> = e.addresses.iter().map(|a| a.to_string()).collect();
            format!(
                "{} in {}, {}{}{}",
                e.name,
                e.netns.as_deref().unwrap_or("root"),
                if e.up { "up" } else { "down" },
                e.master
                    .as_ref()
                    .map(|m| format!(", master {}", m))
                    .unwrap_or_default(),
                if addrs.is_empty() {
                    String::new()
                } else {
                    format!(", {}", addrs.join(" "))
                }
            )
        }
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<12} {}", "STATE", self.state)?;
        writeln!(
            f,
            "{:<12} {} ({})",
            "BRIDGE",
            self.bridge,
            if self.bridge_present { "present" } else { "missing" }
        )?;
        writeln!(
            f,
            "{:<12} {} ({})",
            "NAMESPACE",
            self.namespace,
            if self.namespace_present { "present" } else { "absent" }
        )?;
        writeln!(f, "{:<12} {}", "ENDPOINT A", describe(&self.host_endpoint))?;
        writeln!(f, "{:<12} {}", "ENDPOINT B", describe(&self.namespace_endpoint))?;
        writeln!(
            f,
            "{:<12} {}",
            "ROUTE",
            self.default_route
                .map(|r| format!("default via {}", r))
                .unwrap_or_else(|| "none".to_string())
        )?;
        write!(f, "{:<12} {}", "SNAT", self.snat_rules)
    }
}
