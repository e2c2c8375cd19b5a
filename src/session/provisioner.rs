//! Provisioning sequence for one test path
//!
//! Runs the ordered transitions that take a path from nothing to READY,
//! records every entity it creates in a [`Ledger`], and on failure tears down
//! exactly those entities in reverse order before reporting the failing step.

use crate::error::{Error, ErrorKind, Result};
use crate::manifest::{PathSpec, RetryConfig};
use crate::network::netns::{self, Namespace};
use crate::network::snat;
use crate::network::{Bridge, NetHost, VethPair};
use crate::session::ledger::{Ledger, Resource};
use crate::session::retry::with_retry;
use crate::session::state::{LinkLifecycle, State};
use crate::session::status::{self, PathStatus};
use std::fmt;
use tracing::{error, info, warn};

/// One transition of the provisioning sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    InstallSnat,
    CreateLink,
    AttachBridge,
    RaiseLink,
    DetachBridge,
    AddressHost,
    CreateNamespace,
    Relocate,
    AddressNamespace,
    Route,
    Verify,
}

impl Step {
    /// Every step in execution order
    pub fn sequence() -> &'static [Step] {
        &[
            Step::InstallSnat,
            Step::CreateLink,
            Step::AttachBridge,
            Step::RaiseLink,
            Step::DetachBridge,
            Step::AddressHost,
            Step::CreateNamespace,
            Step::Relocate,
            Step::AddressNamespace,
            Step::Route,
            Step::Verify,
        ]
    }

    /// State the link reaches when this step completes
    ///
    /// The NAT rule and the namespace live outside the link lifecycle.
    pub fn target_state(&self) -> Option<State> {
        match self {
            Step::InstallSnat | Step::CreateNamespace => None,
            Step::CreateLink => Some(State::Created),
            Step::AttachBridge => Some(State::BridgeAttached),
            Step::RaiseLink => Some(State::LinkUp),
            Step::DetachBridge => Some(State::BridgeDetached),
            Step::AddressHost => Some(State::HostAddressed),
            Step::Relocate => Some(State::Relocated),
            Step::AddressNamespace => Some(State::NamespaceAddressed),
            Step::Route => Some(State::Routed),
            Step::Verify => Some(State::Ready),
        }
    }

    /// Entity the step acts on
    pub fn entity(&self, spec: &PathSpec) -> String {
        match self {
            Step::InstallSnat => spec.bridge.clone(),
            Step::CreateLink | Step::AttachBridge | Step::DetachBridge | Step::AddressHost => {
                spec.host_endpoint.clone()
            }
            Step::RaiseLink => format!("{},{}", spec.host_endpoint, spec.namespace_endpoint),
            Step::Relocate | Step::AddressNamespace | Step::Verify => {
                spec.namespace_endpoint.clone()
            }
            Step::CreateNamespace | Step::Route => spec.namespace.clone(),
        }
    }

    /// Human-readable account of what the step will do
    pub fn action(&self, spec: &PathSpec) -> String {
        let a = &spec.host_endpoint;
        let b = &spec.namespace_endpoint;
        let ns = &spec.namespace;
        match self {
            Step::InstallSnat => format!(
                "iptables -t nat -A POSTROUTING {}",
                spec.snat.to_args().join(" ")
            ),
            Step::CreateLink => format!("ip link add {} type veth peer name {}", a, b),
            Step::AttachBridge => format!("ip link set {} master {} up", a, spec.bridge),
            Step::RaiseLink => format!("ip link set {} up; ip link set {} up", a, b),
            Step::DetachBridge => format!("ip link set {} nomaster", a),
            Step::AddressHost => format!("ip addr add {} dev {}", spec.plan.host_side(), a),
            Step::CreateNamespace => format!("ip netns add {}; ip -n {} link set lo up", ns, ns),
            Step::Relocate => format!("ip addr flush dev {}; ip link set {} netns {}", b, b, ns),
            Step::AddressNamespace => format!(
                "ip -n {} addr add {} dev {}; ip -n {} link set {} up",
                ns,
                spec.plan.namespace_side(),
                b,
                ns,
                b
            ),
            Step::Route => format!(
                "ip -n {} route add default via {}",
                ns,
                spec.plan.gateway()
            ),
            Step::Verify => "read back placement, addresses, route and snat".to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target_state() {
            Some(state) => write!(f, "{}", state),
            None => match self {
                Step::InstallSnat => write!(f, "SNAT_INSTALLED"),
                _ => write!(f, "NAMESPACE_CREATED"),
            },
        }
    }
}

/// One line of a dry-run plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: Step,
    pub entity: String,
    pub action: String,
}

impl fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<20} {:<12} {}", self.step.to_string(), self.entity, self.action)
    }
}

/// Outcome of a teardown
#[derive(Debug, Default, Clone)]
pub struct TeardownReport {
    /// Resources actually removed
    pub removed: Vec<Resource>,
    /// Resources that were already gone
    pub warnings: Vec<String>,
    /// Resources that could not be removed
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A provisioning session over one host
pub struct Session<'h, H: NetHost> {
    host: &'h H,
    spec: PathSpec,
    retry: RetryConfig,
    lifecycle: LinkLifecycle,
    ledger: Ledger,
}

impl<'h, H: NetHost> Session<'h, H> {
    /// Fresh session owning nothing
    pub fn new(host: &'h H, spec: PathSpec, retry: RetryConfig) -> Self {
        Self {
            host,
            spec,
            retry,
            lifecycle: LinkLifecycle::new(),
            ledger: Ledger::new(),
        }
    }

    /// Session that claims every entity of a path provisioned earlier
    pub fn adopt(host: &'h H, spec: PathSpec, retry: RetryConfig) -> Self {
        Self {
            ledger: Ledger::assume_all(),
            ..Self::new(host, spec, retry)
        }
    }

    pub fn spec(&self) -> &PathSpec {
        &self.spec
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Ordered plan without touching the OS
    pub fn plan(&self) -> Vec<PlannedStep> {
        Step::sequence()
            .iter()
            .map(|step| PlannedStep {
                step: *step,
                entity: step.entity(&self.spec),
                action: step.action(&self.spec),
            })
            .collect()
    }

    /// Live status of the path
    pub fn status(&self) -> Result<PathStatus> {
        status::inspect(self.host, &self.spec)
    }

    /// Bring the path to READY
    ///
    /// On failure everything this session created is removed again and the
    /// error names the failing step and entity.
    pub fn up(&mut self) -> Result<()> {
        // A failed rerun would roll back the live path through the old ledger
        if self.state() != State::Uncreated || !self.ledger.is_empty() {
            return Err(Error::Transition(format!(
                "session already owns a path in state {}; tear it down first",
                self.state()
            )));
        }

        info!(
            bridge = %self.spec.bridge,
            namespace = %self.spec.namespace,
            "provisioning test path"
        );

        for step in Step::sequence() {
            if let Err(e) = self.run_step(*step) {
                let entity = step.entity(&self.spec);
                error!(step = %step, entity = %entity, error = %e, "step failed, rolling back");

                let report = self.teardown();
                if !report.is_clean() {
                    warn!(
                        failures = report.failures.len(),
                        "rollback left entities behind"
                    );
                }

                return Err(Error::StepFailed {
                    step: step.to_string(),
                    entity,
                    source: Box::new(e),
                });
            }
        }

        info!(namespace = %self.spec.namespace, "test path ready");
        Ok(())
    }

    /// Tear down an adopted path, failing if anything could not be removed
    pub fn down(&mut self) -> Result<TeardownReport> {
        let report = self.teardown();
        if !report.is_clean() {
            return Err(Error::TeardownIncomplete(report.failures.len()));
        }
        Ok(report)
    }

    /// Remove every owned resource, newest first
    ///
    /// Missing entities are warnings; teardown carries on past failures.
    pub fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();

        while let Some(resource) = self.ledger.pop() {
            let label = resource.to_string();
            match with_retry(&self.retry, &label, || self.undo(resource)) {
                Ok(()) => {
                    info!(resource = %resource, "removed");
                    report.removed.push(resource);
                }
                Err(e) if e.is_not_found() => {
                    warn!(resource = %resource, error = %e, "already gone");
                    report.warnings.push(format!("{}: {}", resource, e));
                }
                Err(e) => {
                    error!(resource = %resource, error = %e, "could not remove");
                    report.failures.push(format!("{}: {}", resource, e));
                }
            }
        }

        if let Err(e) = self.lifecycle.reset() {
            warn!(error = ?e, "link lifecycle did not reset");
        }
        report
    }

    fn run_step(&mut self, step: Step) -> Result<()> {
        let entity = step.entity(&self.spec);
        let created = with_retry(&self.retry, &step.to_string(), || self.apply(step))?;

        if let Some(resource) = created {
            self.ledger.record(resource);
        }
        if step == Step::DetachBridge {
            self.ledger.release(Resource::BridgeMembership);
        }
        if step.target_state().is_some() {
            self.lifecycle
                .advance()
                .map_err(|e| Error::Transition(format!("{:?}", e)))?;
        }

        info!(step = %step, entity = %entity, "transition complete");
        Ok(())
    }

    fn apply(&self, step: Step) -> Result<Option<Resource>> {
        let host = self.host;
        let spec = &self.spec;
        let a = spec.host_endpoint.as_str();
        let b = spec.namespace_endpoint.as_str();
        let ns = Namespace::new(&spec.namespace);

        match step {
            Step::InstallSnat => {
                let inserted = snat::install(host, &spec.snat)?;
                Ok(inserted.then_some(Resource::SnatRule))
            }
            Step::CreateLink => {
                VethPair::create(host, a, b)?;
                Ok(Some(Resource::VethPair))
            }
            Step::AttachBridge => {
                Bridge::open(host, &spec.bridge)?.attach(host, a, b)?;
                Ok(Some(Resource::BridgeMembership))
            }
            Step::RaiseLink => {
                host.set_up(a, None)?;
                host.set_up(b, None)?;
                Ok(None)
            }
            Step::DetachBridge => {
                let bridge = Bridge::open(host, &spec.bridge)?;
                if bridge.has_member(host, a)? {
                    bridge.detach(host, a)?;
                }
                Ok(None)
            }
            Step::AddressHost => {
                netns::configure(host, a, spec.plan.host_side(), None)?;
                Ok(Some(Resource::HostAddress))
            }
            Step::CreateNamespace => {
                Namespace::create(host, &spec.namespace)?;
                Ok(Some(Resource::Namespace))
            }
            Step::Relocate => {
                if host.link(b, None)?.is_some() {
                    netns::flush_addresses(host, b, None)?;
                }
                ns.relocate(host, b)?;
                Ok(None)
            }
            Step::AddressNamespace => {
                netns::configure(host, b, spec.plan.namespace_side(), Some(ns.name()))?;
                Ok(Some(Resource::NamespaceAddress))
            }
            Step::Route => {
                ns.set_default_route(host, spec.plan.gateway())?;
                Ok(Some(Resource::DefaultRoute))
            }
            Step::Verify => {
                let status = status::inspect(host, spec)?;
                if !status.is_ready() {
                    return Err(Error::os(
                        ErrorKind::Precondition,
                        b,
                        format!("path reads back as {}", status.state),
                    ));
                }
                Ok(None)
            }
        }
    }

    fn undo(&self, resource: Resource) -> Result<()> {
        let host = self.host;
        let spec = &self.spec;
        let ns = Namespace::new(&spec.namespace);

        match resource {
            Resource::DefaultRoute => ns.clear_default_route(host),
            Resource::NamespaceAddress => {
                netns::flush_addresses(host, &spec.namespace_endpoint, Some(ns.name()))
            }
            Resource::Namespace => ns.destroy(host),
            Resource::HostAddress => netns::flush_addresses(host, &spec.host_endpoint, None),
            Resource::BridgeMembership => {
                Bridge::open(host, &spec.bridge)?.detach(host, &spec.host_endpoint)
            }
            Resource::VethPair => VethPair::new(&spec.host_endpoint, &spec.namespace_endpoint)
                .destroy(host, Some(ns.name())),
            Resource::SnatRule => snat::remove(host, &spec.snat),
        }
    }
}
