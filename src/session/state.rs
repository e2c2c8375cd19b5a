//! Test path state machine
//!
//! Type-safe state machine for the virtual link lifecycle using the
//! state-machines crate. Uses dynamic dispatch so the provisioner can drive
//! it from a table of steps.

use std::fmt;

use state_machines::state_machine;

state_machine! {
    name: PathMachine,
    dynamic: true,
    initial: Uncreated,
    states: [
        Uncreated,
        Created,
        BridgeAttached,
        LinkUp,
        BridgeDetached,
        HostAddressed,
        Relocated,
        NamespaceAddressed,
        Routed,
        Ready
    ],
    events {
        create {
            transition: { from: Uncreated, to: Created }
        }
        attach {
            transition: { from: Created, to: BridgeAttached }
        }
        raise {
            transition: { from: BridgeAttached, to: LinkUp }
        }
        detach {
            transition: { from: LinkUp, to: BridgeDetached }
        }
        address {
            transition: { from: BridgeDetached, to: HostAddressed }
        }
        relocate {
            transition: { from: HostAddressed, to: Relocated }
        }
        configure {
            transition: { from: Relocated, to: NamespaceAddressed }
        }
        route {
            transition: { from: NamespaceAddressed, to: Routed }
        }
        finish {
            transition: { from: Routed, to: Ready }
        }
        reset {
            transition: {
                from: [Created, BridgeAttached, LinkUp, BridgeDetached, HostAddressed, Relocated, NamespaceAddressed, Routed, Ready],
                to: Uncreated
            }
        }
    }
}

/// Simple state enum for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Uncreated,
    Created,
    BridgeAttached,
    LinkUp,
    BridgeDetached,
    HostAddressed,
    Relocated,
    NamespaceAddressed,
    Routed,
    Ready,
}

impl State {
    /// Parse state from the machine's state name
    pub fn from_name(s: &str) -> Self {
        match s {
            "Created" => State::Created,
            "BridgeAttached" => State::BridgeAttached,
            "LinkUp" => State::LinkUp,
            "BridgeDetached" => State::BridgeDetached,
            "HostAddressed" => State::HostAddressed,
            "Relocated" => State::Relocated,
            "NamespaceAddressed" => State::NamespaceAddressed,
            "Routed" => State::Routed,
            "Ready" => State::Ready,
            _ => State::Uncreated,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Uncreated => "UNCREATED",
            State::Created => "CREATED",
            State::BridgeAttached => "BRIDGE_ATTACHED(A)",
            State::LinkUp => "LINK_UP(A,B)",
            State::BridgeDetached => "BRIDGE_DETACHED(A)",
            State::HostAddressed => "ADDRESSED(A)",
            State::Relocated => "RELOCATED(B)",
            State::NamespaceAddressed => "ADDRESSED(B)",
            State::Routed => "ROUTED(namespace)",
            State::Ready => "READY",
        };
        write!(f, "{}", s)
    }
}

/// State machine wrapper for one virtual link
pub struct LinkLifecycle {
    machine: DynamicPathMachine<()>,
}

impl Default for LinkLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkLifecycle {
    pub fn new() -> Self {
        Self {
            machine: PathMachine::new(()).into_dynamic(),
        }
    }

    /// Get current state as enum
    pub fn state(&self) -> State {
        State::from_name(self.machine.current_state())
    }

    /// Advance to the state that follows the current one
    pub fn advance(&mut self) -> Result<State, state_machines::DynamicError> {
        let event = match self.state() {
            State::Uncreated => PathMachineEvent::Create,
            State::Created => PathMachineEvent::Attach,
            State::BridgeAttached => PathMachineEvent::Raise,
            State::LinkUp => PathMachineEvent::Detach,
            State::BridgeDetached => PathMachineEvent::Address,
            State::HostAddressed => PathMachineEvent::Relocate,
            State::Relocated => PathMachineEvent::Configure,
            State::NamespaceAddressed => PathMachineEvent::Route,
            State::Routed | State::Ready => PathMachineEvent::Finish,
        };
        self.machine.handle(event)?;
        Ok(self.state())
    }

    /// Return to UNCREATED after teardown
    pub fn reset(&mut self) -> Result<(), state_machines::DynamicError> {
        if self.state() == State::Uncreated {
            return Ok(());
        }
        self.machine.handle(PathMachineEvent::Reset)
    }
}
