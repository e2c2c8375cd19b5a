//! Resources owned by a provisioning session
//!
//! The ledger records, in creation order, every OS entity the current session
//! created. Teardown walks it backwards, so rollback after a partial failure
//! only removes what this session put there.

use std::fmt;

/// An OS entity a session can own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The SNAT rule on the uplink
    SnatRule,
    /// The veth pair
    VethPair,
    /// Bridge membership of endpoint A
    BridgeMembership,
    /// Endpoint A's address in the root namespace
    HostAddress,
    /// The isolated namespace
    Namespace,
    /// Endpoint B's address inside the namespace
    NamespaceAddress,
    /// The namespace default route
    DefaultRoute,
}

impl Resource {
    /// Every resource in the order a full provisioning creates them
    ///
    /// Bridge membership is left out: the sequence releases it again before
    /// the link is addressed.
    pub fn provisioning_order() -> &'static [Resource] {
        &[
            Resource::SnatRule,
            Resource::VethPair,
            Resource::HostAddress,
            Resource::Namespace,
            Resource::NamespaceAddress,
            Resource::DefaultRoute,
        ]
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resource::SnatRule => "snat rule",
            Resource::VethPair => "veth pair",
            Resource::BridgeMembership => "bridge membership",
            Resource::HostAddress => "host address",
            Resource::Namespace => "namespace",
            Resource::NamespaceAddress => "namespace address",
            Resource::DefaultRoute => "default route",
        };
        write!(f, "{}", s)
    }
}

/// Ordered record of owned resources
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ledger {
    owned: Vec<Resource>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim everything a complete session would own
    ///
    /// Used to tear down a path provisioned by an earlier process.
    pub fn assume_all() -> Self {
        Self {
            owned: Resource::provisioning_order().to_vec(),
        }
    }

    /// Record a newly created resource
    pub fn record(&mut self, resource: Resource) {
        if !self.owned.contains(&resource) {
            self.owned.push(resource);
        }
    }

    /// Forget a resource the sequence itself undid
    pub fn release(&mut self, resource: Resource) {
        self.owned.retain(|r| *r != resource);
    }

    /// Take the most recently created resource
    pub fn pop(&mut self) -> Option<Resource> {
        self.owned.pop()
    }

    pub fn owns(&self, resource: Resource) -> bool {
        self.owned.contains(&resource)
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_is_reverse_creation_order() {
        let mut ledger = Ledger::new();
        ledger.record(Resource::SnatRule);
        ledger.record(Resource::VethPair);
        ledger.record(Resource::Namespace);

        assert_eq!(ledger.pop(), Some(Resource::Namespace));
        assert_eq!(ledger.pop(), Some(Resource::VethPair));
        assert_eq!(ledger.pop(), Some(Resource::SnatRule));
        assert_eq!(ledger.pop(), None);
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut ledger = Ledger::new();
        ledger.record(Resource::VethPair);
        ledger.record(Resource::VethPair);
        assert_eq!(ledger.pop(), Some(Resource::VethPair));
        assert_eq!(ledger.pop(), None);
    }

    #[test]
    fn test_release() {
        let mut ledger = Ledger::new();
        ledger.record(Resource::VethPair);
        ledger.record(Resource::BridgeMembership);
        ledger.release(Resource::BridgeMembership);
        assert!(!ledger.owns(Resource::BridgeMembership));
        assert!(ledger.owns(Resource::VethPair));
    }

    #[test]
    fn test_assume_all_ends_with_route() {
        let mut ledger = Ledger::assume_all();
        assert_eq!(ledger.pop(), Some(Resource::DefaultRoute));
        assert!(!ledger.owns(Resource::BridgeMembership));
    }
}
