//! Provisioning sessions
//!
//! A session drives one test path through its lifecycle:
//! - `state`: the link state machine
//! - `ledger`: entities the session owns, for reverse-order teardown
//! - `provisioner`: the ordered transitions, rollback and teardown
//! - `status`: reading back what the OS actually has
//! - `retry`: backoff for transient failures

pub mod ledger;
pub mod provisioner;
pub mod retry;
pub mod state;
pub mod status;

pub use ledger::{Ledger, Resource};
pub use provisioner::{PlannedStep, Session, Step, TeardownReport};
pub use state::State;
pub use status::PathStatus;
