//! Single-decree Paxos roles for the grid control bus.
//!
//! The two long-lived roles are saga types on the
//! [`conclave-saga`](conclave_saga) shell, driven entirely by asynchronous
//! message delivery:
//!
//! - [`Acceptor`]: answers `Prepare`/`Accept` for one consensus instance
//!   and holds its durable ballot/value record.
//! - [`Learner`]: aggregates `Accepted` notifications and decides exactly
//!   once when a quorum of distinct acceptors report the same ballot and
//!   value.
//!
//! The proposer/leader role is an external collaborator: it issues
//! `Prepare` and `Accept` with monotonically increasing ballots and owns
//! all timeout/retry policy. The roles here only ever answer: stale or
//! reordered traffic is Nacked or ignored, never a fault.

#![warn(clippy::pedantic)]

use std::fmt;

pub mod acceptor;
pub mod ballot;
pub mod learner;
pub mod messages;
pub mod settings;

pub use acceptor::{Acceptor, AcceptorEvent, AcceptorEventKind, AcceptorPhase};
pub use ballot::{AcceptorId, Ballot, LeaderId};
pub use learner::{Learner, LearnerEvent, LearnerEventKind, LearnerPhase};
pub use messages::{
    Accept, Accepted, Nack, Prepare, Promise, ProtocolMessage, ValueDecided,
};
pub use settings::PaxosSettings;

/// The opaque payload being agreed on.
pub trait Decree: Clone + PartialEq + fmt::Debug + Send + 'static {}

impl<T: Clone + PartialEq + fmt::Debug + Send + 'static> Decree for T {}
