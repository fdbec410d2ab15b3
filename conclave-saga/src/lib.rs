//! Message-correlated saga execution shell.
//!
//! This crate provides the generic runtime that long-lived protocol roles
//! are built on:
//!
//! - **Correlation**: every event names the instance it belongs to via
//!   [`CorrelatedBy`]; [`CorrelationId`] is the primary key for one
//!   protocol run.
//! - **State machines**: a role declares its states, events and guarded
//!   transitions in a [`TransitionTable`] built once at startup. Handlers
//!   never perform I/O; they record send intents in an [`Outbox`].
//! - **Repository**: [`SagaRepository`] keeps at most one live instance per
//!   correlation id and serializes transitions per instance while distinct
//!   instances run fully in parallel.
//! - **Routing**: [`SagaRouter`] delivers an inbound message to the right
//!   instance, creating one only for initiating events, and executes the
//!   recorded side effects strictly after the transition has committed.
//!
//! Physical transport is an external collaborator behind [`MessageBus`];
//! [`MemoryBus`] is the in-process loopback implementation.

#![warn(clippy::pedantic)]

pub mod bus;
pub mod clock;
pub mod correlation;
pub mod machine;
pub mod repository;
pub mod router;

pub use bus::{Inbound, MemoryBus, MessageBus, PublishStream, SendIntent, Uri};
pub use clock::{Clock, SystemClock};
pub use correlation::{CorrelatedBy, CorrelationId};
pub use machine::{InvalidTransition, Outbox, Saga, TransitionTable, UnhandledPolicy};
pub use repository::{SagaCell, SagaRepository};
pub use router::{DispatchError, SagaRouter};
