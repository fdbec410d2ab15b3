//! Saga state machines.
//!
//! A saga declares its discrete states, its events (keyed by a discriminant
//! `Kind`), and a transition table mapping `(state, kind)` to a handler.
//! The table is an explicit registry built once at startup; nothing is
//! discovered at runtime.
//!
//! Handlers are pure with respect to I/O: they mutate the instance and
//! record [`SendIntent`]s in an [`Outbox`]. The router executes the intents
//! only after the mutation has committed, so a crash between mutation and
//! send can be recovered by re-deriving sends from state (at-least-once
//! delivery; the protocols built on this shell are idempotent to duplicate
//! replies).

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use tracing::trace;

use crate::bus::{Inbound, SendIntent, Uri};
use crate::correlation::{CorrelatedBy, CorrelationId};

/// A long-lived, message-correlated state machine: one role in one
/// protocol run.
pub trait Saga: Send + 'static {
    /// Discrete lifecycle states.
    type State: Copy + Eq + Hash + fmt::Debug + Send;
    /// Inbound protocol events.
    type Event: CorrelatedBy + Send;
    /// Event discriminant used to key the transition table.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send;
    /// Outgoing message type recorded in the outbox.
    type Command: Send + fmt::Debug;

    fn correlation_id(&self) -> CorrelationId;

    fn state(&self) -> Self::State;

    fn kind(event: &Self::Event) -> Self::Kind;

    /// Whether an event of this kind may create a new instance.
    ///
    /// Non-initiating events addressed to an unknown correlation id are
    /// dropped by the router, never synthesized into fresh state.
    fn initiating(kind: Self::Kind) -> bool;

    /// The transition registry for this role, built once at startup.
    fn transitions() -> TransitionTable<Self>
    where
        Self: Sized;
}

/// Transition handler: mutate the instance, record send intents.
pub type Handler<S> =
    fn(&mut S, Inbound<<S as Saga>::Event>, &mut Outbox<<S as Saga>::Command>);

/// What to do when no transition is registered for `(state, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledPolicy {
    /// Trace and drop. The default: protocol roles must tolerate stale,
    /// duplicated and reordered traffic without faulting.
    #[default]
    Ignore,
    /// Raising an unregistered event is an [`InvalidTransition`].
    Strict,
}

/// No transition registered for the instance's current state and the
/// delivered event kind, under a strict table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition;

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no transition registered for event")
    }
}

impl std::error::Error for InvalidTransition {}

/// Explicit registry mapping `(state, kind)` to handlers.
pub struct TransitionTable<S: Saga> {
    entries: HashMap<(S::State, S::Kind), Handler<S>>,
    policy: UnhandledPolicy,
}

impl<S: Saga> TransitionTable<S> {
    #[must_use]
    pub fn builder() -> TransitionTableBuilder<S> {
        TransitionTableBuilder {
            entries: HashMap::new(),
            policy: UnhandledPolicy::default(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> UnhandledPolicy {
        self.policy
    }

    /// Apply the transition registered for the instance's current state and
    /// the event's kind, returning the recorded side effects.
    ///
    /// # Errors
    ///
    /// [`InvalidTransition`] when nothing is registered and the table is
    /// strict. Under [`UnhandledPolicy::Ignore`] the event is a traced
    /// no-op.
    pub fn raise(
        &self,
        saga: &mut S,
        inbound: Inbound<S::Event>,
    ) -> Result<Outbox<S::Command>, InvalidTransition> {
        let kind = S::kind(&inbound.message);
        let state = saga.state();

        let Some(handler) = self.entries.get(&(state, kind)) else {
            return match self.policy {
                UnhandledPolicy::Ignore => {
                    trace!(?state, ?kind, "no transition registered, ignoring event");
                    Ok(Outbox::new())
                }
                UnhandledPolicy::Strict => Err(InvalidTransition),
            };
        };

        let mut outbox = Outbox::new();
        handler(saga, inbound, &mut outbox);
        trace!(
            ?state,
            ?kind,
            next = ?saga.state(),
            effects = outbox.len(),
            "transition applied"
        );
        Ok(outbox)
    }
}

pub struct TransitionTableBuilder<S: Saga> {
    entries: HashMap<(S::State, S::Kind), Handler<S>>,
    policy: UnhandledPolicy,
}

impl<S: Saga> TransitionTableBuilder<S> {
    /// Register the handler for `(state, kind)`.
    ///
    /// # Panics
    ///
    /// Panics if the pair is already registered; tables are built once at
    /// startup and a duplicate is a wiring bug.
    #[must_use]
    pub fn on(mut self, state: S::State, kind: S::Kind, handler: Handler<S>) -> Self {
        let previous = self.entries.insert((state, kind), handler);
        assert!(
            previous.is_none(),
            "duplicate transition registered for ({state:?}, {kind:?})"
        );
        self
    }

    /// Unregistered events fault instead of being ignored.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.policy = UnhandledPolicy::Strict;
        self
    }

    #[must_use]
    pub fn build(self) -> TransitionTable<S> {
        TransitionTable {
            entries: self.entries,
            policy: self.policy,
        }
    }
}

/// Deferred side effects recorded during a transition.
#[derive(Debug)]
pub struct Outbox<M> {
    intents: Vec<SendIntent<M>>,
}

impl<M> Outbox<M> {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            intents: Vec::new(),
        }
    }

    /// Record a direct send to one endpoint.
    pub fn send(&mut self, to: Uri, message: M) {
        self.intents.push(SendIntent::Direct { to, message });
    }

    /// Record a fan-out publish.
    pub fn publish(&mut self, message: M) {
        self.intents.push(SendIntent::Publish { message });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.intents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    #[must_use]
    pub fn into_intents(self) -> Vec<SendIntent<M>> {
        self.intents
    }
}
