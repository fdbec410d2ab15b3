//! Correlated message routing.

use std::fmt;
use std::sync::Arc;

use error_stack::Report;
use tracing::{instrument, warn};

use crate::bus::{Inbound, MessageBus, SendIntent};
use crate::correlation::{CorrelatedBy, CorrelationId};
use crate::machine::{Saga, TransitionTable};
use crate::repository::SagaRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// Non-initiating message referencing a correlation id with no live
    /// instance. The message is dropped (or dead-lettered by the caller);
    /// state is never synthesized for it.
    UnknownInstance,
    /// No transition registered for the event under a strict table.
    InvalidTransition,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownInstance => {
                f.write_str("no saga instance for correlation id")
            }
            DispatchError::InvalidTransition => {
                f.write_str("no transition registered for event")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Delivers inbound messages to the saga instance named by their
/// correlation id, creating instances only for initiating events.
///
/// The transition commits under the instance lock; recorded send intents
/// are executed against the bus strictly afterwards, so a failed send can
/// never corrupt committed state.
pub struct SagaRouter<S: Saga, B> {
    repository: SagaRepository<S>,
    table: TransitionTable<S>,
    factory: Arc<dyn Fn(CorrelationId) -> S + Send + Sync>,
    bus: B,
}

impl<S, B> SagaRouter<S, B>
where
    S: Saga,
    B: MessageBus<S::Command>,
{
    pub fn new(bus: B, factory: impl Fn(CorrelationId) -> S + Send + Sync + 'static) -> Self {
        Self {
            repository: SagaRepository::new(),
            table: S::transitions(),
            factory: Arc::new(factory),
            bus,
        }
    }

    #[must_use]
    pub fn repository(&self) -> &SagaRepository<S> {
        &self.repository
    }

    #[must_use]
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Route one inbound message.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownInstance`] for a non-initiating event with
    /// no live instance, [`DispatchError::InvalidTransition`] under a
    /// strict transition table. Neither is fatal to the process.
    #[instrument(skip_all, fields(correlation_id = %inbound.message.correlation_id()))]
    pub fn dispatch(&self, inbound: Inbound<S::Event>) -> Result<(), Report<DispatchError>> {
        let id = inbound.message.correlation_id();
        let kind = S::kind(&inbound.message);

        let cell = if S::initiating(kind) {
            self.repository.get_or_create(id, || (self.factory)(id))
        } else {
            self.repository.find(id).ok_or_else(|| {
                warn!(?kind, "dropping message for unknown saga instance");
                Report::new(DispatchError::UnknownInstance)
                    .attach_printable(format!("correlation id {id}, event {kind:?}"))
            })?
        };

        let outbox = {
            let mut saga = cell.lock().expect("lock poisoned");
            let state = saga.state();
            self.table.raise(&mut saga, inbound).map_err(|_| {
                Report::new(DispatchError::InvalidTransition)
                    .attach_printable(format!("state {state:?}, event {kind:?}"))
            })?
        };

        // State committed; now the sends.
        for intent in outbox.into_intents() {
            match intent {
                SendIntent::Direct { to, message } => self.bus.send(&to, message),
                SendIntent::Publish { message } => self.bus.publish(message),
            }
        }

        Ok(())
    }
}
