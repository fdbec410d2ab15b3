//! Grid load balancer: the consensus roles for availability decrees.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use conclave_paxos::{
    Acceptor, AcceptorEvent, AcceptorId, Learner, LearnerEvent, PaxosSettings, ProtocolMessage,
};
use conclave_saga::{CorrelationId, Inbound, MessageBus, SagaRouter, Uri};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct ControlDispatchError;

impl fmt::Display for ControlDispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("control bus dispatch failed")
    }
}

impl std::error::Error for ControlDispatchError {}

/// Descriptor of one grid service node; the decree payload for
/// "is node X available" consensus instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridNode {
    pub control_uri: Uri,
    pub data_uri: Uri,
}

/// Ordered teardown actions, run in sequence on shutdown.
pub struct Teardown {
    actions: Vec<Box<dyn FnOnce() + Send>>,
}

impl Default for Teardown {
    fn default() -> Self {
        Self::new()
    }
}

impl Teardown {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: impl FnOnce() + Send + 'static) {
        self.actions.push(Box::new(action));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, in registration order.
    pub fn run(self) {
        for action in self.actions {
            action();
        }
    }
}

/// The most recent decision, for watchers.
pub type Decision = Option<(CorrelationId, GridNode)>;

/// Runs this node's Acceptor and Learner roles for grid availability
/// decrees and maintains the decided availability view.
///
/// Inbound control-bus traffic goes through [`dispatch`](Self::dispatch);
/// the proposer/leader side lives elsewhere and only ever sees the
/// replies. Teardown actions registered with
/// [`on_teardown`](Self::on_teardown) run in order on [`stop`](Self::stop).
pub struct GridLoadBalancer<B> {
    acceptors: SagaRouter<Acceptor<GridNode>, B>,
    learners: SagaRouter<Learner<GridNode>, B>,
    available: Arc<RwLock<HashMap<CorrelationId, GridNode>>>,
    decisions: watch::Sender<Decision>,
    teardown: Teardown,
}

impl<B> GridLoadBalancer<B>
where
    B: MessageBus<ProtocolMessage<GridNode>> + Clone,
{
    pub fn new(bus: B, settings: PaxosSettings, acceptor_id: AcceptorId) -> Self {
        let quorum = settings.quorum();
        let (decisions, _) = watch::channel(None);
        Self {
            acceptors: SagaRouter::new(bus.clone(), move |instance| {
                Acceptor::new(instance, acceptor_id)
            }),
            learners: SagaRouter::new(bus, move |instance| Learner::new(instance, quorum)),
            available: Arc::new(RwLock::new(HashMap::new())),
            decisions,
            teardown: Teardown::new(),
        }
    }

    /// Route one control-bus message to the role it addresses.
    ///
    /// Promise/Nack traffic addresses the proposer, not these roles, and
    /// is ignored here.
    ///
    /// # Errors
    ///
    /// [`ControlDispatchError`] wrapping the role router's rejection.
    pub fn dispatch(
        &self,
        inbound: Inbound<ProtocolMessage<GridNode>>,
    ) -> Result<(), Report<ControlDispatchError>> {
        let response_address = inbound.response_address;
        match inbound.message {
            ProtocolMessage::Prepare(prepare) => self
                .acceptors
                .dispatch(Inbound {
                    message: AcceptorEvent::Prepare(prepare),
                    response_address,
                })
                .change_context(ControlDispatchError),
            ProtocolMessage::Accept(accept) => self
                .acceptors
                .dispatch(Inbound {
                    message: AcceptorEvent::Accept(accept),
                    response_address,
                })
                .change_context(ControlDispatchError),
            ProtocolMessage::Accepted(accepted) => {
                let instance = accepted.correlation_id;
                self.learners
                    .dispatch(Inbound {
                        message: LearnerEvent::Accepted(accepted),
                        response_address,
                    })
                    .change_context(ControlDispatchError)?;
                self.record_decision(instance);
                Ok(())
            }
            // A peer's learner decided; adopt its view directly.
            ProtocolMessage::ValueDecided(decided) => {
                self.adopt(decided.correlation_id, decided.value);
                Ok(())
            }
            other => {
                trace!(?other, "ignoring proposer-bound message");
                Ok(())
            }
        }
    }

    /// Decided node for one availability instance, if any.
    #[must_use]
    pub fn decided(&self, instance: CorrelationId) -> Option<GridNode> {
        self.available
            .read()
            .expect("lock poisoned")
            .get(&instance)
            .cloned()
    }

    /// Every node currently decided available.
    #[must_use]
    pub fn available_nodes(&self) -> Vec<GridNode> {
        self.available
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Watch decisions as they land.
    #[must_use]
    pub fn watch_decisions(&self) -> watch::Receiver<Decision> {
        self.decisions.subscribe()
    }

    /// Retire a learner instance once its decision has been consumed and
    /// the grace window has passed. The acceptor instance stays: late
    /// protocol traffic must still be answered.
    pub fn retire_learner(&self, instance: CorrelationId) {
        self.learners.repository().remove(instance);
    }

    /// Register a teardown action, run in order on [`stop`](Self::stop).
    pub fn on_teardown(&mut self, action: impl FnOnce() + Send + 'static) {
        self.teardown.push(action);
    }

    /// Stop the balancer, running teardown actions in registration order.
    pub fn stop(self) {
        debug!("stopping grid load balancer");
        self.teardown.run();
    }

    fn record_decision(&self, instance: CorrelationId) {
        let Some(cell) = self.learners.repository().find(instance) else {
            return;
        };
        let decided = {
            let learner = cell.lock().expect("lock poisoned");
            learner.decided().cloned()
        };
        if let Some(node) = decided {
            self.adopt(instance, node);
        }
    }

    fn adopt(&self, instance: CorrelationId, node: GridNode) {
        let mut available = self.available.write().expect("lock poisoned");
        if available.insert(instance, node.clone()).is_none() {
            debug!(%instance, data = %node.data_uri, "grid node decided available");
            let _ = self.decisions.send(Some((instance, node)));
        }
    }
}
