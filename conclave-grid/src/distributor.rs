//! Work distribution over the live worker set.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use conclave_saga::{Clock, MessageBus, Uri};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::strategy::{DefaultWorkerSelection, WorkerSelectionStrategy};
use crate::worker::{Distributed, GridCommand, PingWorker, WorkerAvailable, WorkerDetails};

/// No eligible worker right now.
///
/// A retry-later signal, not a failure: the caller owns the backoff
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoWorkerAvailable;

impl fmt::Display for NoWorkerAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no worker available to accept the work item")
    }
}

impl std::error::Error for NoWorkerAvailable {}

#[derive(Debug, Clone, Copy)]
pub struct DistributorSettings {
    /// Cadence of the stale-worker scan.
    pub ping_interval: Duration,
    /// A worker not refreshed within this window is pinged.
    pub ping_timeout: Duration,
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(60),
        }
    }
}

/// Routes work items to available workers.
///
/// The worker map takes concurrent reads for selection probes and
/// exclusive writes for refresh/reservation. Cloning yields another handle
/// onto the same worker set.
pub struct Distributor<T, B, C> {
    workers: Arc<RwLock<HashMap<Uri, WorkerDetails>>>,
    strategy: Arc<dyn WorkerSelectionStrategy<T>>,
    bus: B,
    clock: C,
    settings: DistributorSettings,
}

impl<T, B: Clone, C: Clone> Clone for Distributor<T, B, C> {
    fn clone(&self) -> Self {
        Self {
            workers: Arc::clone(&self.workers),
            strategy: Arc::clone(&self.strategy),
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            settings: self.settings,
        }
    }
}

impl<T, B, C> Distributor<T, B, C>
where
    T: Send + Sync + 'static,
    B: MessageBus<GridCommand<T>>,
    C: Clock,
{
    pub fn new(bus: B, clock: C, settings: DistributorSettings) -> Self {
        Self::with_strategy(bus, clock, settings, Arc::new(DefaultWorkerSelection))
    }

    pub fn with_strategy(
        bus: B,
        clock: C,
        settings: DistributorSettings,
        strategy: Arc<dyn WorkerSelectionStrategy<T>>,
    ) -> Self {
        Self {
            workers: Arc::new(RwLock::new(HashMap::new())),
            strategy,
            bus,
            clock,
            settings,
        }
    }

    /// Forward one work item to an eligible worker.
    ///
    /// Reserves a pending slot on the selected worker before sending, so
    /// concurrent dispatches see the load they are adding.
    ///
    /// # Errors
    ///
    /// [`NoWorkerAvailable`] when nothing is eligible; retry later.
    pub fn consume(&self, payload: T, response_address: Uri) -> Result<Uri, NoWorkerAvailable> {
        let data_uri = {
            let mut workers = self.workers.write().expect("lock poisoned");
            let worker = workers
                .values_mut()
                .find(|worker| self.strategy.is_eligible(worker, &payload))
                .ok_or(NoWorkerAvailable)?;
            worker.add();
            worker.data_uri.clone()
        };

        trace!(%data_uri, "dispatching work item");
        self.bus.send(
            &data_uri,
            GridCommand::Distributed(Distributed {
                payload,
                response_address,
            }),
        );
        Ok(data_uri)
    }

    /// Whether any worker would accept the message right now.
    #[must_use]
    pub fn accept(&self, message: &T) -> bool {
        self.workers
            .read()
            .expect("lock poisoned")
            .values()
            .any(|worker| self.strategy.is_eligible(worker, message))
    }

    /// Merge a worker announcement into the map.
    pub fn worker_available(&self, message: WorkerAvailable) {
        let mut workers = self.workers.write().expect("lock poisoned");
        match workers.entry(message.control_uri.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().update(&message),
            Entry::Vacant(entry) => {
                debug!(control = %message.control_uri, "registering worker");
                entry.insert(WorkerDetails::from(&message));
            }
        }
    }

    /// Drop a worker that stopped refreshing.
    pub fn remove_worker(&self, control_uri: &Uri) -> Option<WorkerDetails> {
        let removed = self
            .workers
            .write()
            .expect("lock poisoned")
            .remove(control_uri);
        if removed.is_some() {
            debug!(control = %control_uri, "removed worker");
        }
        removed
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.read().expect("lock poisoned").len()
    }

    /// One timer tick: ping every worker not refreshed within the timeout.
    ///
    /// The ping only provokes a fresh `WorkerAvailable`; it never evicts.
    pub fn ping_stale_workers(&self) {
        let cutoff = self.clock.now() - self.settings.ping_timeout;
        let stale: Vec<Uri> = self
            .workers
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|worker| worker.last_update < cutoff)
            .map(|worker| worker.control_uri.clone())
            .collect();

        for control_uri in stale {
            trace!(control = %control_uri, "pinging stale worker");
            self.bus.send(&control_uri, GridCommand::Ping(PingWorker));
        }
    }
}

impl<T, B, C> Distributor<T, B, C>
where
    T: Send + Sync + 'static,
    B: MessageBus<GridCommand<T>> + Clone + 'static,
    C: Clock,
{
    /// Spawn the periodic stale-worker scan.
    ///
    /// Runs on its own schedule, independent of message processing.
    /// Cancelling the returned token stops the task without touching
    /// in-flight saga work.
    pub fn spawn_ping_scheduler(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let this = self.clone();

        tokio::spawn(async move {
            let interval = this.settings.ping_interval;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("ping scheduler stopped");
                        break;
                    }
                    () = this.clock.sleep(interval) => this.ping_stale_workers(),
                }
            }
        });

        token
    }
}
