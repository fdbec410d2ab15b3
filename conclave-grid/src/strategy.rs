//! Worker selection.

use crate::worker::WorkerDetails;

/// Decides which workers may receive a given work item.
///
/// The distributor forwards to the first eligible worker; strategies that
/// care about ordering should encode it in eligibility (e.g. reject
/// workers above a load threshold).
pub trait WorkerSelectionStrategy<T>: Send + Sync {
    fn is_eligible(&self, worker: &WorkerDetails, message: &T) -> bool;
}

/// Default strategy: any worker with free capacity.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkerSelection;

impl<T> WorkerSelectionStrategy<T> for DefaultWorkerSelection {
    fn is_eligible(&self, worker: &WorkerDetails, _message: &T) -> bool {
        worker.has_capacity()
    }
}
