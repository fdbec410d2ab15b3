//! Worker records and the messages that maintain them.

use std::time::SystemTime;

use conclave_saga::Uri;
use serde::{Deserialize, Serialize};

/// Capacity/liveness record for one grid worker.
///
/// Refreshed by periodic [`WorkerAvailable`] announcements; a record whose
/// `last_update` falls behind the ping timeout is stale and gets pinged,
/// never proactively evicted; removal is driven by the absence of a
/// subsequent refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerDetails {
    pub control_uri: Uri,
    pub data_uri: Uri,
    pub in_progress: u32,
    pub in_progress_limit: u32,
    pub pending: u32,
    pub pending_limit: u32,
    pub last_update: SystemTime,
}

impl WorkerDetails {
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.in_progress < self.in_progress_limit && self.pending < self.pending_limit
    }

    /// Reserve a slot for a work item dispatched to this worker.
    pub(crate) fn add(&mut self) {
        self.pending += 1;
    }

    /// Merge-on-arrival: overwrite capacity/progress and stamp the update.
    pub(crate) fn update(&mut self, message: &WorkerAvailable) {
        self.data_uri = message.data_uri.clone();
        self.in_progress = message.in_progress;
        self.in_progress_limit = message.in_progress_limit;
        self.pending = message.pending;
        self.pending_limit = message.pending_limit;
        self.last_update = message.updated;
    }
}

impl From<&WorkerAvailable> for WorkerDetails {
    fn from(message: &WorkerAvailable) -> Self {
        Self {
            control_uri: message.control_uri.clone(),
            data_uri: message.data_uri.clone(),
            in_progress: message.in_progress,
            in_progress_limit: message.in_progress_limit,
            pending: message.pending,
            pending_limit: message.pending_limit,
            last_update: message.updated,
        }
    }
}

/// Periodic announcement from a worker's control endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAvailable {
    pub control_uri: Uri,
    pub data_uri: Uri,
    pub in_progress: u32,
    pub in_progress_limit: u32,
    pub pending: u32,
    pub pending_limit: u32,
    pub updated: SystemTime,
}

/// Sent to a quiet worker's control endpoint to provoke a fresh
/// [`WorkerAvailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingWorker;

/// A work item forwarded to a selected worker, tagged with the original
/// caller's response address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distributed<T> {
    pub payload: T,
    pub response_address: Uri,
}

/// Messages the distributor puts on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridCommand<T> {
    Distributed(Distributed<T>),
    Ping(PingWorker),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn announcement(updated: SystemTime) -> WorkerAvailable {
        WorkerAvailable {
            control_uri: Uri::from("loopback://worker-1/control"),
            data_uri: Uri::from("loopback://worker-1/data"),
            in_progress: 0,
            in_progress_limit: 4,
            pending: 0,
            pending_limit: 8,
            updated,
        }
    }

    #[test]
    fn capacity_requires_both_limits() {
        let now = SystemTime::now();
        let mut worker = WorkerDetails::from(&announcement(now));
        assert!(worker.has_capacity());

        worker.in_progress = 4;
        assert!(!worker.has_capacity());

        worker.in_progress = 0;
        worker.pending = 8;
        assert!(!worker.has_capacity());
    }

    #[test]
    fn update_overwrites_and_stamps() {
        let start = SystemTime::now();
        let mut worker = WorkerDetails::from(&announcement(start));
        worker.add();
        assert_eq!(worker.pending, 1);

        let later = start + Duration::from_secs(30);
        let mut refresh = announcement(later);
        refresh.in_progress = 2;
        refresh.pending = 0;
        worker.update(&refresh);

        assert_eq!(worker.in_progress, 2);
        assert_eq!(worker.pending, 0);
        assert_eq!(worker.last_update, later);
    }
}
