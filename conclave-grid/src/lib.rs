//! Grid extension: routing work to the workers the consensus layer agrees
//! are available.
//!
//! - [`Distributor`]: keeps a capacity/liveness record per worker,
//!   refreshed by `WorkerAvailable` messages, and forwards each work item
//!   to the first worker the pluggable [`WorkerSelectionStrategy`] accepts.
//!   No eligible worker is backpressure ([`NoWorkerAvailable`]), not a
//!   failure. A periodic ping provokes fresh announcements from quiet
//!   workers.
//! - [`GridLoadBalancer`]: runs the Acceptor and Learner roles for
//!   availability decrees on the control bus and maintains the decided
//!   availability view for downstream consumers.

#![warn(clippy::pedantic)]

pub mod balancer;
pub mod distributor;
pub mod strategy;
pub mod worker;

pub use balancer::{ControlDispatchError, GridLoadBalancer, GridNode, Teardown};
pub use distributor::{Distributor, DistributorSettings, NoWorkerAvailable};
pub use strategy::{DefaultWorkerSelection, WorkerSelectionStrategy};
pub use worker::{Distributed, GridCommand, PingWorker, WorkerAvailable, WorkerDetails};
