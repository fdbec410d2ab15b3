//! Injected time capability.
//!
//! Staleness checks and periodic scheduling never read the ambient clock
//! directly; they go through [`Clock`] so tests can drive time
//! deterministically.

use std::future::Future;
use std::time::{Duration, SystemTime};

pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> SystemTime;

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Wall-clock time with the tokio timer.
#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
