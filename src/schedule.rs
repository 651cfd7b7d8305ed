//! Cancellable timers.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A spawned timer task, aborted when dropped or replaced.
#[derive(Debug)]
pub(crate) struct ScheduledTask(JoinHandle<()>);

impl ScheduledTask {
    /// Run `f` once after `delay`.
    pub(crate) fn after(delay: Duration, f: impl FnOnce() + Send + 'static) -> Self {
        Self::spawn(async move {
            time::sleep(delay).await;
            f();
        })
    }

    /// Run `f` every `period`, first after one full period.
    pub(crate) fn every(period: Duration, mut f: impl FnMut() + Send + 'static) -> Self {
        Self::spawn(async move {
            let mut ticks = time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                f();
            }
        })
    }

    fn spawn(task: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(tokio::spawn(task))
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}
