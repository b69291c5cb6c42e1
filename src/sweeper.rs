//! Periodic eviction of idle buckets.
//!
//! The sweeper task holds only a weak reference to the limiter, so dropping every
//! [`Ratelimiter`] clone ends it on the next tick. [`Ratelimiter::close`] and
//! [`SweeperHandle::stop`] end it immediately.

use crate::limiter::{Ratelimiter, Shared};
use crate::telemetry::TelemetrySink;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Handle to a running sweeper task.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the task to stop. Does not wait.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to exit. Call [`stop`](Self::stop) first unless the limiter is being
    /// closed or dropped.
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            debug!(target: "paceline::sweeper", error = %err, "sweeper task ended abnormally");
        }
    }
}

impl<S> Ratelimiter<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Start a background task that calls [`sweep`](Self::sweep) every cleanup interval.
    ///
    /// Must be called from within a tokio runtime. Once the limiter is
    /// [closed](Self::close) the returned task exits without sweeping.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let token = self.shared.shutdown.child_token();
        if token.is_cancelled() {
            warn!(target: "paceline::sweeper", "limiter is closed; sweeper exits immediately");
        }
        let interval = self.shared.cleanup_interval;
        let task = tokio::spawn(run(
            Arc::downgrade(&self.shared),
            self.sink.clone(),
            self.clock.clone(),
            token.clone(),
            interval,
        ));
        debug!(target: "paceline::sweeper", interval = ?interval, "sweeper started");
        SweeperHandle { token, task }
    }
}

async fn run<S>(
    shared: Weak<Shared>,
    sink: S,
    clock: Arc<dyn crate::clock::Clock>,
    token: CancellationToken,
    period: Duration,
) where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            trace!(target: "paceline::sweeper", "limiter dropped");
            break;
        };
        let limiter = Ratelimiter { shared, sink: sink.clone(), clock: clock.clone() };
        limiter.sweep().await;
    }
    debug!(target: "paceline::sweeper", "sweeper stopped");
}
