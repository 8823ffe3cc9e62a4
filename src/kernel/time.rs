use std::time::Duration;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cancellable fixed-period schedule for polling loops.
///
/// Built on tokio's clock, so tests drive it with `tokio::time::pause`
/// instead of real sleeps. The first tick fires immediately.
pub struct PollCadence {
    interval: Interval,
    cancel: CancellationToken,
}

impl PollCadence {
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, cancel }
    }

    /// Wait for the next tick. `None` once the cadence has been cancelled.
    pub async fn next(&mut self) -> Option<Instant> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            at = self.interval.tick() => Some(at),
        }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}
