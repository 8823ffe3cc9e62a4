use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::time::PollCadence;
use crate::services::tts::{QueueStatus, RemoteClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    /// How long the completed counter may stay flat while work is outstanding.
    pub stall_threshold: Duration,
    /// How long the remote may report an empty queue while local calls are
    /// still waiting before those calls are abandoned.
    pub drain_grace: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stall_threshold: Duration::from_secs(300),
            drain_grace: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorVerdict {
    /// Work remains and the counter moved recently enough.
    Draining { completed: u64, outstanding: u64 },
    /// Remote reports nothing active and nothing queued.
    Drained { completed: u64 },
    /// Work remains but the counter has not moved for longer than the threshold.
    Stalled {
        completed: u64,
        outstanding: u64,
        stalled_for: Duration,
    },
}

impl MonitorVerdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorVerdict::Draining { .. })
    }
}

/// Progress-based (not wall-clock) watchdog over the remote aggregate status.
///
/// Only the time since the completed counter last increased matters; total
/// elapsed time never does. Pure with respect to time: callers pass `now`.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    settings: MonitorSettings,
    last_completed: Option<u64>,
    last_increase: Instant,
    last_outstanding: Option<u64>,
    polls: u64,
}

impl ProgressMonitor {
    pub fn new(settings: MonitorSettings, started: Instant) -> Self {
        Self {
            settings,
            last_completed: None,
            last_increase: started,
            last_outstanding: None,
            polls: 0,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    pub fn completed(&self) -> u64 {
        self.last_completed.unwrap_or(0)
    }

    pub fn last_increase(&self) -> Instant {
        self.last_increase
    }

    pub fn observe(&mut self, status: &QueueStatus, now: Instant) -> MonitorVerdict {
        self.polls += 1;
        let completed = status.completed_counter;

        match self.last_completed {
            // First sample is the baseline; the remote counter is cumulative.
            None => self.last_completed = Some(completed),
            Some(prev) if completed > prev => {
                self.last_completed = Some(completed);
                self.last_increase = now;
            }
            // Counter went backwards: remote restarted. Rebaseline.
            Some(prev) if completed < prev => {
                self.last_completed = Some(completed);
                self.last_increase = now;
            }
            Some(_) => {}
        }

        let outstanding = status.outstanding();
        self.last_outstanding = Some(outstanding);

        if outstanding == 0 {
            return MonitorVerdict::Drained { completed };
        }
        self.stall_check(completed, outstanding, now)
    }

    /// Account for a poll that could not reach the remote. Counts as no
    /// progress, and an unknown queue is assumed non-empty even if the last
    /// good sample was idle, so a remote that dies ends in a stall.
    pub fn observe_unreachable(&mut self, now: Instant) -> MonitorVerdict {
        self.polls += 1;
        let completed = self.completed();
        let outstanding = self.last_outstanding.unwrap_or(1).max(1);
        self.stall_check(completed, outstanding, now)
    }

    fn stall_check(&self, completed: u64, outstanding: u64, now: Instant) -> MonitorVerdict {
        let stalled_for = now.saturating_duration_since(self.last_increase);
        if stalled_for > self.settings.stall_threshold {
            MonitorVerdict::Stalled {
                completed,
                outstanding,
                stalled_for,
            }
        } else {
            MonitorVerdict::Draining {
                completed,
                outstanding,
            }
        }
    }

    /// Poll the remote once and fold the result in.
    pub async fn poll(&mut self, client: &dyn RemoteClient) -> MonitorVerdict {
        match client.poll_status().await {
            Ok(status) => {
                let verdict = self.observe(&status, Instant::now());
                info!(
                    completed = status.completed_counter,
                    active = status.active_count,
                    queued = status.queued_count,
                    "Progress: {} completed, {} active, {} queued",
                    status.completed_counter,
                    status.active_count,
                    status.queued_count
                );
                verdict
            }
            Err(e) => {
                warn!("Status check failed: {}", e);
                self.observe_unreachable(Instant::now())
            }
        }
    }

    /// Poll on the configured cadence until the queue drains or stalls.
    /// Returns `None` if cancelled first.
    pub async fn watch(
        mut self,
        client: &dyn RemoteClient,
        cancel: CancellationToken,
    ) -> Option<MonitorVerdict> {
        let mut cadence = PollCadence::new(self.settings.poll_interval, cancel);
        while cadence.next().await.is_some() {
            let verdict = self.poll(client).await;
            if let MonitorVerdict::Stalled { stalled_for, .. } = &verdict {
                warn!("STALL: no progress for {:.0}s", stalled_for.as_secs_f64());
            }
            if verdict.is_terminal() {
                return Some(verdict);
            }
        }
        None
    }
}
