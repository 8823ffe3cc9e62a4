use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::monitor::{MonitorSettings, MonitorVerdict, ProgressMonitor};
use super::segment::Segment;
use super::telemetry::{RunEvent, TelemetryRecorder};
use super::time::PollCadence;
use crate::services::tts::RemoteClient;
use crate::store::{Artifact, ArtifactStore};

/// Why the orchestrator stopped waiting on a call that had not returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonCause {
    /// The remote stopped making progress.
    Stalled,
    /// The remote reported an empty queue for longer than the drain grace
    /// while the call was still open.
    Orphaned,
    /// The run shut down.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Remote(String),
    Store(String),
    Abandoned(AbandonCause),
    Panicked,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Remote(e) => write!(f, "remote: {e}"),
            FailureReason::Store(e) => write!(f, "store: {e}"),
            FailureReason::Abandoned(AbandonCause::Stalled) => f.write_str("abandoned: remote stalled"),
            FailureReason::Abandoned(AbandonCause::Orphaned) => {
                f.write_str("abandoned: remote drained without answering")
            }
            FailureReason::Abandoned(AbandonCause::Cancelled) => f.write_str("abandoned: run cancelled"),
            FailureReason::Panicked => f.write_str("call task panicked"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StallInfo {
    pub completed_counter: u64,
    pub outstanding: u64,
    pub stalled_for: Duration,
}

/// Result of one dispatch round. Every submitted name lands in exactly one
/// of `completed` or `failures`.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub attempt: u32,
    pub completed: BTreeMap<String, Artifact>,
    pub failures: BTreeMap<String, FailureReason>,
    pub stalled: Option<StallInfo>,
}

impl RoundReport {
    fn new(attempt: u32) -> Self {
        Self {
            attempt,
            ..Default::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.stalled.is_none()
    }
}

struct CallOutcome {
    name: String,
    result: Result<Artifact, FailureReason>,
    elapsed: Duration,
}

/// Fans out bounded-concurrency submissions and watches the remote while they run.
///
/// Calls that are given up on are not aborted. They keep running in the
/// background so a late result still lands in the store; `shutdown` is what
/// finally stops them.
///
/// `max_concurrency` bounds one round. Each round gets its own permits, so
/// while abandoned calls from earlier rounds are still open the remote can
/// see up to `max_concurrency` calls per round that has stragglers.
pub struct JobSubmitter {
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn ArtifactStore>,
    max_concurrency: usize,
    monitor: MonitorSettings,
    run_cancel: CancellationToken,
    stragglers: Mutex<Vec<JoinSet<CallOutcome>>>,
}

impl JobSubmitter {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        store: Arc<dyn ArtifactStore>,
        max_concurrency: usize,
        monitor: MonitorSettings,
    ) -> Self {
        Self {
            client,
            store,
            max_concurrency: max_concurrency.max(1),
            monitor,
            run_cancel: CancellationToken::new(),
            stragglers: Mutex::new(Vec::new()),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn monitor_settings(&self) -> &MonitorSettings {
        &self.monitor
    }

    /// Number of abandoned calls still running in the background.
    pub async fn straggler_count(&self) -> usize {
        self.stragglers.lock().await.iter().map(JoinSet::len).sum()
    }

    pub async fn run_round(
        &self,
        attempt: u32,
        segments: &[Segment],
        telemetry: &mut TelemetryRecorder,
    ) -> RoundReport {
        let mut report = RoundReport::new(attempt);
        if segments.is_empty() {
            return report;
        }

        telemetry.record(RunEvent::RoundStarted {
            attempt,
            segments: segments.len(),
        });
        info!(
            "Round {}: submitting {} segments ({} concurrent)",
            attempt,
            segments.len(),
            self.max_concurrency
        );

        // Per round: abandoned calls keep their permits, and must not starve the next round.
        let limit = Arc::new(Semaphore::new(self.max_concurrency));
        let mut calls = JoinSet::new();
        let mut outstanding = BTreeSet::new();

        for segment in segments {
            outstanding.insert(segment.name().to_string());
            telemetry.record(RunEvent::SegmentSubmitted {
                segment: segment.name().to_string(),
                attempt,
            });
            calls.spawn(call(
                self.client.clone(),
                self.store.clone(),
                limit.clone(),
                self.run_cancel.clone(),
                segment.name().to_string(),
                segment.text().to_string(),
            ));
        }

        let round_cancel = self.run_cancel.child_token();
        let mut cadence = PollCadence::new(self.monitor.poll_interval, round_cancel.clone());
        let mut monitor = ProgressMonitor::new(self.monitor, Instant::now());
        let mut drained_since: Option<Instant> = None;

        while !outstanding.is_empty() {
            tokio::select! {
                joined = calls.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => {
                        outstanding.remove(&outcome.name);
                        settle(&mut report, telemetry, outcome);
                    }
                    // The name stays outstanding and is reported as panicked below.
                    Some(Err(e)) => warn!("Call task failed: {}", e),
                },
                tick = cadence.next() => {
                    if tick.is_none() {
                        abandon(&mut report, telemetry, &mut outstanding, AbandonCause::Cancelled);
                        break;
                    }
                    match monitor.poll(self.client.as_ref()).await {
                        MonitorVerdict::Stalled { completed, outstanding: remote_outstanding, stalled_for } => {
                            warn!(
                                "STALL: no progress for {:.0}s ({} completed, {} outstanding remotely, {} calls open)",
                                stalled_for.as_secs_f64(),
                                completed,
                                remote_outstanding,
                                outstanding.len()
                            );
                            telemetry.record(RunEvent::StallDetected {
                                attempt,
                                completed_counter: completed,
                                outstanding: remote_outstanding,
                                stalled_ms: stalled_for.as_millis() as u64,
                            });
                            report.stalled = Some(StallInfo {
                                completed_counter: completed,
                                outstanding: remote_outstanding,
                                stalled_for,
                            });
                            abandon(&mut report, telemetry, &mut outstanding, AbandonCause::Stalled);
                        }
                        MonitorVerdict::Drained { .. } => {
                            let now = Instant::now();
                            let since = *drained_since.get_or_insert(now);
                            if now.saturating_duration_since(since) >= self.monitor.drain_grace {
                                warn!(
                                    "Remote queue empty for {}s with {} calls still open",
                                    self.monitor.drain_grace.as_secs(),
                                    outstanding.len()
                                );
                                abandon(&mut report, telemetry, &mut outstanding, AbandonCause::Orphaned);
                            }
                        }
                        MonitorVerdict::Draining { .. } => drained_since = None,
                    }
                }
            }
        }
        round_cancel.cancel();

        for name in std::mem::take(&mut outstanding) {
            fail(&mut report, telemetry, name, FailureReason::Panicked);
        }

        if !calls.is_empty() {
            debug!("Leaving {} abandoned calls running", calls.len());
            self.stragglers.lock().await.push(calls);
        }

        telemetry.record(RunEvent::RoundFinished {
            attempt,
            completed: report.completed.len(),
            failed: report.failures.len(),
        });
        info!(
            "Round {} finished: {} completed, {} failed",
            attempt,
            report.completed.len(),
            report.failures.len()
        );
        report
    }

    /// Give abandoned calls up to `window` to finish on their own, so their
    /// artifacts land in the store. Returns how many are still running.
    pub async fn await_stragglers(&self, window: Duration) -> usize {
        let mut stragglers = self.stragglers.lock().await;
        let drain = async {
            for set in stragglers.iter_mut() {
                while set.join_next().await.is_some() {}
            }
        };
        if tokio::time::timeout(window, drain).await.is_err() {
            debug!("Stragglers still running after {:.0}s", window.as_secs_f64());
        }
        stragglers.retain(|set| !set.is_empty());
        stragglers.iter().map(JoinSet::len).sum()
    }

    /// Stop every abandoned call and wait for them to unwind.
    pub async fn shutdown(&self) {
        self.run_cancel.cancel();
        let mut stragglers = self.stragglers.lock().await;
        for mut set in stragglers.drain(..) {
            while set.join_next().await.is_some() {}
        }
    }
}

async fn call(
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn ArtifactStore>,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
    name: String,
    text: String,
) -> CallOutcome {
    let started = Instant::now();
    let work = async {
        let _permit = limit
            .acquire()
            .await
            .map_err(|_| FailureReason::Abandoned(AbandonCause::Cancelled))?;
        let audio = client
            .submit(&name, &text)
            .await
            .map_err(|e| FailureReason::Remote(e.to_string()))?;
        // Persist before reporting back so a crash right after still leaves the artifact.
        store
            .write(&name, &audio)
            .map_err(|e| FailureReason::Store(e.to_string()))
    };

    let result = tokio::select! {
        _ = cancel.cancelled() => Err(FailureReason::Abandoned(AbandonCause::Cancelled)),
        result = work => result,
    };

    CallOutcome {
        name,
        result,
        elapsed: started.elapsed(),
    }
}

fn settle(report: &mut RoundReport, telemetry: &mut TelemetryRecorder, outcome: CallOutcome) {
    match outcome.result {
        Ok(artifact) => {
            info!(
                "OK: {} ({} bytes, {:.1}s)",
                outcome.name,
                artifact.size,
                outcome.elapsed.as_secs_f64()
            );
            telemetry.record(RunEvent::SegmentCompleted {
                segment: outcome.name.clone(),
                attempt: report.attempt,
                bytes: artifact.size,
                elapsed_ms: outcome.elapsed.as_millis() as u64,
            });
            report.completed.insert(outcome.name, artifact);
        }
        Err(reason) => fail(report, telemetry, outcome.name, reason),
    }
}

fn fail(
    report: &mut RoundReport,
    telemetry: &mut TelemetryRecorder,
    name: String,
    reason: FailureReason,
) {
    warn!("FAILED: {}: {}", name, reason);
    telemetry.record(RunEvent::SegmentFailed {
        segment: name.clone(),
        attempt: report.attempt,
        reason: reason.to_string(),
    });
    report.failures.insert(name, reason);
}

fn abandon(
    report: &mut RoundReport,
    telemetry: &mut TelemetryRecorder,
    outstanding: &mut BTreeSet<String>,
    cause: AbandonCause,
) {
    for name in std::mem::take(outstanding) {
        fail(report, telemetry, name, FailureReason::Abandoned(cause));
    }
}
