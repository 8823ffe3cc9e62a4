use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::segment::Segment;
use super::submitter::{AbandonCause, FailureReason, JobSubmitter};
use super::telemetry::{RunEvent, TelemetryRecorder};
use crate::store::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total rounds, the first one included.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before round `attempt` (1-based). Doubles per retry; none before the first round.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

/// Per-segment progress through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentState {
    Missing,
    Submitted { attempt: u32 },
    Valid,
    Failed { attempt: u32, reason: FailureReason },
}

/// State of every segment the retrier is responsible for.
#[derive(Debug, Clone, Default)]
pub struct SegmentLedger {
    states: BTreeMap<String, SegmentState>,
}

impl SegmentLedger {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            states: names
                .into_iter()
                .map(|n| (n.to_string(), SegmentState::Missing))
                .collect(),
        }
    }

    pub fn state(&self, name: &str) -> Option<&SegmentState> {
        self.states.get(name)
    }

    /// Only missing or failed segments may be (re)submitted.
    pub fn submit(&mut self, name: &str, attempt: u32) -> bool {
        match self.states.get_mut(name) {
            Some(state @ (SegmentState::Missing | SegmentState::Failed { .. })) => {
                *state = SegmentState::Submitted { attempt };
                true
            }
            _ => false,
        }
    }

    /// A valid artifact settles the segment whatever state it was in.
    pub fn mark_valid(&mut self, name: &str) {
        if let Some(state) = self.states.get_mut(name) {
            *state = SegmentState::Valid;
        }
    }

    pub fn mark_failed(&mut self, name: &str, reason: FailureReason) {
        if let Some(state) = self.states.get_mut(name) {
            if let SegmentState::Submitted { attempt } = *state {
                *state = SegmentState::Failed { attempt, reason };
            }
        }
    }

    pub fn valid_count(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, SegmentState::Valid))
            .count()
    }

    /// Names not yet valid, in name order (which is playback order).
    pub fn unresolved(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(_, s)| !matches!(s, SegmentState::Valid))
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<SegmentFailure> {
        self.states
            .iter()
            .filter_map(|(name, state)| match state {
                SegmentState::Failed { reason, .. } => Some(SegmentFailure {
                    name: name.clone(),
                    reason: reason.clone(),
                }),
                SegmentState::Valid => None,
                _ => Some(SegmentFailure {
                    name: name.clone(),
                    reason: FailureReason::Abandoned(AbandonCause::Cancelled),
                }),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Reported failed, but a valid artifact exists anyway.
    pub recovered: Vec<String>,
    pub still_missing: Vec<String>,
}

/// Reclassify reported failures against what is actually stored.
///
/// The store wins: a call that "failed" but whose artifact is valid is done.
pub fn reconcile<'a, I, F>(failed: I, is_valid: F) -> Reconciliation
where
    I: IntoIterator<Item = &'a str>,
    F: Fn(&str) -> bool,
{
    let mut result = Reconciliation::default();
    for name in failed {
        if is_valid(name) {
            result.recovered.push(name.to_string());
        } else {
            result.still_missing.push(name.to_string());
        }
    }
    result
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFailure {
    pub name: String,
    pub reason: FailureReason,
}

#[derive(Debug, Error)]
pub enum RecoveryFailure {
    #[error("remote stalled on attempt {attempts}: {completed} completed, missing {missing:?}")]
    Stalled {
        completed: usize,
        missing: Vec<String>,
        attempts: u32,
    },

    #[error("{} segments still missing after {attempts} attempts", .failures.len())]
    Exhausted {
        failures: Vec<SegmentFailure>,
        attempts: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub attempts_used: u32,
    pub retries_used: u32,
    pub submitted: usize,
    /// Segments whose call failed but whose artifact turned up valid.
    pub recovered: Vec<String>,
}

/// Submit, reconcile against the store, resubmit only genuine failures.
pub struct RecoveryRetrier<'a> {
    submitter: &'a JobSubmitter,
    store: &'a dyn ArtifactStore,
    policy: RetryPolicy,
}

impl<'a> RecoveryRetrier<'a> {
    pub fn new(submitter: &'a JobSubmitter, store: &'a dyn ArtifactStore, policy: RetryPolicy) -> Self {
        Self {
            submitter,
            store,
            policy,
        }
    }

    pub async fn run(
        &self,
        needed: &[Segment],
        telemetry: &mut TelemetryRecorder,
    ) -> Result<RecoveryOutcome, RecoveryFailure> {
        let mut ledger = SegmentLedger::new(needed.iter().map(Segment::name));
        let mut outcome = RecoveryOutcome::default();
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff_for(attempt);
                let pending = ledger.unresolved();
                info!(
                    "Retry {}/{}: {} segments after {:.1}s backoff",
                    attempt - 1,
                    max_attempts - 1,
                    pending.len(),
                    delay.as_secs_f64()
                );
                telemetry.record(RunEvent::Backoff {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                tokio::time::sleep(delay).await;

                // Abandoned calls may have written their artifacts during the backoff.
                let late = reconcile(pending.iter().map(String::as_str), |n| self.store.is_valid(n));
                self.accept_recovered(&late, attempt - 1, &mut ledger, &mut outcome, telemetry);
                if late.still_missing.is_empty() {
                    break;
                }
            }

            let pending: BTreeSet<String> = ledger.unresolved().into_iter().collect();
            let batch: Vec<Segment> = needed
                .iter()
                .filter(|s| pending.contains(s.name()))
                .cloned()
                .collect();
            for segment in &batch {
                ledger.submit(segment.name(), attempt);
            }

            outcome.attempts_used = attempt;
            outcome.submitted += batch.len();
            let report = self.submitter.run_round(attempt, &batch, telemetry).await;

            for name in report.completed.keys() {
                ledger.mark_valid(name);
            }
            for (name, reason) in &report.failures {
                ledger.mark_failed(name, reason.clone());
            }

            let check = reconcile(report.failures.keys().map(String::as_str), |n| {
                self.store.is_valid(n)
            });
            self.accept_recovered(&check, attempt, &mut ledger, &mut outcome, telemetry);

            if check.still_missing.is_empty() {
                break;
            }

            if report.stalled.is_some() {
                // Stalled calls are left running; give them one drain grace to
                // land before deciding what is really missing.
                let grace = self.submitter.monitor_settings().drain_grace;
                let open = self.submitter.await_stragglers(grace).await;
                let pending = ledger.unresolved();
                let late = reconcile(pending.iter().map(String::as_str), |n| self.store.is_valid(n));
                self.accept_recovered(&late, attempt, &mut ledger, &mut outcome, telemetry);
                if late.still_missing.is_empty() {
                    break;
                }

                let missing = ledger.unresolved();
                debug!("{} abandoned calls still open after stall grace", open);
                warn!(
                    "Remote stalled on attempt {} with {} segments missing",
                    attempt,
                    missing.len()
                );
                return Err(RecoveryFailure::Stalled {
                    completed: ledger.valid_count(),
                    missing,
                    attempts: attempt,
                });
            }
        }

        if !ledger.unresolved().is_empty() {
            let failures = ledger.failures();
            for f in &failures {
                warn!("Giving up on {}: {}", f.name, f.reason);
            }
            return Err(RecoveryFailure::Exhausted {
                failures,
                attempts: outcome.attempts_used,
            });
        }

        outcome.retries_used = outcome.attempts_used.saturating_sub(1);
        Ok(outcome)
    }

    fn accept_recovered(
        &self,
        reconciliation: &Reconciliation,
        attempt: u32,
        ledger: &mut SegmentLedger,
        outcome: &mut RecoveryOutcome,
        telemetry: &mut TelemetryRecorder,
    ) {
        for name in &reconciliation.recovered {
            info!("RECOVERED: {} (artifact valid despite failed call)", name);
            telemetry.record(RunEvent::SegmentRecovered {
                segment: name.clone(),
                attempt,
            });
            ledger.mark_valid(name);
            outcome.recovered.push(name.clone());
        }
    }
}
