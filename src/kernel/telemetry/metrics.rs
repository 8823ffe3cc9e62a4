use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::event::RunEvent;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub rounds: u32,
    /// Rounds beyond the first.
    pub retries_used: u32,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub recovered: u64,
    pub stalls: u64,
    pub backoff_total_ms: u64,
    pub avg_completion_ms: f64,
    pub max_completion_ms: u64,
    pub skipped_existing: usize,
}

pub fn compute_metrics(events: &VecDeque<RunEvent>) -> RunMetrics {
    let mut metrics = RunMetrics::default();
    let mut completion_total_ms = 0u64;

    for event in events {
        match event {
            RunEvent::Preflight { existing, .. } => metrics.skipped_existing = *existing,
            RunEvent::RoundStarted { attempt, .. } => {
                metrics.rounds = metrics.rounds.max(*attempt);
            }
            RunEvent::SegmentSubmitted { .. } => metrics.submitted += 1,
            RunEvent::SegmentCompleted { elapsed_ms, .. } => {
                metrics.completed += 1;
                completion_total_ms += elapsed_ms;
                metrics.max_completion_ms = metrics.max_completion_ms.max(*elapsed_ms);
            }
            RunEvent::SegmentFailed { .. } => metrics.failed += 1,
            RunEvent::SegmentRecovered { .. } => metrics.recovered += 1,
            RunEvent::StallDetected { .. } => metrics.stalls += 1,
            RunEvent::Backoff { delay_ms, .. } => metrics.backoff_total_ms += delay_ms,
            _ => {}
        }
    }

    metrics.retries_used = metrics.rounds.saturating_sub(1);
    if metrics.completed > 0 {
        metrics.avg_completion_ms = completion_total_ms as f64 / metrics.completed as f64;
    }

    metrics
}
