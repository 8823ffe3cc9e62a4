use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Allowed: segment names, attempt numbers, counts, durations.
// Forbidden: segment text, audio bytes.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunEvent {
    LeaseAcquired {
        run_id: Uuid,
    },

    Preflight {
        active: u64,
        queued: u64,
        existing: usize,
        needed: usize,
    },

    RoundStarted {
        attempt: u32,
        segments: usize,
    },

    SegmentSubmitted {
        segment: String,
        attempt: u32,
    },

    SegmentCompleted {
        segment: String,
        attempt: u32,
        bytes: u64,
        elapsed_ms: u64,
    },

    SegmentFailed {
        segment: String,
        attempt: u32,
        reason: String,
    },

    /// A failed call whose artifact turned up valid anyway.
    SegmentRecovered {
        segment: String,
        attempt: u32,
    },

    RoundFinished {
        attempt: u32,
        completed: usize,
        failed: usize,
    },

    StallDetected {
        attempt: u32,
        completed_counter: u64,
        outstanding: u64,
        stalled_ms: u64,
    },

    Backoff {
        attempt: u32,
        delay_ms: u64,
    },

    Assembled {
        segments: usize,
        total_duration_ms: u64,
    },
}
