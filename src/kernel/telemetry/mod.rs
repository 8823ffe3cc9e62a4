//! Run telemetry.
//!
//! Telemetry is a read-only side channel. Orchestration decisions never read
//! it; it exists for the run report and for verification in tests.
//! Events carry segment names and counts only, never segment text or audio.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use event::RunEvent;
pub use metrics::{compute_metrics, RunMetrics};
pub use recorder::TelemetryRecorder;
