use thiserror::Error;

use super::gate::GateError;
use super::lease::{LeaseError, LeaseHolder};
use super::recovery::{RecoveryFailure, SegmentFailure};
use super::segment::CatalogError;
use crate::audio::assembler::AssemblyError;
use crate::audio::timeline::TimelineError;
use crate::services::tts::RemoteError;
use crate::store::StoreError;

pub type RunResult<T> = Result<T, RunError>;

/// Terminal outcome of a run that did not produce a timeline.
///
/// Every variant is safe to answer by re-invoking the run; the store keeps
/// whatever was finished.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("output directory is held by pid {} (run {}) since {}", .holder.pid, .holder.run_id, .holder.acquired_at)]
    LeaseConflict { holder: LeaseHolder },

    #[error("lease: {0}")]
    Lease(#[source] LeaseError),

    #[error("remote queue not empty ({active} active, {queued} queued); refusing to dispatch")]
    OrphanedRemoteWork { active: u64, queued: u64 },

    #[error("remote unreachable: {0}")]
    RemoteUnreachable(#[source] RemoteError),

    #[error("remote did not drain: {0}")]
    DrainFailed(String),

    #[error("remote stalled after {attempts} attempts: {completed} segments complete, {} missing", .missing.len())]
    Stalled {
        completed: usize,
        missing: Vec<String>,
        attempts: u32,
    },

    #[error("{} segments failed after {attempts} attempts: {}", .failures.len(), failed_names(.failures))]
    Exhausted {
        failures: Vec<SegmentFailure>,
        attempts: u32,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

fn failed_names(failures: &[SegmentFailure]) -> String {
    failures
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RunError {
    /// Stable, machine-readable category for callers deciding between
    /// "re-invoke" and "alert an operator".
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::LeaseConflict { .. } => "lease-conflict",
            Self::Lease(_) => "lease-io",
            Self::OrphanedRemoteWork { .. } => "orphaned-remote-work",
            Self::RemoteUnreachable(_) => "remote-unreachable",
            Self::DrainFailed(_) => "drain-failed",
            Self::Stalled { .. } => "stall",
            Self::Exhausted { .. } => "persistent-failure",
            Self::Catalog(_) => "catalog",
            Self::Store(_) => "store",
            Self::Assembly(_) => "assembly",
            Self::Timeline(_) => "timeline",
        }
    }

    /// Segment names this failure is about, if any.
    pub fn failed_segments(&self) -> Vec<&str> {
        match self {
            Self::Stalled { missing, .. } => missing.iter().map(String::as_str).collect(),
            Self::Exhausted { failures, .. } => failures.iter().map(|f| f.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<LeaseError> for RunError {
    fn from(e: LeaseError) -> Self {
        match e {
            LeaseError::Busy { holder, .. } => RunError::LeaseConflict { holder },
            other => RunError::Lease(other),
        }
    }
}

impl From<GateError> for RunError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::RemoteUnreachable(e) => RunError::RemoteUnreachable(e),
            GateError::OrphanedWork { active, queued } => RunError::OrphanedRemoteWork { active, queued },
            e @ (GateError::DrainTimeout { .. } | GateError::DrainStalled { .. }) => {
                RunError::DrainFailed(e.to_string())
            }
            GateError::Store(e) => RunError::Store(e),
        }
    }
}

impl From<RecoveryFailure> for RunError {
    fn from(e: RecoveryFailure) -> Self {
        match e {
            RecoveryFailure::Stalled {
                completed,
                missing,
                attempts,
            } => RunError::Stalled {
                completed,
                missing,
                attempts,
            },
            RecoveryFailure::Exhausted { failures, attempts } => RunError::Exhausted { failures, attempts },
        }
    }
}
