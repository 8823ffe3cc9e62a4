use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::monitor::{MonitorSettings, MonitorVerdict, ProgressMonitor};
use super::segment::{Catalog, Segment};
use crate::services::tts::{QueueStatus, RemoteClient, RemoteError};
use crate::store::{ArtifactStore, ExistingArtifacts, StoreError};

/// What to do when the remote queue is busy before we dispatch anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    #[default]
    Abort,
    Proceed,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePolicy {
    pub check_queue: bool,
    pub queue_policy: QueuePolicy,
    pub wait_timeout: Duration,
    pub skip_existing: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            check_queue: true,
            queue_policy: QueuePolicy::Abort,
            wait_timeout: Duration::from_secs(1800),
            skip_existing: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("remote unreachable during pre-flight: {0}")]
    RemoteUnreachable(#[source] RemoteError),

    #[error(
        "remote queue not empty ({active} active, {queued} queued): orphaned work from an earlier run, \
         or another run bypassing the lease. Wait for it to drain, or rerun with --wait or --force"
    )]
    OrphanedWork { active: u64, queued: u64 },

    #[error("remote queue did not drain within {}s", .timeout.as_secs())]
    DrainTimeout { timeout: Duration },

    #[error("remote queue stalled while waiting to drain ({completed} completed, {outstanding} outstanding)")]
    DrainStalled { completed: u64, outstanding: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Everything already exists; nothing to dispatch.
    Satisfied { existing: ExistingArtifacts },
    Dispatch {
        existing: ExistingArtifacts,
        needed: Vec<Segment>,
    },
}

impl GateDecision {
    pub fn existing(&self) -> &ExistingArtifacts {
        match self {
            GateDecision::Satisfied { existing } | GateDecision::Dispatch { existing, .. } => existing,
        }
    }

    pub fn needed(&self) -> &[Segment] {
        match self {
            GateDecision::Satisfied { .. } => &[],
            GateDecision::Dispatch { needed, .. } => needed,
        }
    }
}

/// Pre-flight: refuse to start on a busy remote, then split the catalog into
/// already-satisfied and still-needed segments.
pub struct DispatchGate<'a> {
    client: &'a dyn RemoteClient,
    store: &'a dyn ArtifactStore,
    policy: &'a GatePolicy,
    monitor: MonitorSettings,
}

impl<'a> DispatchGate<'a> {
    pub fn new(
        client: &'a dyn RemoteClient,
        store: &'a dyn ArtifactStore,
        policy: &'a GatePolicy,
        monitor: MonitorSettings,
    ) -> Self {
        Self {
            client,
            store,
            policy,
            monitor,
        }
    }

    /// Returns the queue snapshot taken (if the check ran) alongside the decision.
    pub async fn evaluate(
        &self,
        catalog: &Catalog,
    ) -> Result<(Option<QueueStatus>, GateDecision), GateError> {
        let status = if self.policy.check_queue {
            Some(self.check_queue().await?)
        } else {
            None
        };

        let existing = if self.policy.skip_existing {
            self.store.existing_valid_segments(catalog)?
        } else {
            ExistingArtifacts::default()
        };

        let needed = catalog.without(&existing.artifacts);
        if !existing.is_empty() {
            let preview: Vec<&str> = existing.valid_names.iter().take(5).map(String::as_str).collect();
            info!(
                "Skipping {} existing valid artifacts: {:?}{}",
                existing.len(),
                preview,
                if existing.len() > 5 { "..." } else { "" }
            );
        }

        if needed.is_empty() {
            info!("All {} segments already have valid artifacts", catalog.len());
            return Ok((status, GateDecision::Satisfied { existing }));
        }

        info!("{} of {} segments need synthesis", needed.len(), catalog.len());
        Ok((status, GateDecision::Dispatch { existing, needed }))
    }

    async fn check_queue(&self) -> Result<QueueStatus, GateError> {
        let status = self
            .client
            .poll_status()
            .await
            .map_err(GateError::RemoteUnreachable)?;
        info!(
            active = status.active_count,
            queued = status.queued_count,
            "Remote queue: {} active, {} queued",
            status.active_count,
            status.queued_count
        );

        if status.is_drained() {
            return Ok(status);
        }

        match self.policy.queue_policy {
            QueuePolicy::Abort => Err(GateError::OrphanedWork {
                active: status.active_count,
                queued: status.queued_count,
            }),
            QueuePolicy::Proceed => {
                warn!("Remote queue not empty; proceeding as requested");
                Ok(status)
            }
            QueuePolicy::Wait => self.wait_for_drain().await,
        }
    }

    async fn wait_for_drain(&self) -> Result<QueueStatus, GateError> {
        info!("Waiting up to {}s for remote queue to drain", self.policy.wait_timeout.as_secs());
        let cancel = CancellationToken::new();
        let monitor = ProgressMonitor::new(self.monitor, Instant::now());

        let verdict = tokio::time::timeout(
            self.policy.wait_timeout,
            monitor.watch(self.client, cancel.clone()),
        )
        .await;
        cancel.cancel();

        match verdict {
            Ok(Some(MonitorVerdict::Drained { completed })) => {
                info!("Remote queue drained");
                Ok(QueueStatus::new(0, 0, completed))
            }
            Ok(Some(MonitorVerdict::Stalled {
                completed,
                outstanding,
                ..
            })) => Err(GateError::DrainStalled {
                completed,
                outstanding,
            }),
            Ok(_) | Err(_) => Err(GateError::DrainTimeout {
                timeout: self.policy.wait_timeout,
            }),
        }
    }
}
