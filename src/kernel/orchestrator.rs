use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{RunError, RunResult};
use super::gate::{DispatchGate, GateDecision};
use super::lease::RunLease;
use super::recovery::RecoveryRetrier;
use super::segment::Catalog;
use super::submitter::JobSubmitter;
use super::telemetry::{RunEvent, RunMetrics, TelemetryRecorder};
use crate::audio::{Assembler, Timeline};
use crate::config::ForgeConfig;
use crate::services::tts::RemoteClient;
use crate::store::{ArtifactStore, FsArtifactStore};

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub timeline: Timeline,
    pub timeline_path: PathBuf,
    /// Segments that were already valid on disk and were not submitted.
    pub existing: Vec<String>,
    /// Calls made across every round.
    pub submitted: usize,
    pub retries_used: u32,
    pub recovered: Vec<String>,
    pub metrics: RunMetrics,
    pub events: Vec<RunEvent>,
}

/// Drives one run end to end: lease, pre-flight, dispatch with recovery,
/// assembly. Returns a complete timeline or a terminal failure; never a
/// partial success.
pub struct Orchestrator {
    output_dir: PathBuf,
    config: ForgeConfig,
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn ArtifactStore>,
}

impl Orchestrator {
    pub fn new(output_dir: impl Into<PathBuf>, config: ForgeConfig, client: Arc<dyn RemoteClient>) -> Self {
        let output_dir = output_dir.into();
        let store = Arc::new(FsArtifactStore::new(&output_dir, config.validity_rule()));
        Self {
            output_dir,
            config,
            client,
            store,
        }
    }

    /// Use a different artifact store rooted in the same output directory.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub async fn run(&self, catalog: &Catalog) -> RunResult<RunReport> {
        let run_id = Uuid::new_v4();
        let mut lease = RunLease::acquire(&self.output_dir, run_id)?;

        let mut telemetry = TelemetryRecorder::new();
        telemetry.record(RunEvent::LeaseAcquired { run_id });
        info!(run = %run_id, segments = catalog.len(), "Run started in {}", self.output_dir.display());

        let submitter = JobSubmitter::new(
            self.client.clone(),
            self.store.clone(),
            self.config.dispatch.max_concurrency,
            self.config.monitor_settings(),
        );

        let result = self.run_leased(run_id, catalog, &submitter, &mut telemetry).await;

        // Abandoned calls must stop before the directory is handed back.
        submitter.shutdown().await;
        if let Err(e) = lease.release() {
            warn!("Lease release failed: {}", e);
        }

        match &result {
            Ok(report) => info!(
                run = %run_id,
                submitted = report.submitted,
                retries = report.retries_used,
                "Run complete: {} segments, {:.1}s",
                report.timeline.entries().len(),
                report.timeline.total_duration().as_secs_f64()
            ),
            Err(e) => warn!(run = %run_id, category = e.category(), "Run failed: {}", e),
        }
        result
    }

    async fn run_leased(
        &self,
        run_id: Uuid,
        catalog: &Catalog,
        submitter: &JobSubmitter,
        telemetry: &mut TelemetryRecorder,
    ) -> RunResult<RunReport> {
        let gate_policy = self.config.gate_policy();
        let gate = DispatchGate::new(
            self.client.as_ref(),
            self.store.as_ref(),
            &gate_policy,
            self.config.monitor_settings(),
        );
        let (queue, decision) = gate.evaluate(catalog).await?;

        let existing: Vec<String> = decision.existing().valid_names.iter().cloned().collect();
        telemetry.record(RunEvent::Preflight {
            active: queue.as_ref().map_or(0, |q| q.active_count),
            queued: queue.as_ref().map_or(0, |q| q.queued_count),
            existing: existing.len(),
            needed: decision.needed().len(),
        });

        let mut submitted = 0;
        let mut retries_used = 0;
        let mut recovered = Vec::new();

        if let GateDecision::Dispatch { needed, .. } = &decision {
            let retrier = RecoveryRetrier::new(submitter, self.store.as_ref(), self.config.retry_policy());
            let outcome = retrier.run(needed, telemetry).await?;
            submitted = outcome.submitted;
            retries_used = outcome.retries_used;
            recovered = outcome.recovered;
        }

        let settings = self.config.assembly_settings();
        let timeline = Assembler::new(self.store.as_ref(), &settings).assemble(catalog)?;
        telemetry.record(RunEvent::Assembled {
            segments: timeline.entries().len(),
            total_duration_ms: timeline.total_duration().as_millis() as u64,
        });

        let timeline_path = self.store.root().join(&self.config.assembly.timeline_file);
        timeline.save(&timeline_path)?;

        Ok(RunReport {
            run_id,
            timeline,
            timeline_path,
            existing,
            submitted,
            retries_used,
            recovered,
            metrics: telemetry.metrics(),
            events: telemetry.events().cloned().collect(),
        })
    }
}
