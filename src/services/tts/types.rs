use serde::{Deserialize, Serialize};

/// Aggregate snapshot of the remote worker pool.
///
/// This is all the remote tells us: how much work is in flight in total and a
/// monotonically increasing completion counter. It cannot answer "is job X done".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(rename = "total_active", default)]
    pub active_count: u64,
    #[serde(rename = "total_queued", default)]
    pub queued_count: u64,
    #[serde(rename = "completed", default)]
    pub completed_counter: u64,
    /// Per-worker detail, display only. Scheduling across workers is opaque.
    #[serde(rename = "gpus", default)]
    pub workers: Vec<WorkerStatus>,
}

impl QueueStatus {
    pub fn new(active_count: u64, queued_count: u64, completed_counter: u64) -> Self {
        Self {
            active_count,
            queued_count,
            completed_counter,
            workers: Vec::new(),
        }
    }

    pub fn outstanding(&self) -> u64 {
        self.active_count + self.queued_count
    }

    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(rename = "gpu")]
    pub id: u32,
    /// Text preview of the job currently running, if any.
    #[serde(default)]
    pub active: Option<String>,
    #[serde(default)]
    pub queued: u64,
}

/// One job as tracked by the remote, for operator listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    #[serde(alias = "id")]
    pub job_id: String,
    #[serde(rename = "gpu_id", alias = "gpu", default)]
    pub worker_id: Option<u32>,
    #[serde(default)]
    pub status: String,
    /// Unix seconds.
    #[serde(default)]
    pub submitted_at: Option<f64>,
    #[serde(alias = "text", default)]
    pub text_preview: String,
}

/// `GET /jobs` answers either `{"jobs": [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum JobListing {
    Wrapped { jobs: Vec<JobSummary> },
    Bare(Vec<JobSummary>),
}

impl JobListing {
    pub(crate) fn into_jobs(self) -> Vec<JobSummary> {
        match self {
            JobListing::Wrapped { jobs } | JobListing::Bare(jobs) => jobs,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct QueueCleared {
    #[serde(default)]
    pub cancelled: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SpeakRequest<'a> {
    pub text: &'a str,
    pub voice: &'a str,
    /// Zero asks the server to hold the connection until the job runs.
    pub timeout: u64,
}
