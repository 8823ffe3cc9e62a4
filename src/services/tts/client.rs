use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::prepare::prepare_text;
use super::types::{JobListing, JobSummary, QueueCleared, QueueStatus, SpeakRequest};
use crate::config::RemoteConfig;
use crate::store::ValidityRule;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("HTTP {status} (job={}): {body}", .job_id.as_deref().unwrap_or("-"))]
    Http {
        status: u16,
        job_id: Option<String>,
        body: String,
    },

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("status decode: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

/// Contract over the remote synthesis pool.
///
/// `submit` carries no timeout of its own: a single job can legitimately sit
/// in the remote queue and then run for minutes. Giving up is decided by the
/// progress monitor, not per call.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Synthesize `text` for segment `name`, returning the complete audio payload.
    async fn submit(&self, name: &str, text: &str) -> Result<Vec<u8>, RemoteError>;

    /// Aggregate queue snapshot.
    async fn poll_status(&self) -> Result<QueueStatus, RemoteError>;
}

#[derive(Clone)]
pub struct HttpRemoteClient {
    speak: Client,
    status: Client,
    base_url: String,
    voice: String,
    rule: ValidityRule,
}

impl HttpRemoteClient {
    pub fn new(config: &RemoteConfig, rule: ValidityRule) -> Result<Self, RemoteError> {
        // No request timeout on the speak client, only on connect.
        let speak = Client::builder()
            .connect_timeout(Duration::from_secs(config.status_timeout_secs))
            .build()?;
        let status = Client::builder()
            .timeout(Duration::from_secs(config.status_timeout_secs))
            .build()?;

        Ok(Self {
            speak,
            status,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            voice: config.voice.clone(),
            rule,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Cancel every job still queued (not yet running) on one worker.
    /// Returns how many the remote reports cancelled.
    pub async fn clear_worker_queue(&self, worker: u32) -> Result<u64, RemoteError> {
        let response = self
            .status
            .delete(format!("{}/gpu/{}/queue", self.base_url, worker))
            .send()
            .await?;
        let response = expect_success(response).await?;
        let cleared: QueueCleared = response.json().await?;
        info!(worker, cancelled = cleared.cancelled, "Worker queue cleared");
        Ok(cleared.cancelled)
    }

    /// Clear the queue of every worker the remote currently reports.
    /// One worker failing does not stop the others.
    pub async fn clear_all_queues(&self) -> Result<Vec<(u32, Result<u64, RemoteError>)>, RemoteError> {
        let status = self.poll_status().await?;
        let mut results = Vec::with_capacity(status.workers.len());
        for worker in &status.workers {
            results.push((worker.id, self.clear_worker_queue(worker.id).await));
        }
        Ok(results)
    }

    /// Jobs the remote is tracking.
    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>, RemoteError> {
        let response = self
            .status
            .get(format!("{}/jobs", self.base_url))
            .send()
            .await?;
        let response = expect_success(response).await?;
        let listing: JobListing = response.json().await?;
        Ok(listing.into_jobs())
    }
}

async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(RemoteError::Http {
        status: response.status().as_u16(),
        job_id: None,
        body: response.text().await.unwrap_or_default().chars().take(100).collect(),
    })
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn submit(&self, name: &str, text: &str) -> Result<Vec<u8>, RemoteError> {
        let prepared = prepare_text(text);
        let request = SpeakRequest {
            text: &prepared,
            voice: &self.voice,
            timeout: 0,
        };

        let response = self
            .speak
            .post(format!("{}/speak", self.base_url))
            .json(&request)
            .send()
            .await?;

        let job_id = response
            .headers()
            .get("X-Job-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let status = response.status();

        if status != StatusCode::OK {
            let body: String = response.text().await.unwrap_or_default().chars().take(100).collect();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                job_id,
                body,
            });
        }

        let audio = response.bytes().await?;
        self.rule
            .check_bytes(&audio)
            .map_err(RemoteError::InvalidAudio)?;

        debug!(segment = name, job = job_id.as_deref().unwrap_or("-"), bytes = audio.len(), "Synthesis returned");
        Ok(audio.to_vec())
    }

    async fn poll_status(&self) -> Result<QueueStatus, RemoteError> {
        let response = self
            .status
            .get(format!("{}/status", self.base_url))
            .send()
            .await?;

        let response = expect_success(response).await?;
        let status: QueueStatus = response.json().await?;
        Ok(status)
    }
}
