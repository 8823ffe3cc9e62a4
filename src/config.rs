use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::audio::assembler::AssemblySettings;
use crate::kernel::gate::{GatePolicy, QueuePolicy};
use crate::kernel::monitor::MonitorSettings;
use crate::kernel::recovery::RetryPolicy;
use crate::store::ValidityRule;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Top-level configuration. Every section and field has a default, so an
/// empty file (or no file) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub remote: RemoteConfig,
    pub dispatch: DispatchConfig,
    pub monitor: MonitorConfig,
    pub retry: RetryConfig,
    pub store: StoreConfig,
    pub assembly: AssemblyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub voice: String,
    /// Applies to status polls and connection setup, never to synthesis itself.
    pub status_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7849".to_string(),
            voice: "default".to_string(),
            status_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrency: usize,
    pub check_queue: bool,
    pub queue_policy: QueuePolicy,
    pub wait_timeout_secs: u64,
    pub skip_existing: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 25,
            check_queue: true,
            queue_policy: QueuePolicy::Abort,
            wait_timeout_secs: 1800,
            skip_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub stall_threshold_secs: u64,
    pub drain_grace_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stall_threshold_secs: 300,
            drain_grace_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub min_valid_bytes: u64,
    pub require_riff_header: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let rule = ValidityRule::default();
        Self {
            min_valid_bytes: rule.min_bytes,
            require_riff_header: rule.require_riff_header,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub silence_secs: f64,
    pub output_file: String,
    pub timeline_file: String,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            silence_secs: 1.0,
            output_file: "episode.wav".to_string(),
            timeline_file: "timeline.json".to_string(),
        }
    }
}

impl ForgeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.max_concurrency == 0 {
            return Err(ConfigError::Invalid("dispatch.max_concurrency must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("monitor.poll_interval_secs must be at least 1".into()));
        }
        if !(self.retry.backoff_base_secs.is_finite() && self.retry.backoff_base_secs >= 0.0) {
            return Err(ConfigError::Invalid("retry.backoff_base_secs must be >= 0".into()));
        }
        if !(self.assembly.silence_secs.is_finite() && self.assembly.silence_secs >= 0.0) {
            return Err(ConfigError::Invalid("assembly.silence_secs must be >= 0".into()));
        }
        Ok(())
    }

    pub fn validity_rule(&self) -> ValidityRule {
        ValidityRule {
            min_bytes: self.store.min_valid_bytes,
            require_riff_header: self.store.require_riff_header,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            stall_threshold: Duration::from_secs(self.monitor.stall_threshold_secs),
            drain_grace: Duration::from_secs(self.monitor.drain_grace_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            backoff_base: Duration::from_secs_f64(self.retry.backoff_base_secs),
        }
    }

    pub fn gate_policy(&self) -> GatePolicy {
        GatePolicy {
            check_queue: self.dispatch.check_queue,
            queue_policy: self.dispatch.queue_policy,
            wait_timeout: Duration::from_secs(self.dispatch.wait_timeout_secs),
            skip_existing: self.dispatch.skip_existing,
        }
    }

    pub fn assembly_settings(&self) -> AssemblySettings {
        AssemblySettings {
            silence: Duration::from_secs_f64(self.assembly.silence_secs),
            output_file: self.assembly.output_file.clone(),
        }
    }
}
