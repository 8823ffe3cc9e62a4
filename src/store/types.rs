use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

pub const ARTIFACT_EXT: &str = "wav";
pub const DEFAULT_MIN_VALID_BYTES: u64 = 1000;

/// Persisted audio for one segment. The only evidence of completion we trust.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Where an artifact is in its lifecycle: absent -> present-invalid -> present-valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    Absent,
    Invalid { size: u64, reason: String },
    Valid(Artifact),
}

impl ArtifactState {
    pub fn is_valid(&self) -> bool {
        matches!(self, ArtifactState::Valid(_))
    }
}

/// Predicate deciding whether bytes on disk count as a finished artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityRule {
    /// Artifacts must be strictly larger than this.
    pub min_bytes: u64,
    pub require_riff_header: bool,
}

impl Default for ValidityRule {
    fn default() -> Self {
        Self {
            min_bytes: DEFAULT_MIN_VALID_BYTES,
            require_riff_header: true,
        }
    }
}

impl ValidityRule {
    /// Check a complete audio payload. `Err` carries a human-readable reason.
    pub fn check_bytes(&self, data: &[u8]) -> Result<(), String> {
        if data.is_empty() {
            return Err("empty audio body".to_string());
        }
        self.check_size(data.len() as u64)?;
        self.check_header(data)
    }

    pub fn check_size(&self, size: u64) -> Result<(), String> {
        if size <= self.min_bytes {
            return Err(format!("too small ({} bytes, need > {})", size, self.min_bytes));
        }
        Ok(())
    }

    pub fn check_header(&self, head: &[u8]) -> Result<(), String> {
        if self.require_riff_header && !head.starts_with(b"RIFF") {
            let shown: Vec<String> = head.iter().take(4).map(|b| format!("{b:02x}")).collect();
            return Err(format!("invalid WAV header ({}), expected RIFF", shown.join("")));
        }
        Ok(())
    }
}

/// Split of a catalog into what is already satisfied on disk.
#[derive(Debug, Clone, Default)]
pub struct ExistingArtifacts {
    pub valid_names: BTreeSet<String>,
    pub artifacts: BTreeMap<String, Artifact>,
}

impl ExistingArtifacts {
    pub fn len(&self) -> usize {
        self.valid_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.valid_names.contains(name)
    }
}
