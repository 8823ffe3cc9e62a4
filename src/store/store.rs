use crate::kernel::segment::Catalog;
use crate::store::types::{Artifact, ArtifactState, ExistingArtifacts, ValidityRule, ARTIFACT_EXT};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact i/o at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("refusing to store `{name}`: {reason}")]
    Rejected { name: String, reason: String },
}

/// Narrow view over the output directory. Validity of what is on disk is the
/// single source of truth for completion; nothing else is remembered.
pub trait ArtifactStore: Send + Sync {
    fn root(&self) -> &Path;

    fn rule(&self) -> ValidityRule;

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.root().join(format!("{name}.{ARTIFACT_EXT}"))
    }

    fn inspect(&self, name: &str) -> Result<ArtifactState, StoreError>;

    /// Persist validated audio for `name`, replacing any previous file.
    fn write(&self, name: &str, audio: &[u8]) -> Result<Artifact, StoreError>;

    fn is_valid(&self, name: &str) -> bool {
        self.inspect(name).map(|s| s.is_valid()).unwrap_or(false)
    }

    fn existing_valid_segments(&self, catalog: &Catalog) -> Result<ExistingArtifacts, StoreError> {
        let mut existing = ExistingArtifacts::default();
        for segment in catalog.segments() {
            match self.inspect(segment.name())? {
                ArtifactState::Valid(artifact) => {
                    existing.valid_names.insert(segment.name().to_string());
                    existing.artifacts.insert(segment.name().to_string(), artifact);
                }
                ArtifactState::Invalid { size, reason } => {
                    debug!(segment = segment.name(), size, %reason, "Existing artifact is invalid");
                }
                ArtifactState::Absent => {}
            }
        }
        Ok(existing)
    }
}

/// Artifact store over a plain directory, one `{name}.wav` per segment.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    rule: ValidityRule,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, rule: ValidityRule) -> Self {
        Self {
            root: root.into(),
            rule,
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn rule(&self) -> ValidityRule {
        self.rule
    }

    fn inspect(&self, name: &str) -> Result<ArtifactState, StoreError> {
        let path = self.artifact_path(name);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ArtifactState::Absent),
            Err(e) => return Err(io_err(e)),
        };
        let size = meta.len();

        if let Err(reason) = self.rule.check_size(size) {
            return Ok(ArtifactState::Invalid { size, reason });
        }

        let mut head = [0u8; 4];
        let mut file = fs::File::open(&path).map_err(io_err)?;
        let read = file.read(&mut head).map_err(io_err)?;
        if let Err(reason) = self.rule.check_header(&head[..read]) {
            return Ok(ArtifactState::Invalid { size, reason });
        }

        Ok(ArtifactState::Valid(Artifact {
            name: name.to_string(),
            path,
            size,
        }))
    }

    fn write(&self, name: &str, audio: &[u8]) -> Result<Artifact, StoreError> {
        self.rule
            .check_bytes(audio)
            .map_err(|reason| StoreError::Rejected {
                name: name.to_string(),
                reason,
            })?;

        let path = self.artifact_path(name);
        // Unique staging name: an abandoned call may still be writing the same segment.
        let staged = self
            .root
            .join(format!(".{name}.{}.{ARTIFACT_EXT}.tmp", Uuid::new_v4().simple()));
        let io_err = |p: &Path, source| StoreError::Io {
            path: p.to_path_buf(),
            source,
        };

        {
            let mut file = fs::File::create(&staged).map_err(|e| io_err(&staged, e))?;
            file.write_all(audio).map_err(|e| io_err(&staged, e))?;
            file.sync_all().map_err(|e| io_err(&staged, e))?;
        }
        if let Err(e) = fs::rename(&staged, &path) {
            let _ = fs::remove_file(&staged);
            return Err(io_err(&path, e));
        }

        debug!(segment = name, bytes = audio.len(), "Artifact written");
        Ok(Artifact {
            name: name.to_string(),
            path,
            size: audio.len() as u64,
        })
    }
}
