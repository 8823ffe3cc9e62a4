use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::kernel::segment::SegmentKind;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("timeline file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("timeline encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub name: String,
    pub kind: SegmentKind,
    pub ordinal: u32,
    pub index: Option<u32>,
    pub artifact: PathBuf,
    /// Measured from the concatenated stream.
    pub start_offset: Duration,
    pub duration: Duration,
    /// Word-count estimate made before any audio existed. Informational only.
    pub estimated_duration: Duration,
}

impl TimelineEntry {
    pub fn end_offset(&self) -> Duration {
        self.start_offset + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceGap {
    /// Name of the entry the gap follows.
    pub after: String,
    pub start_offset: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub segment: String,
    pub start: Duration,
    pub end: Duration,
}

/// Ordered, offset-annotated result of assembly. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    output: PathBuf,
    sample_rate: u32,
    channels: u16,
    entries: Vec<TimelineEntry>,
    gaps: Vec<SilenceGap>,
    total_duration: Duration,
}

impl Timeline {
    pub(crate) fn new(
        output: PathBuf,
        sample_rate: u32,
        channels: u16,
        entries: Vec<TimelineEntry>,
        gaps: Vec<SilenceGap>,
        total_duration: Duration,
    ) -> Self {
        Self {
            output,
            sample_rate,
            channels,
            entries,
            gaps,
            total_duration,
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn gaps(&self) -> &[SilenceGap] {
        &self.gaps
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn entry(&self, name: &str) -> Option<&TimelineEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Chapter markers for downstream taggers. Transitions are bridges, not
    /// chapters, and are skipped; each chapter spans only its own segment.
    pub fn chapters(&self) -> Vec<Chapter> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let title = match entry.kind {
                    SegmentKind::Intro => "Introduction".to_string(),
                    SegmentKind::Script => format!("Story {}", entry.index.unwrap_or(0)),
                    SegmentKind::Outro => "Outro".to_string(),
                    SegmentKind::Transition => return None,
                };
                Some(Chapter {
                    title,
                    segment: entry.name.clone(),
                    start: entry.start_offset,
                    end: entry.end_offset(),
                })
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), TimelineError> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, TimelineError> {
        let raw = fs::read_to_string(path).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
