use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::timeline::{SilenceGap, Timeline, TimelineEntry};
use crate::kernel::segment::{Catalog, Segment};
use crate::store::{Artifact, ArtifactState, ArtifactStore, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblySettings {
    /// Silence inserted between adjacent segments.
    pub silence: Duration,
    /// File name of the combined output, relative to the store root.
    pub output_file: String,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            silence: Duration::from_secs(1),
            output_file: "episode.wav".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("segment `{name}` has no valid artifact ({state})")]
    MissingArtifact { name: String, state: String },

    #[error("`{name}` is {found}, expected {expected} like the first segment")]
    FormatMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("wav {}: {source}", .path.display())]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe(spec: &WavSpec) -> String {
    let format = match spec.sample_format {
        SampleFormat::Int => "int",
        SampleFormat::Float => "float",
    };
    format!(
        "{} Hz, {} ch, {}-bit {}",
        spec.sample_rate, spec.channels, spec.bits_per_sample, format
    )
}

/// Concatenates every segment's artifact in ordinal order with silence in between,
/// measuring real offsets from the combined stream.
pub struct Assembler<'a> {
    store: &'a dyn ArtifactStore,
    settings: &'a AssemblySettings,
}

impl<'a> Assembler<'a> {
    pub fn new(store: &'a dyn ArtifactStore, settings: &'a AssemblySettings) -> Self {
        Self { store, settings }
    }

    pub fn output_path(&self) -> PathBuf {
        self.store.root().join(&self.settings.output_file)
    }

    pub fn assemble(&self, catalog: &Catalog) -> Result<Timeline, AssemblyError> {
        let mut ordered: Vec<&Segment> = catalog.segments().iter().collect();
        // Completion order is irrelevant; only the ordinal decides placement.
        ordered.sort_by_key(|s| s.ordinal());

        let mut inputs = Vec::with_capacity(ordered.len());
        for segment in ordered {
            match self.store.inspect(segment.name())? {
                ArtifactState::Valid(artifact) => inputs.push((segment, artifact)),
                ArtifactState::Invalid { size, reason } => {
                    return Err(AssemblyError::MissingArtifact {
                        name: segment.name().to_string(),
                        state: format!("invalid, {size} bytes: {reason}"),
                    })
                }
                ArtifactState::Absent => {
                    return Err(AssemblyError::MissingArtifact {
                        name: segment.name().to_string(),
                        state: "absent".to_string(),
                    })
                }
            }
        }

        let Some((_, first)) = inputs.first() else {
            return Err(AssemblyError::MissingArtifact {
                name: String::new(),
                state: "empty catalog".to_string(),
            });
        };
        let spec = open(&first.path)?.spec();

        let output = self.output_path();
        let staged = self
            .store
            .root()
            .join(format!(".{}.tmp", self.settings.output_file));

        let result = self.concat(&inputs, spec, &staged, &output);
        if result.is_err() {
            let _ = fs::remove_file(&staged);
        }
        let timeline = result?;

        fs::rename(&staged, &output).map_err(|source| AssemblyError::Io {
            path: output.clone(),
            source,
        })?;

        info!(
            "Assembled {} segments into {} ({:.1}s)",
            timeline.entries().len(),
            output.display(),
            timeline.total_duration().as_secs_f64()
        );
        Ok(timeline)
    }

    fn concat(
        &self,
        inputs: &[(&Segment, Artifact)],
        spec: WavSpec,
        staged: &Path,
        output: &Path,
    ) -> Result<Timeline, AssemblyError> {
        let wav_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| AssemblyError::Wav { path, source }
        };

        let mut writer = WavWriter::create(staged, spec).map_err(wav_err(staged))?;
        let rate = spec.sample_rate as f64;
        let to_duration = |frames: u64| Duration::from_secs_f64(frames as f64 / rate);
        let silence_frames = (self.settings.silence.as_secs_f64() * rate).round() as u64;

        let mut frames_written = 0u64;
        let mut entries = Vec::with_capacity(inputs.len());
        let mut gaps = Vec::with_capacity(inputs.len().saturating_sub(1));

        for (i, (segment, artifact)) in inputs.iter().enumerate() {
            if i > 0 {
                write_silence(&mut writer, spec, silence_frames).map_err(wav_err(staged))?;
                gaps.push(SilenceGap {
                    after: inputs[i - 1].0.name().to_string(),
                    start_offset: to_duration(frames_written),
                    duration: to_duration(silence_frames),
                });
                frames_written += silence_frames;
            }

            let mut reader = open(&artifact.path)?;
            let found = reader.spec();
            if found.channels != spec.channels
                || found.sample_rate != spec.sample_rate
                || found.bits_per_sample != spec.bits_per_sample
                || found.sample_format != spec.sample_format
            {
                return Err(AssemblyError::FormatMismatch {
                    name: segment.name().to_string(),
                    expected: describe(&spec),
                    found: describe(&found),
                });
            }

            let samples = match spec.sample_format {
                SampleFormat::Int => copy_samples::<i32, _>(&mut reader, &mut writer),
                SampleFormat::Float => copy_samples::<f32, _>(&mut reader, &mut writer),
            }
            .map_err(wav_err(&artifact.path))?;
            let frames = samples / spec.channels.max(1) as u64;

            debug!(segment = segment.name(), frames, "Appended segment");
            entries.push(TimelineEntry {
                name: segment.name().to_string(),
                kind: segment.kind(),
                ordinal: segment.ordinal(),
                index: segment.index(),
                artifact: artifact.path.clone(),
                start_offset: to_duration(frames_written),
                duration: to_duration(frames),
                estimated_duration: Duration::from_secs_f64(segment.expected_duration_estimate()),
            });
            frames_written += frames;
        }

        writer.finalize().map_err(wav_err(staged))?;

        Ok(Timeline::new(
            output.to_path_buf(),
            spec.sample_rate,
            spec.channels,
            entries,
            gaps,
            to_duration(frames_written),
        ))
    }
}

fn open(path: &Path) -> Result<WavReader<std::io::BufReader<fs::File>>, AssemblyError> {
    WavReader::open(path).map_err(|source| AssemblyError::Wav {
        path: path.to_path_buf(),
        source,
    })
}

fn copy_samples<S, W>(
    reader: &mut WavReader<std::io::BufReader<fs::File>>,
    writer: &mut WavWriter<W>,
) -> Result<u64, hound::Error>
where
    S: hound::Sample,
    W: Write + Seek,
{
    let mut count = 0u64;
    for sample in reader.samples::<S>() {
        writer.write_sample(sample?)?;
        count += 1;
    }
    Ok(count)
}

fn write_silence<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    spec: WavSpec,
    frames: u64,
) -> Result<(), hound::Error> {
    let samples = frames * spec.channels as u64;
    for _ in 0..samples {
        match spec.sample_format {
            SampleFormat::Int => writer.write_sample(0i32)?,
            SampleFormat::Float => writer.write_sample(0.0f32)?,
        }
    }
    Ok(())
}
