#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use segment_forge::services::tts::{QueueStatus, RemoteClient, RemoteError};
use segment_forge::{Catalog, ForgeConfig};

pub const SAMPLE_RATE: u32 = 8_000;

/// 16-bit mono WAV of `seconds` length.
pub fn wav_bytes(seconds: f64) -> Vec<u8> {
    wav_bytes_with(seconds, SAMPLE_RATE, 1)
}

pub fn wav_bytes_with(seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        let frames = (seconds * sample_rate as f64).round() as u64;
        for i in 0..frames {
            let sample = ((i % 100) as i16 - 50) * 100;
            for _ in 0..channels {
                writer.write_sample(sample).unwrap();
            }
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn write_wav(dir: &Path, name: &str, seconds: f64) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(format!("{name}.wav"));
    std::fs::write(&path, wav_bytes(seconds)).unwrap();
    path
}

pub fn three_segments() -> Catalog {
    Catalog::new([
        ("00_intro", "Welcome to the show."),
        ("01_script_01", "Today we look at one story."),
        ("02_outro", "Thanks for listening."),
    ])
    .unwrap()
}

pub fn episode(scripts: usize) -> Catalog {
    let scripts_text: Vec<String> = (1..=scripts).map(|i| format!("Story number {i}.")).collect();
    let transitions: Vec<String> = (1..scripts).map(|i| format!("After story {i}.")).collect();
    Catalog::compose("Hello.", &scripts_text, &transitions, "Goodbye.").unwrap()
}

/// Defaults, but with short backoff so paused-time tests stay readable.
pub fn test_config() -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.retry.backoff_base_secs = 2.0;
    config.dispatch.max_concurrency = 4;
    config
}

/// Scriptable stand-in for the remote worker pool.
///
/// By default every submit succeeds with one second of audio, and status is
/// derived from the calls currently in flight.
#[derive(Default)]
pub struct FakeRemote {
    fail_times: Mutex<HashMap<String, u32>>,
    always_fail: HashSet<String>,
    hang: HashSet<String>,
    delays: HashMap<String, Duration>,
    write_then_fail: HashMap<String, PathBuf>,
    durations: HashMap<String, f64>,
    status_feed: Mutex<VecDeque<QueueStatus>>,
    unreachable: bool,
    dark_after: Option<u64>,
    in_flight: AtomicU64,
    completed: AtomicU64,
    polls: AtomicU64,
    submits: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `name` for its first `times` submissions.
    pub fn failing(self, name: &str, times: u32) -> Self {
        self.fail_times.lock().unwrap().insert(name.to_string(), times);
        self
    }

    pub fn always_failing(mut self, name: &str) -> Self {
        self.always_fail.insert(name.to_string());
        self
    }

    /// Submissions for `name` never return.
    pub fn hanging(mut self, name: &str) -> Self {
        self.hang.insert(name.to_string());
        self
    }

    pub fn delayed(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    pub fn with_duration(mut self, name: &str, seconds: f64) -> Self {
        self.durations.insert(name.to_string(), seconds);
        self
    }

    /// The remote persists the artifact into `dir` itself, then the call errors.
    pub fn write_then_fail(mut self, name: &str, dir: &Path) -> Self {
        self.write_then_fail.insert(name.to_string(), dir.to_path_buf());
        self
    }

    /// Scripted status replies; the last one repeats forever.
    pub fn with_status_feed(self, feed: Vec<QueueStatus>) -> Self {
        *self.status_feed.lock().unwrap() = feed.into();
        self
    }

    pub fn with_status(self, status: QueueStatus) -> Self {
        self.with_status_feed(vec![status])
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Answer the first `polls` status checks, then refuse every later one.
    pub fn unreachable_after(mut self, polls: u64) -> Self {
        self.dark_after = Some(polls);
        self
    }

    pub fn submits(&self) -> Vec<String> {
        self.submits.lock().unwrap().clone()
    }

    pub fn submit_count(&self, name: &str) -> usize {
        self.submits.lock().unwrap().iter().filter(|n| *n == name).count()
    }

    /// Names in the order their calls returned successfully.
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn submit(&self, name: &str, _text: &str) -> Result<Vec<u8>, RemoteError> {
        self.submits.lock().unwrap().push(name.to_string());
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if self.hang.contains(name) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let seconds = self.durations.get(name).copied().unwrap_or(1.0);

        if let Some(dir) = self.write_then_fail.get(name) {
            write_wav(dir, name, seconds);
            self.completed.fetch_add(1, Ordering::SeqCst);
            return Err(RemoteError::Transport("connection reset by peer".into()));
        }
        if self.always_fail.contains(name) {
            return Err(RemoteError::Http {
                status: 500,
                job_id: Some("job-x".into()),
                body: "worker crashed".into(),
            });
        }
        {
            let mut fails = self.fail_times.lock().unwrap();
            if let Some(left) = fails.get_mut(name) {
                if *left > 0 {
                    *left -= 1;
                    return Err(RemoteError::Transport("connection refused".into()));
                }
            }
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(name.to_string());
        Ok(wav_bytes(seconds))
    }

    async fn poll_status(&self) -> Result<QueueStatus, RemoteError> {
        let seen = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.unreachable || self.dark_after.is_some_and(|n| seen > n) {
            return Err(RemoteError::Transport("connection refused".into()));
        }

        let mut feed = self.status_feed.lock().unwrap();
        if let Some(next) = feed.front().cloned() {
            if feed.len() > 1 {
                feed.pop_front();
            }
            return Ok(next);
        }

        Ok(QueueStatus::new(
            self.in_flight.load(Ordering::SeqCst),
            0,
            self.completed.load(Ordering::SeqCst),
        ))
    }
}
