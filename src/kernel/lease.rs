use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const LEASE_FILE: &str = ".segment-forge.lease";
/// Advisory lock file that serializes inspecting and reclaiming the marker.
pub const LEASE_GUARD_FILE: &str = ".segment-forge.lease.lock";

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("output directory {} is leased by pid {} (run {}) since {}", .path.display(), .holder.pid, .holder.run_id, .holder.acquired_at)]
    Busy { path: PathBuf, holder: LeaseHolder },

    #[error("lease file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("lease encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Identity recorded in the lease marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseHolder {
    pub pid: u32,
    pub run_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive hold on one output directory for the duration of a run.
///
/// A lease whose recorded holder process is no longer alive is stale and is
/// reclaimed silently. There is no TTL: a live holder keeps the lease however
/// long the run takes. Dropping the lease releases it.
#[derive(Debug)]
pub struct RunLease {
    path: PathBuf,
    holder: LeaseHolder,
    released: bool,
}

impl RunLease {
    pub fn acquire(dir: &Path, run_id: Uuid) -> Result<Self, LeaseError> {
        let path = dir.join(LEASE_FILE);
        let io_err = |source| LeaseError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_err)?;

        let holder = LeaseHolder {
            pid: std::process::id(),
            run_id,
            acquired_at: Utc::now(),
        };

        // Write the full record aside, then hard-link it into place: the link
        // fails if a lease already exists and readers never see a partial file.
        let staged = dir.join(format!("{LEASE_FILE}.{run_id}"));
        {
            let mut file = fs::File::create(&staged).map_err(io_err)?;
            file.write_all(serde_json::to_string_pretty(&holder)?.as_bytes())
                .map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        let result = Self::link(dir, &staged, &path);
        let _ = fs::remove_file(&staged);
        result?;

        info!(path = %path.display(), pid = holder.pid, run = %run_id, "Lease acquired");
        Ok(Self {
            path,
            holder,
            released: false,
        })
    }

    fn link(dir: &Path, staged: &Path, path: &Path) -> Result<(), LeaseError> {
        let io_err = |source| LeaseError::Io {
            path: path.to_path_buf(),
            source,
        };

        // Held across read-check-remove so two acquirers cannot both reclaim
        // the same stale marker. The OS drops it if this process dies.
        let _guard = reclaim_guard(dir).map_err(io_err)?;

        match fs::hard_link(staged, path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => return Err(io_err(source)),
        }

        match read_holder(path) {
            Ok(Some(existing)) if pid_is_alive(existing.pid) => {
                return Err(LeaseError::Busy {
                    path: path.to_path_buf(),
                    holder: existing,
                });
            }
            Ok(Some(existing)) => {
                warn!(pid = existing.pid, run = %existing.run_id, "Reclaiming stale lease");
            }
            // Released between the link attempt and the read.
            Ok(None) => {}
            Err(_) => {
                warn!(path = %path.display(), "Reclaiming unreadable lease");
            }
        }

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(io_err(source)),
        }
        fs::hard_link(staged, path).map_err(io_err)
    }

    pub fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Release the lease. Safe to call any number of times.
    ///
    /// Only removes the marker if it still names this run, so a lease that
    /// was reclaimed by someone else is left alone.
    pub fn release(&mut self) -> Result<(), LeaseError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        match read_holder(&self.path) {
            Ok(Some(current)) if current.run_id == self.holder.run_id => {
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(LeaseError::Io {
                            path: self.path.clone(),
                            source,
                        })
                    }
                }
                info!(path = %self.path.display(), run = %self.holder.run_id, "Lease released");
            }
            Ok(Some(current)) => {
                warn!(run = %self.holder.run_id, now_held_by = %current.run_id, "Lease taken over; leaving marker");
            }
            Ok(None) | Err(_) => {
                debug!(path = %self.path.display(), "Lease marker already gone");
            }
        }
        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Lease release on drop failed: {}", e);
        }
    }
}

/// Current lease holder recorded in `dir`, if any.
pub fn current_holder(dir: &Path) -> Result<Option<LeaseHolder>, LeaseError> {
    read_holder(&dir.join(LEASE_FILE))
}

fn read_holder(path: &Path) -> Result<Option<LeaseHolder>, LeaseError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LeaseError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn reclaim_guard(dir: &Path) -> io::Result<nix::fcntl::Flock<fs::File>> {
    use nix::fcntl::{Flock, FlockArg};

    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LEASE_GUARD_FILE))?;
    Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| io::Error::from(errno))
}

#[cfg(not(unix))]
fn reclaim_guard(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
pub fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

// Without /proc we cannot tell; treat every holder as live.
#[cfg(not(target_os = "linux"))]
pub fn pid_is_alive(_pid: u32) -> bool {
    true
}
