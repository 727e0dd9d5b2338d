//! Per-job advisory locks shared across processes.
//!
//! One lock file per qualified id serializes concurrent executions of the
//! same job. A lock is reclaimable when its record is unparseable, its
//! mtime age exceeds the caller's stale threshold, or its recorded pid no
//! longer names a live process. Every lock acquired by this process is
//! tracked in a process-wide set so an exit hook can release them all.

use crate::error::{CronError, Result};
use crate::job::qid_rel_path;
use crate::state::file_age;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Stale threshold for cron-scheduled jobs.
pub const CRON_STALE_LOCK: Duration = Duration::from_secs(3600);

/// Floor for the interval-derived stale threshold.
pub const MIN_STALE_LOCK: Duration = Duration::from_secs(30);

/// Stale threshold policy: `max(3 × interval, 30s)` for interval jobs,
/// one hour for cron-scheduled jobs.
#[must_use]
pub fn stale_threshold_for(interval: Option<Duration>) -> Duration {
    match interval {
        Some(interval) => (interval * 3).max(MIN_STALE_LOCK),
        None => CRON_STALE_LOCK,
    }
}

/// On-disk lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    /// Writer's pid. Absent in records from interrupted writers.
    #[serde(default)]
    pid: Option<u32>,
    /// When the lock was taken (informational; mtime is authoritative).
    acquired: String,
}

/// Paths of every lock this process currently holds.
fn active_locks() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Release every lock held by this process. Called from the exit hook;
/// errors are swallowed.
pub fn release_all_job_locks() {
    let paths: Vec<PathBuf> = match active_locks().lock() {
        Ok(mut set) => set.drain().collect(),
        Err(_) => return,
    };
    for path in paths {
        let _ = std::fs::remove_file(path);
    }
}

/// Serializes tests that hold guards across the process-global
/// active-locks set, which [`release_all_job_locks`] drains wholesale.
#[cfg(test)]
pub(crate) fn test_lock_serial() -> std::sync::MutexGuard<'static, ()> {
    static SERIAL: Mutex<()> = Mutex::new(());
    SERIAL
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Manager for the per-job lock directory.
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Manager over the given directory.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Manager over the default `~/.cron-burgundy/locks/` directory.
    #[must_use]
    pub fn at_default() -> Self {
        Self::new(crate::burgundy_dirs::locks_dir())
    }

    /// Lock file path for a qualified id (`/` becomes a subdirectory).
    #[must_use]
    pub fn lock_path(&self, qid: &str) -> PathBuf {
        self.dir.join(qid_rel_path(qid, ".lock"))
    }

    /// Try to take the lock for `qid`.
    ///
    /// Returns `Ok(None)` when a live holder refuses us — that is a normal
    /// outcome, not an error. The returned guard releases on drop.
    pub fn acquire(&self, qid: &str, stale_after: Duration) -> Result<Option<JobLockGuard>> {
        let path = self.lock_path(qid);

        if path.exists() && !self.reclaimable(&path, stale_after) {
            return Ok(None);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CronError::Lock(format!("cannot create lock directory: {e}")))?;
        }

        let record = LockRecord {
            pid: Some(std::process::id()),
            acquired: crate::state::iso_timestamp(chrono::Utc::now()),
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| CronError::Lock(format!("cannot serialize lock record: {e}")))?;

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = file.write_all(json.as_bytes());
            }
            // Lost the exclusive-create race to a concurrent acquirer.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => {
                return Err(CronError::Lock(format!(
                    "cannot create lock file {}: {e}",
                    path.display()
                )));
            }
        }

        if let Ok(mut set) = active_locks().lock() {
            set.insert(path.clone());
        }
        Ok(Some(JobLockGuard { path }))
    }

    /// Delete the lock file for `qid` unconditionally (uninstall path).
    pub fn clear(&self, qid: &str) {
        let path = self.lock_path(qid);
        if let Ok(mut set) = active_locks().lock() {
            set.remove(&path);
        }
        let _ = std::fs::remove_file(path);
    }

    /// Run `op` under the job lock.
    ///
    /// Returns `Ok(None)` when the lock was refused (no op ran). The lock
    /// is released on every exit path; a failure inside `op` propagates
    /// after release.
    pub fn with_lock<T, F>(&self, qid: &str, stale_after: Duration, op: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let Some(guard) = self.acquire(qid, stale_after)? else {
            return Ok(None);
        };
        let result = op();
        drop(guard);
        result.map(Some)
    }

    /// Decide whether an existing lock file may be taken over. Deletes the
    /// file when it may.
    fn reclaimable(&self, path: &PathBuf, stale_after: Duration) -> bool {
        let record: Option<LockRecord> = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok());

        let Some(record) = record else {
            // Unparseable records are treated as stale.
            tracing::warn!("deleting malformed lock file {}", path.display());
            let _ = std::fs::remove_file(path);
            return true;
        };

        if let Some(age) = file_age(path)
            && age > stale_after
        {
            tracing::info!(
                "reclaiming stale lock {} (age {:?} > {:?})",
                path.display(),
                age,
                stale_after
            );
            let _ = std::fs::remove_file(path);
            return true;
        }

        match record.pid {
            Some(pid) if !process_alive(pid) => {
                tracing::info!(
                    "reclaiming lock {} from dead pid {pid}",
                    path.display()
                );
                let _ = std::fs::remove_file(path);
                true
            }
            // Live holder, or no pid recorded within the threshold.
            _ => false,
        }
    }
}

/// Held job lock. Dropping releases the file and deregisters it.
pub struct JobLockGuard {
    path: PathBuf,
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = active_locks().lock() {
            set.remove(&self.path);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Null-signal probe. `EPERM` means the pid exists under another user, so
/// the process counts as alive.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    !matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(libc::ESRCH)
    )
}

/// Without a probe, an in-threshold lock is assumed live.
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
