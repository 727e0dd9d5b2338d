//! Persistent per-job state, shared across short-lived processes.
//!
//! A single JSON document maps qualified ids to last-run timestamps, plus
//! `<qid>:nextRun` entries for scheduler-triggered interval runs and the
//! reserved `_paused` entry (the literal `true` for a global pause, or an
//! array of qualified ids). Every read-modify-write happens under a sibling
//! `state.lock` file and lands via write-to-temp + atomic rename.

use crate::error::{CronError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Reserved key holding the pause marker.
const PAUSED_KEY: &str = "_paused";

/// Age after which a state lock file is considered abandoned.
pub const LOCK_STALE_MS: u64 = 30_000;

/// How long a writer waits for the state lock before giving up.
pub const LOCK_TIMEOUT_MS: u64 = 10_000;

/// Sleep between lock acquisition attempts.
const LOCK_RETRY_MS: u64 = 50;

/// The on-disk mapping. Keys sort deterministically on serialization.
pub type StateMap = serde_json::Map<String, Value>;

/// Which jobs a pause or resume applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseTarget<'a> {
    /// Every job, via the `_paused = true` marker.
    All,
    /// One qualified id.
    Job(&'a str),
}

/// Decoded pause marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PauseStatus {
    /// Global pause flag.
    pub all: bool,
    /// Individually paused qualified ids.
    pub jobs: BTreeSet<String>,
}

/// What a resume request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The pause entry was removed (or the global flag cleared).
    Resumed,
    /// Nothing was paused for this target.
    NotPaused,
    /// A specific id was requested while `_paused = true`; the global flag
    /// is left intact and the caller should tell the user to resume "all".
    GloballyPaused,
}

/// File-backed state store with a cross-process write lock.
pub struct StateStore {
    path: PathBuf,
    lock_path: PathBuf,
    stale_after: Duration,
    timeout: Duration,
}

impl StateStore {
    /// Create a store around the given state file. The lock file is the
    /// sibling with a `.lock` extension (`state.json` → `state.lock`).
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        let lock_path = path.with_extension("lock");
        Self {
            path,
            lock_path,
            stale_after: Duration::from_millis(LOCK_STALE_MS),
            timeout: Duration::from_millis(LOCK_TIMEOUT_MS),
        }
    }

    /// Store at the default location under `~/.cron-burgundy/`.
    #[must_use]
    pub fn at_default() -> Self {
        Self::new(crate::burgundy_dirs::state_file())
    }

    /// Override lock timings (tests).
    #[must_use]
    pub fn with_lock_timings(mut self, stale_after: Duration, timeout: Duration) -> Self {
        self.stale_after = stale_after;
        self.timeout = timeout;
        self
    }

    /// Unlocked snapshot read. A missing file yields an empty mapping.
    pub fn get_state(&self) -> Result<StateMap> {
        self.load()
    }

    /// Locked read-modify-write: load, apply `f`, write atomically.
    ///
    /// Returns the mapping as written.
    pub fn update_state<F>(&self, f: F) -> Result<StateMap>
    where
        F: FnOnce(&mut StateMap),
    {
        let _guard = self.acquire_file_lock()?;
        let mut map = self.load()?;
        f(&mut map);
        self.write_atomic(&map)?;
        Ok(map)
    }

    /// Record a successful run at the current time.
    ///
    /// For scheduler-triggered interval jobs, pass the interval so
    /// `<qid>:nextRun` is set to `now + interval`.
    pub fn mark_run(&self, qid: &str, interval: Option<Duration>) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let stamp = iso_timestamp(now);
        self.update_state(|map| {
            map.insert(qid.to_owned(), Value::String(stamp.clone()));
            if let Some(interval) = interval {
                let next = now
                    + chrono::TimeDelta::from_std(interval)
                        .unwrap_or_else(|_| chrono::TimeDelta::zero());
                map.insert(next_run_key(qid), Value::String(iso_timestamp(next)));
            }
        })?;
        Ok(now)
    }

    /// Timestamp of the last successful run, if any.
    pub fn get_last_run(&self, qid: &str) -> Result<Option<DateTime<Utc>>> {
        let map = self.load()?;
        Ok(map.get(qid).and_then(parse_timestamp))
    }

    /// The `<qid>:nextRun` projection, set only for scheduled interval runs.
    pub fn get_next_scheduled_run(&self, qid: &str) -> Result<Option<DateTime<Utc>>> {
        let map = self.load()?;
        Ok(map.get(&next_run_key(qid)).and_then(parse_timestamp))
    }

    /// Pause all jobs or one qualified id.
    ///
    /// Pausing "all" replaces any per-job list with the `true` marker.
    /// Pausing one id is a no-op while the global marker is set.
    pub fn pause(&self, target: PauseTarget<'_>) -> Result<()> {
        self.update_state(|map| match target {
            PauseTarget::All => {
                map.insert(PAUSED_KEY.to_owned(), Value::Bool(true));
            }
            PauseTarget::Job(qid) => {
                let mut status = decode_pause(map.get(PAUSED_KEY));
                if status.all {
                    return;
                }
                status.jobs.insert(qid.to_owned());
                map.insert(PAUSED_KEY.to_owned(), encode_pause(&status));
            }
        })?;
        Ok(())
    }

    /// Resume all jobs or one qualified id.
    pub fn resume(&self, target: PauseTarget<'_>) -> Result<ResumeOutcome> {
        let mut outcome = ResumeOutcome::NotPaused;
        self.update_state(|map| {
            let status = decode_pause(map.get(PAUSED_KEY));
            match target {
                PauseTarget::All => {
                    if status.all || !status.jobs.is_empty() {
                        outcome = ResumeOutcome::Resumed;
                    }
                    map.remove(PAUSED_KEY);
                }
                PauseTarget::Job(qid) => {
                    if status.all {
                        outcome = ResumeOutcome::GloballyPaused;
                        return;
                    }
                    let mut status = status;
                    if status.jobs.remove(qid) {
                        outcome = ResumeOutcome::Resumed;
                    }
                    if status.jobs.is_empty() {
                        map.remove(PAUSED_KEY);
                    } else {
                        map.insert(PAUSED_KEY.to_owned(), encode_pause(&status));
                    }
                }
            }
        })?;
        Ok(outcome)
    }

    /// Whether a qualified id is paused, globally or individually.
    pub fn is_paused(&self, qid: &str) -> Result<bool> {
        let status = self.get_pause_status()?;
        Ok(status.all || status.jobs.contains(qid))
    }

    /// Decoded pause marker.
    pub fn get_pause_status(&self) -> Result<PauseStatus> {
        let map = self.load()?;
        Ok(decode_pause(map.get(PAUSED_KEY)))
    }

    /// Drop a single id from the pause list (uninstall path). Leaves the
    /// global marker alone.
    pub fn clear_pause_entry(&self, qid: &str) -> Result<()> {
        self.update_state(|map| {
            let status = decode_pause(map.get(PAUSED_KEY));
            if status.all {
                return;
            }
            let mut status = status;
            status.jobs.remove(qid);
            if status.jobs.is_empty() {
                map.remove(PAUSED_KEY);
            } else {
                map.insert(PAUSED_KEY.to_owned(), encode_pause(&status));
            }
        })?;
        Ok(())
    }

    fn load(&self) -> Result<StateMap> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StateMap::new()),
            Err(e) => {
                return Err(CronError::State(format!(
                    "cannot read state file {}: {e}",
                    self.path.display()
                )));
            }
        };

        // Corrupt state is fatal; the file is never silently replaced.
        serde_json::from_slice(&bytes).map_err(|e| {
            CronError::State(format!(
                "cannot parse state file {}: {e}",
                self.path.display()
            ))
        })
    }

    fn write_atomic(&self, map: &StateMap) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CronError::State(format!("cannot create state directory: {e}"))
            })?;
        }

        let tmp_path = self.temp_path();
        let json = serde_json::to_vec_pretty(map)
            .map_err(|e| CronError::State(format!("cannot serialize state: {e}")))?;

        if let Err(e) = std::fs::write(&tmp_path, json) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CronError::State(format!(
                "cannot write state temp file {}: {e}",
                tmp_path.display()
            )));
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CronError::State(format!(
                "cannot finalize state file {}: {e}",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Temp file in the same directory, distinct per concurrent writer.
    fn temp_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state.json".to_owned());
        self.path
            .with_file_name(format!("{name}.{}.{nanos}.tmp", std::process::id()))
    }

    fn acquire_file_lock(&self) -> Result<StateLockGuard> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CronError::State(format!("cannot create state lock directory: {e}"))
            })?;
        }

        let started = Instant::now();
        loop {
            self.evict_stale_lock();

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(StateLockGuard {
                        path: self.lock_path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() > self.timeout {
                        return Err(CronError::State(format!(
                            "timed out waiting for state lock {}",
                            self.lock_path.display()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
                Err(e) => {
                    return Err(CronError::State(format!(
                        "cannot create state lock {}: {e}",
                        self.lock_path.display()
                    )));
                }
            }
        }
    }

    fn evict_stale_lock(&self) {
        if let Some(age) = file_age(&self.lock_path)
            && age > self.stale_after
        {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

/// Guard that deletes the state lock on every exit path.
struct StateLockGuard {
    path: PathBuf,
}

impl Drop for StateLockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Key of the scheduler-triggered next-run projection.
#[must_use]
pub fn next_run_key(qid: &str) -> String {
    format!("{qid}:nextRun")
}

/// RFC 3339 UTC with millisecond precision, the on-disk timestamp shape.
#[must_use]
pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Age of a file by mtime, if it exists and the clock cooperates.
pub(crate) fn file_age(path: &Path) -> Option<Duration> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn decode_pause(value: Option<&Value>) -> PauseStatus {
    match value {
        Some(Value::Bool(true)) => PauseStatus {
            all: true,
            jobs: BTreeSet::new(),
        },
        Some(Value::Array(items)) => PauseStatus {
            all: false,
            jobs: items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect(),
        },
        _ => PauseStatus::default(),
    }
}

fn encode_pause(status: &PauseStatus) -> Value {
    Value::Array(
        status
            .jobs
            .iter()
            .map(|qid| Value::String(qid.clone()))
            .collect(),
    )
}
