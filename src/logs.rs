//! Runner and per-job log files with opportunistic rotation.
//!
//! Logs are append-only; one kernel-level append per line is atomic enough
//! for this use. Rotation happens at write time when a file crosses the
//! size threshold: `x.log` → `x.log.1` → `x.log.2`, two rotations kept.

use crate::error::{CronError, Result};
use crate::job::{qid_rel_path, qualify_job_id};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Rotation threshold per log file.
pub const MAX_LOG_SIZE: u64 = 20 * 1024 * 1024;

/// Rotated generations kept (`.1` and `.2`).
pub const ROTATIONS_KEPT: u32 = 2;

/// One append-only, size-rotated log file.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
    max_size: u64,
}

impl LogFile {
    /// Log file at the given path with the default rotation threshold.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_size: MAX_LOG_SIZE,
        }
    }

    /// Override the rotation threshold (tests).
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// The file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line, rotating first if the file is over
    /// the threshold.
    pub fn append_line(&self, message: &str) -> Result<()> {
        self.rotate_if_needed();
        let mut file = self.open_append()?;
        let stamp = crate::state::iso_timestamp(Utc::now());
        writeln!(file, "[{stamp}] {message}").map_err(CronError::Io)?;
        Ok(())
    }

    /// Open an append handle after rotating, for wiring a child process's
    /// stdio straight into the log.
    pub fn open_append_rotated(&self) -> Result<std::fs::File> {
        self.rotate_if_needed();
        self.open_append()
    }

    fn open_append(&self) -> Result<std::fs::File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(CronError::Io)
    }

    fn rotate_if_needed(&self) {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return;
        };
        if metadata.len() <= self.max_size {
            return;
        }
        let one = rotated_path(&self.path, 1);
        let two = rotated_path(&self.path, 2);
        let _ = std::fs::remove_file(&two);
        let _ = std::fs::rename(&one, &two);
        let _ = std::fs::rename(&self.path, &one);
    }
}

fn rotated_path(path: &Path, generation: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// The per-job log directory (`jobs/<qid>.log`, namespaces as
/// subdirectories).
pub struct JobLogs {
    dir: PathBuf,
}

impl JobLogs {
    /// Logs under the given directory.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Logs under the default `~/.cron-burgundy/jobs/`.
    #[must_use]
    pub fn at_default() -> Self {
        Self::new(crate::burgundy_dirs::jobs_log_dir())
    }

    /// Log path for a qualified id.
    #[must_use]
    pub fn log_path(&self, qid: &str) -> PathBuf {
        self.dir.join(qid_rel_path(qid, ".log"))
    }

    /// Writer for a job's log.
    #[must_use]
    pub fn writer(&self, qid: &str) -> LogFile {
        LogFile::new(self.log_path(qid))
    }

    /// Every job with a log file, as `(qid, size)` pairs sorted by qid.
    pub fn list(&self) -> Result<Vec<(String, u64)>> {
        let mut found = Vec::new();
        collect_logs(&self.dir, None, &mut found)?;
        found.sort();
        Ok(found)
    }

    /// Read a job's current log contents.
    pub fn view(&self, qid: &str) -> Result<String> {
        let path = self.log_path(qid);
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(CronError::Io(e)),
        }
    }

    /// Delete log files (current and rotated) for one job, or for all jobs
    /// when `qid` is `None`. Returns how many files were removed.
    pub fn clear(&self, qid: Option<&str>) -> Result<usize> {
        let targets: Vec<String> = match qid {
            Some(qid) => vec![qid.to_owned()],
            None => self.list()?.into_iter().map(|(qid, _)| qid).collect(),
        };
        let mut removed = 0;
        for qid in targets {
            let base = self.log_path(&qid);
            for path in log_generations(&base) {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// Delete only rotated generations for every job. Returns how many
    /// files were removed.
    pub fn prune(&self) -> Result<usize> {
        let mut removed = 0;
        for (qid, _) in self.list()? {
            let base = self.log_path(&qid);
            for generation in 1..=ROTATIONS_KEPT {
                if std::fs::remove_file(rotated_path(&base, generation)).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Current plus rotated generations for a base log path.
fn log_generations(base: &Path) -> Vec<PathBuf> {
    let mut paths = vec![base.to_path_buf()];
    for generation in 1..=ROTATIONS_KEPT {
        paths.push(rotated_path(base, generation));
    }
    paths
}

fn collect_logs(
    dir: &Path,
    namespace: Option<&str>,
    found: &mut Vec<(String, u64)>,
) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(CronError::Io(e)),
    };

    for entry in entries {
        let entry = entry.map_err(CronError::Io)?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        if path.is_dir() {
            // One level of namespace directories.
            if namespace.is_none() {
                collect_logs(&path, Some(&name), found)?;
            }
            continue;
        }
        let Some(stem) = name.strip_suffix(".log") else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        found.push((qualify_job_id(stem, namespace), size));
    }
    Ok(())
}
