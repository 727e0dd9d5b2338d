//! Job definitions, id validation, and qualified-id rules.
//!
//! A job source file is a TOML document with one `[[job]]` table per job.
//! Every layer that persists anything (state, locks, launchd plists) is
//! keyed by the *qualified id* — `namespace/id` when the source file has a
//! namespace, bare `id` otherwise.

use crate::error::{CronError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest interval launchd will be asked to honor, in milliseconds.
pub const MIN_INTERVAL_MS: u64 = 10_000;

/// Longest accepted job id.
pub const MAX_ID_LEN: usize = 100;

/// A single job definition as written in a job source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Short name, unique within its source file.
    pub id: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human phrase or five-field cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Fixed interval in milliseconds. Mutually exclusive with `schedule`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Whether the job may run at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Shell command executed as the job's operation.
    pub command: String,
}

fn default_enabled() -> bool {
    true
}

impl JobSpec {
    /// Validate the definition: id shape, timing exclusivity, interval floor.
    pub fn validate(&self) -> Result<()> {
        validate_job_id(&self.id)?;

        match (&self.schedule, self.interval) {
            (Some(_), Some(_)) => Err(CronError::Config(format!(
                "job '{}' must set either schedule or interval, not both",
                self.id
            ))),
            (None, None) => Err(CronError::Config(format!(
                "job '{}' must set a schedule or an interval",
                self.id
            ))),
            (None, Some(ms)) if ms < MIN_INTERVAL_MS => Err(CronError::Config(format!(
                "job '{}' interval {ms}ms is below the {MIN_INTERVAL_MS}ms minimum",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

/// A job resolved through the registry, carrying its source context.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    /// The definition from the source file.
    pub spec: JobSpec,
    /// Namespace assigned to the source file, if any.
    pub namespace: Option<String>,
    /// Absolute path of the source file.
    pub source: PathBuf,
}

impl LoadedJob {
    /// The qualified id used by state, locks, and launchd.
    #[must_use]
    pub fn qualified_id(&self) -> String {
        qualify_job_id(&self.spec.id, self.namespace.as_deref())
    }

    /// Directory the job's command runs in (the source file's directory).
    #[must_use]
    pub fn workdir(&self) -> PathBuf {
        self.source
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

/// Validate a bare job id.
///
/// 1–100 chars; first char alphanumeric or underscore; remainder
/// alphanumeric, underscore, or hyphen. Dots are rejected up front because
/// the launchd label scheme uses the dot after the fixed prefix to split
/// namespace from id.
pub fn validate_job_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(CronError::Config(
            "job id must be a non-empty string".to_owned(),
        ));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CronError::Config(format!(
            "job id must be at most {MAX_ID_LEN} characters"
        )));
    }
    if id.contains('.') {
        return Err(CronError::Config(format!("job id '{id}' cannot contain dots")));
    }

    let mut chars = id.chars();
    // Non-empty is checked above.
    if let Some(first) = chars.next()
        && !(first.is_ascii_alphanumeric() || first == '_')
    {
        return Err(CronError::Config(format!(
            "job id '{id}' must start with a letter, digit, or underscore"
        )));
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(CronError::Config(format!(
                "job id '{id}' may only contain letters, digits, underscores, and hyphens"
            )));
        }
    }
    Ok(())
}

/// Validate a namespace using the same shape rules as job ids.
pub fn validate_namespace(ns: &str) -> Result<()> {
    validate_job_id(ns).map_err(|_| {
        CronError::Config(format!(
            "namespace '{ns}' must be 1-100 chars of letters, digits, underscores, and hyphens"
        ))
    })
}

/// Map a bare id and optional namespace to the qualified form.
#[must_use]
pub fn qualify_job_id(id: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{id}"),
        None => id.to_owned(),
    }
}

/// Split a qualified id back into `(namespace, id)`.
#[must_use]
pub fn parse_qualified_id(qid: &str) -> (Option<&str>, &str) {
    match qid.split_once('/') {
        Some((ns, id)) => (Some(ns), id),
        None => (None, qid),
    }
}

/// Relative path for a qualified id inside the locks/logs directories.
///
/// The namespace separator becomes a directory separator, so `pm/tick`
/// lands at `pm/tick<ext>`.
#[must_use]
pub fn qid_rel_path(qid: &str, ext: &str) -> PathBuf {
    let (ns, id) = parse_qualified_id(qid);
    let file = format!("{id}{ext}");
    match ns {
        Some(ns) => PathBuf::from(ns).join(file),
        None => PathBuf::from(file),
    }
}
