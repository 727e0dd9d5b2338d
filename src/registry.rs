//! Registry of job source files and the job loader.
//!
//! The registry is an ordered list of `{path, namespace}` entries in
//! `registry.json`. It is only mutated by explicit user commands, so writes
//! are last-write-wins with no locking. A legacy registry (a bare JSON
//! array of paths) is promoted to the entry shape on first read and
//! rewritten in the new shape on the next save.

use crate::error::{CronError, Result};
use crate::job::{JobSpec, LoadedJob, parse_qualified_id, validate_namespace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One registered job source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Absolute path of the source file.
    pub path: PathBuf,
    /// Namespace applied to every job in the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Result of a register call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The path was new.
    Added,
    /// The path was known and its namespace changed.
    Updated,
    /// The path was known with the same namespace.
    Exists,
}

/// All jobs loaded from one source file. A file that fails to load keeps
/// its slot with `error` set so one broken file never hides the rest.
#[derive(Debug, Clone)]
pub struct JobSource {
    /// Source file path.
    pub file: PathBuf,
    /// Namespace from the registry entry.
    pub namespace: Option<String>,
    /// Parsed job definitions, in file order.
    pub jobs: Vec<JobSpec>,
    /// Load failure, if the file could not be read or parsed.
    pub error: Option<String>,
}

impl JobSource {
    /// Jobs with their source context attached.
    #[must_use]
    pub fn loaded_jobs(&self) -> Vec<LoadedJob> {
        self.jobs
            .iter()
            .map(|spec| LoadedJob {
                spec: spec.clone(),
                namespace: self.namespace.clone(),
                source: self.file.clone(),
            })
            .collect()
    }
}

/// The TOML shape of a job source file: one `[[job]]` table per job.
#[derive(Debug, Deserialize)]
struct SourceDoc {
    #[serde(default)]
    job: Vec<JobSpec>,
}

/// File-backed registry.
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// Registry at the given file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Registry at the default `~/.cron-burgundy/registry.json`.
    #[must_use]
    pub fn at_default() -> Self {
        Self::new(crate::burgundy_dirs::registry_file())
    }

    /// Current entries. A missing file yields an empty registry; a legacy
    /// bare-path list is promoted in memory.
    pub fn entries(&self) -> Result<Vec<RegistryEntry>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CronError::Registry(format!(
                    "cannot read registry {}: {e}",
                    self.path.display()
                )));
            }
        };

        if let Ok(entries) = serde_json::from_slice::<Vec<RegistryEntry>>(&bytes) {
            return Ok(entries);
        }
        // Legacy shape: ["path", ...]. Rewritten on the next save.
        if let Ok(paths) = serde_json::from_slice::<Vec<PathBuf>>(&bytes) {
            return Ok(paths
                .into_iter()
                .map(|path| RegistryEntry {
                    path,
                    namespace: None,
                })
                .collect());
        }

        Err(CronError::Registry(format!(
            "cannot parse registry {}",
            self.path.display()
        )))
    }

    fn save(&self, entries: &[RegistryEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CronError::Registry(format!("cannot create registry directory: {e}"))
            })?;
        }
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| CronError::Registry(format!("cannot serialize registry: {e}")))?;
        std::fs::write(&self.path, json).map_err(|e| {
            CronError::Registry(format!("cannot write registry {}: {e}", self.path.display()))
        })
    }

    /// Register a source file, or update its namespace in place.
    pub fn register_file(
        &self,
        path: &Path,
        namespace: Option<String>,
    ) -> Result<RegisterOutcome> {
        if let Some(ns) = namespace.as_deref() {
            validate_namespace(ns)?;
        }
        let path = absolutize(path)?;

        let mut entries = self.entries()?;
        if let Some(existing) = entries.iter_mut().find(|e| e.path == path) {
            if existing.namespace == namespace {
                return Ok(RegisterOutcome::Exists);
            }
            existing.namespace = namespace;
            self.save(&entries)?;
            return Ok(RegisterOutcome::Updated);
        }

        entries.push(RegistryEntry { path, namespace });
        self.save(&entries)?;
        Ok(RegisterOutcome::Added)
    }

    /// Remove a source file. Returns `false` when it was not registered.
    pub fn unregister_file(&self, path: &Path) -> Result<bool> {
        // A file being cleared may already be deleted; fall back to the
        // raw path when it cannot be canonicalized.
        let path = absolutize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut entries = self.entries()?;
        let before = entries.len();
        entries.retain(|e| e.path != path);
        if entries.len() == before {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }

    /// Load every registered source file. Per-file failures are recorded
    /// in the corresponding [`JobSource::error`], never raised.
    pub fn load_all_jobs(&self) -> Result<Vec<JobSource>> {
        let mut sources = Vec::new();
        for entry in self.entries()? {
            let source = match load_source_file(&entry.path) {
                Ok(jobs) => JobSource {
                    file: entry.path,
                    namespace: entry.namespace,
                    jobs,
                    error: None,
                },
                Err(e) => JobSource {
                    file: entry.path,
                    namespace: entry.namespace,
                    jobs: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            sources.push(source);
        }
        Ok(sources)
    }

    /// Resolve a qualified (`ns/id`) or bare (`id`) lookup.
    ///
    /// A qualified lookup requires an exact namespace match. A bare lookup
    /// returns the first matching bare id across all sources in registry
    /// order.
    pub fn find_job(&self, id: &str) -> Result<LoadedJob> {
        let (namespace, bare) = parse_qualified_id(id);
        for source in self.load_all_jobs()? {
            if namespace.is_some() && source.namespace.as_deref() != namespace {
                continue;
            }
            if let Some(job) = source.loaded_jobs().into_iter().find(|j| j.spec.id == bare) {
                return Ok(job);
            }
        }
        Err(CronError::JobNotFound(id.to_owned()))
    }
}

/// Read and validate one source file.
pub fn load_source_file(path: &Path) -> Result<Vec<JobSpec>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CronError::Registry(format!("cannot read job file {}: {e}", path.display()))
    })?;
    let doc: SourceDoc = toml::from_str(&content).map_err(|e| {
        CronError::Registry(format!("cannot parse job file {}: {e}", path.display()))
    })?;

    let mut seen = std::collections::HashSet::new();
    for job in &doc.job {
        job.validate()?;
        if !seen.insert(job.id.as_str()) {
            return Err(CronError::Registry(format!(
                "duplicate job id '{}' in {}",
                job.id,
                path.display()
            )));
        }
    }
    Ok(doc.job)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| {
        CronError::Registry(format!("cannot resolve path {}: {e}", path.display()))
    })
}
