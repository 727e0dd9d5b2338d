//! launchd adapter: translate schedules into per-user LaunchAgent plists
//! and manage their lifecycle.
//!
//! Each job owns a stable label (`com.cron-burgundy.job.[<ns>.]<id>`) and a
//! plist file named after it. Interval jobs become `StartInterval`
//! triggers; cron schedules expand into `StartCalendarInterval` records.
//! Generation is deterministic byte-for-byte, so "identical bytes on disk"
//! doubles as the no-op check during install.

use crate::error::{CronError, Result};
use crate::job::{LoadedJob, MIN_INTERVAL_MS, validate_job_id, validate_namespace};
use crate::lock::LockManager;
use crate::logs::LogFile;
use crate::schedule::{self, CronExpr, DayOfMonth, Timing};
use crate::state::StateStore;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Label prefix owned by job triggers.
pub const JOB_LABEL_PREFIX: &str = "com.cron-burgundy.job.";

/// Label of the run-at-load wake-check trigger.
pub const WAKECHECK_LABEL: &str = "com.cron-burgundy.wakecheck";

/// Prefix shared by everything this tool installs.
const LABEL_ROOT: &str = "com.cron-burgundy.";

/// Hard cap on calendar-record expansion (Cartesian product size).
const MAX_CALENDAR_RECORDS: usize = 4096;

/// Stable label for a job.
#[must_use]
pub fn job_label(namespace: Option<&str>, id: &str) -> String {
    match namespace {
        Some(ns) => format!("{JOB_LABEL_PREFIX}{ns}.{id}"),
        None => format!("{JOB_LABEL_PREFIX}{id}"),
    }
}

/// Namespace and id recovered from a plist filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLabel {
    /// Namespace segment, when present.
    pub namespace: Option<String>,
    /// Bare job id.
    pub id: String,
}

impl ParsedLabel {
    /// The qualified id this label maps to.
    #[must_use]
    pub fn qualified_id(&self) -> String {
        crate::job::qualify_job_id(&self.id, self.namespace.as_deref())
    }
}

/// Recover `{namespace, id}` from a job plist filename.
///
/// Ids cannot contain dots, so on a job plist the first dot after the
/// fixed prefix always separates namespace from id. Non-job files (the
/// wake-check trigger, foreign plists) yield `None`.
#[must_use]
pub fn parse_plist_filename(name: &str) -> Option<ParsedLabel> {
    let label = name.strip_suffix(".plist")?;
    let rest = label.strip_prefix(JOB_LABEL_PREFIX)?;
    if rest.is_empty() {
        return None;
    }
    match rest.split_once('.') {
        Some((ns, id)) if !ns.is_empty() && !id.is_empty() => Some(ParsedLabel {
            namespace: Some(ns.to_owned()),
            id: id.to_owned(),
        }),
        Some(_) => None,
        None => Some(ParsedLabel {
            namespace: None,
            id: rest.to_owned(),
        }),
    }
}

/// One `StartCalendarInterval` record. `None` fields are wildcards and are
/// omitted from the plist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarInterval {
    /// Minute (0–59).
    pub minute: Option<u32>,
    /// Hour (0–23).
    pub hour: Option<u32>,
    /// Day of month (1–31).
    pub day: Option<u32>,
    /// Month (1–12).
    pub month: Option<u32>,
    /// Weekday (0–6, Sunday = 0).
    pub weekday: Option<u32>,
}

/// Expand a cron expression into the Cartesian product of its restricted
/// fields, one calendar record per combination.
///
/// launchd fires a record when every present field matches, which is
/// exactly the evaluator's conjunction, so the two views of "when next"
/// agree.
pub fn expand_calendar_intervals(expr: &CronExpr) -> Result<Vec<CalendarInterval>> {
    let day_values = match &expr.day {
        DayOfMonth::Last => {
            return Err(CronError::Launchd(
                "launchd cannot express 'last day of month'; use a concrete day such as \
                 'on 28th of month'"
                    .to_owned(),
            ));
        }
        DayOfMonth::Field(field) => field.values().map(<[u32]>::to_vec),
    };

    let axes = [
        expr.minute.values().map(<[u32]>::to_vec),
        expr.hour.values().map(<[u32]>::to_vec),
        day_values,
        expr.month.values().map(<[u32]>::to_vec),
        expr.weekday.values().map(<[u32]>::to_vec),
    ];

    let total: usize = axes
        .iter()
        .map(|axis| axis.as_ref().map_or(1, Vec::len))
        .product();
    if total > MAX_CALENDAR_RECORDS {
        return Err(CronError::Launchd(format!(
            "cron expression '{expr}' expands to {total} calendar records (limit {MAX_CALENDAR_RECORDS})"
        )));
    }

    let mut records = vec![CalendarInterval::default()];
    for (index, axis) in axes.iter().enumerate() {
        let Some(values) = axis else {
            continue;
        };
        let mut next = Vec::with_capacity(records.len() * values.len());
        for record in &records {
            for &value in values {
                let mut record = record.clone();
                match index {
                    0 => record.minute = Some(value),
                    1 => record.hour = Some(value),
                    2 => record.day = Some(value),
                    3 => record.month = Some(value),
                    _ => record.weekday = Some(value),
                }
                next.push(record);
            }
        }
        records = next;
    }
    Ok(records)
}

/// Outcome of installing one plist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Bytes were written and the agent (re)loaded.
    Installed,
    /// An identical plist was already on disk; nothing happened.
    Unchanged,
}

/// Per-namespace sync summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Jobs whose plist was written or rewritten.
    pub installed: Vec<String>,
    /// Jobs whose plist was already current.
    pub unchanged: Vec<String>,
    /// Disabled jobs whose plist was removed.
    pub disabled: Vec<String>,
    /// Plists in the namespace with no matching job, removed.
    pub orphaned: Vec<String>,
}

/// The adapter over one LaunchAgents directory.
pub struct LaunchdAdapter {
    agents_dir: PathBuf,
    cli_path: PathBuf,
    state: StateStore,
    locks: LockManager,
    runner_log: LogFile,
}

impl LaunchdAdapter {
    /// Adapter over explicit paths (tests and embedding).
    #[must_use]
    pub fn new(
        agents_dir: PathBuf,
        cli_path: PathBuf,
        state: StateStore,
        locks: LockManager,
        runner_log: LogFile,
    ) -> Self {
        Self {
            agents_dir,
            cli_path,
            state,
            locks,
            runner_log,
        }
    }

    /// Adapter over the default directories, installing triggers that
    /// invoke the current executable.
    pub fn at_default() -> Result<Self> {
        let cli_path = std::env::current_exe()
            .map_err(|e| CronError::Launchd(format!("cannot resolve own executable: {e}")))?;
        Ok(Self::new(
            crate::burgundy_dirs::launch_agents_dir(),
            cli_path,
            StateStore::at_default(),
            LockManager::at_default(),
            LogFile::new(crate::burgundy_dirs::runner_log_file()),
        ))
    }

    /// Generate the plist bytes for a job.
    pub fn generate_job_plist(&self, job: &LoadedJob) -> Result<String> {
        validate_job_id(&job.spec.id)?;
        if let Some(ns) = job.namespace.as_deref() {
            validate_namespace(ns)?;
        }

        let label = job_label(job.namespace.as_deref(), &job.spec.id);
        let qid = job.qualified_id();
        let trigger = match schedule::timing_for(&job.spec)? {
            Timing::Interval(interval) => {
                let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
                if ms < MIN_INTERVAL_MS {
                    return Err(CronError::Config(format!(
                        "job '{qid}' interval {ms}ms is below the {MIN_INTERVAL_MS}ms minimum"
                    )));
                }
                Trigger::Interval(ms / 1000)
            }
            Timing::Cron(expr) => Trigger::Calendar(expand_calendar_intervals(&expr)?),
            Timing::Reboot => Trigger::RunAtLoad,
        };

        Ok(self.render_plist(
            &label,
            &["run", "--scheduled", &qid],
            Some(&job.workdir()),
            &trigger,
        ))
    }

    /// Install or refresh a job's plist. Identical bytes are a no-op.
    pub fn install(&self, job: &LoadedJob) -> Result<InstallOutcome> {
        let label = job_label(job.namespace.as_deref(), &job.spec.id);
        let bytes = self.generate_job_plist(job)?;
        self.install_plist(&label, &bytes)
    }

    /// Remove a job's plist, lock file, and pause entry. Returns `true`
    /// when a plist existed.
    pub fn uninstall(&self, namespace: Option<&str>, id: &str) -> Result<bool> {
        let label = job_label(namespace, id);
        let qid = crate::job::qualify_job_id(id, namespace);
        let path = self.plist_path(&label);

        launchctl_unload(&path);
        let existed = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(CronError::Launchd(format!(
                    "cannot remove {}: {e}",
                    path.display()
                )));
            }
        };

        self.locks.clear(&qid);
        self.state.clear_pause_entry(&qid)?;
        if existed {
            let _ = self.runner_log.append_line(&format!("uninstalled {label}"));
        }
        Ok(existed)
    }

    /// Reconcile installed plists with the jobs of one namespace: install
    /// enabled jobs, uninstall disabled ones, then remove orphans whose
    /// job no longer exists in the incoming set.
    pub fn sync(&self, jobs: &[LoadedJob], namespace: Option<&str>) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        let mut current_ids = std::collections::HashSet::new();

        for job in jobs {
            let qid = job.qualified_id();
            current_ids.insert(job.spec.id.clone());
            if job.spec.enabled {
                match self.install(job)? {
                    InstallOutcome::Installed => summary.installed.push(qid),
                    InstallOutcome::Unchanged => summary.unchanged.push(qid),
                }
            } else {
                self.uninstall(job.namespace.as_deref(), &job.spec.id)?;
                summary.disabled.push(qid);
            }
        }

        for name in self.list_installed_plists()? {
            let Some(parsed) = parse_plist_filename(&name) else {
                continue;
            };
            if parsed.namespace.as_deref() != namespace || current_ids.contains(&parsed.id) {
                continue;
            }
            self.uninstall(parsed.namespace.as_deref(), &parsed.id)?;
            summary.orphaned.push(parsed.qualified_id());
        }

        let _ = self.runner_log.append_line(&format!(
            "sync: {} installed, {} unchanged, {} disabled, {} orphaned",
            summary.installed.len(),
            summary.unchanged.len(),
            summary.disabled.len(),
            summary.orphaned.len()
        ));
        Ok(summary)
    }

    /// Filenames of every cron-burgundy plist in the agents directory.
    pub fn list_installed_plists(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.agents_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CronError::Launchd(format!(
                    "cannot read {}: {e}",
                    self.agents_dir.display()
                )));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(LABEL_ROOT) && name.ends_with(".plist"))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Install the run-at-load wake-check trigger.
    pub fn install_wake_check(&self) -> Result<InstallOutcome> {
        let bytes = self.render_plist(WAKECHECK_LABEL, &["check-missed"], None, &Trigger::RunAtLoad);
        self.install_plist(WAKECHECK_LABEL, &bytes)
    }

    /// Remove the wake-check trigger. Only the no-namespace teardown path
    /// calls this; per-namespace clears leave it in place.
    pub fn uninstall_wake_check(&self) -> Result<bool> {
        let path = self.plist_path(WAKECHECK_LABEL);
        launchctl_unload(&path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CronError::Launchd(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }

    /// Plist path for a label.
    #[must_use]
    pub fn plist_path(&self, label: &str) -> PathBuf {
        self.agents_dir.join(format!("{label}.plist"))
    }

    fn install_plist(&self, label: &str, bytes: &str) -> Result<InstallOutcome> {
        let path = self.plist_path(label);
        if let Ok(existing) = std::fs::read(&path)
            && existing == bytes.as_bytes()
        {
            return Ok(InstallOutcome::Unchanged);
        }

        // The previous version may or may not have been registered with
        // launchd; unload errors are tolerated either way.
        launchctl_unload(&path);

        std::fs::create_dir_all(&self.agents_dir)
            .map_err(|e| CronError::Launchd(format!("cannot create agents directory: {e}")))?;
        std::fs::write(&path, bytes)
            .map_err(|e| CronError::Launchd(format!("cannot write {}: {e}", path.display())))?;

        launchctl_load(&path);
        let _ = self.runner_log.append_line(&format!("installed {label}"));
        Ok(InstallOutcome::Installed)
    }

    /// Deterministic plist rendering. Key order is fixed so that equal
    /// configuration always produces equal bytes.
    fn render_plist(
        &self,
        label: &str,
        args: &[&str],
        workdir: Option<&Path>,
        trigger: &Trigger,
    ) -> String {
        let cli = self.cli_path.to_string_lossy();
        let runtime_dir = self
            .cli_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/usr/local/bin".to_owned());
        let path_env = format!("{runtime_dir}:/usr/local/bin:/usr/bin:/bin");

        let mut out = String::new();
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        out.push_str(
            "<!DOCTYPE plist PUBLIC \"-//Apple//DTD PLIST 1.0//EN\" \
             \"http://www.apple.com/DTDs/PropertyList-1.0.dtd\">\n",
        );
        out.push_str("<plist version=\"1.0\">\n<dict>\n");

        push_key_string(&mut out, 1, "Label", label);

        push_indent(&mut out, 1);
        out.push_str("<key>ProgramArguments</key>\n");
        push_indent(&mut out, 1);
        out.push_str("<array>\n");
        push_string(&mut out, 2, &cli);
        for arg in args {
            push_string(&mut out, 2, arg);
        }
        push_indent(&mut out, 1);
        out.push_str("</array>\n");

        match trigger {
            Trigger::Interval(secs) => {
                push_indent(&mut out, 1);
                out.push_str("<key>StartInterval</key>\n");
                push_indent(&mut out, 1);
                let _ = writeln!(out, "<integer>{secs}</integer>");
            }
            Trigger::Calendar(records) => {
                push_indent(&mut out, 1);
                out.push_str("<key>StartCalendarInterval</key>\n");
                push_indent(&mut out, 1);
                out.push_str("<array>\n");
                for record in records {
                    push_indent(&mut out, 2);
                    out.push_str("<dict>\n");
                    push_calendar_field(&mut out, "Minute", record.minute);
                    push_calendar_field(&mut out, "Hour", record.hour);
                    push_calendar_field(&mut out, "Day", record.day);
                    push_calendar_field(&mut out, "Month", record.month);
                    push_calendar_field(&mut out, "Weekday", record.weekday);
                    push_indent(&mut out, 2);
                    out.push_str("</dict>\n");
                }
                push_indent(&mut out, 1);
                out.push_str("</array>\n");
            }
            Trigger::RunAtLoad => {
                push_indent(&mut out, 1);
                out.push_str("<key>RunAtLoad</key>\n");
                push_indent(&mut out, 1);
                out.push_str("<true/>\n");
            }
        }

        if let Some(workdir) = workdir {
            push_key_string(&mut out, 1, "WorkingDirectory", &workdir.to_string_lossy());
        }

        push_indent(&mut out, 1);
        out.push_str("<key>EnvironmentVariables</key>\n");
        push_indent(&mut out, 1);
        out.push_str("<dict>\n");
        push_key_string(&mut out, 2, "PATH", &path_env);
        push_indent(&mut out, 1);
        out.push_str("</dict>\n");

        let out_path = self.runner_log.path().to_path_buf();
        let err_path = out_path.with_file_name("runner-error.log");
        push_key_string(&mut out, 1, "StandardOutPath", &out_path.to_string_lossy());
        push_key_string(&mut out, 1, "StandardErrorPath", &err_path.to_string_lossy());

        out.push_str("</dict>\n</plist>\n");
        out
    }
}

enum Trigger {
    Interval(u64),
    Calendar(Vec<CalendarInterval>),
    RunAtLoad,
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn push_string(out: &mut String, depth: usize, value: &str) {
    push_indent(out, depth);
    let _ = writeln!(out, "<string>{}</string>", xml_escape(value));
}

fn push_key_string(out: &mut String, depth: usize, key: &str, value: &str) {
    push_indent(out, depth);
    let _ = writeln!(out, "<key>{key}</key>");
    push_string(out, depth, value);
}

fn push_calendar_field(out: &mut String, key: &str, value: Option<u32>) {
    let Some(value) = value else {
        return;
    };
    push_indent(out, 3);
    let _ = writeln!(out, "<key>{key}</key>");
    push_indent(out, 3);
    let _ = writeln!(out, "<integer>{value}</integer>");
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Ask launchd to load the agent. Errors are expected off-macOS and when
/// the agent was never registered; both are tolerated.
fn launchctl_load(path: &Path) {
    launchctl(&["load", "-w"], path);
}

fn launchctl_unload(path: &Path) {
    launchctl(&["unload"], path);
}

#[cfg(target_os = "macos")]
fn launchctl(args: &[&str], path: &Path) {
    let result = std::process::Command::new("launchctl")
        .args(args)
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match result {
        Ok(status) if !status.success() => {
            tracing::debug!("launchctl {args:?} {} exited with {status}", path.display());
        }
        Err(e) => tracing::debug!("launchctl {args:?} {} failed: {e}", path.display()),
        _ => {}
    }
}

#[cfg(not(target_os = "macos"))]
fn launchctl(args: &[&str], path: &Path) {
    tracing::debug!("launchctl {args:?} {} skipped off-macOS", path.display());
}
