//! Single-invocation runner: gate, lock, execute, persist, report.
//!
//! Each launchd trigger spawns a fresh process that calls one of the three
//! entry points here. The runner never queues: a refused job lock means
//! another invocation is already executing, and this one skips.

use crate::error::{CronError, Result};
use crate::job::LoadedJob;
use crate::lock::{LockManager, stale_threshold_for};
use crate::logs::{JobLogs, LogFile};
use crate::schedule;
use crate::state::StateStore;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// Disjoint outcome of one job in a bulk invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDisposition {
    /// The user operation ran and succeeded; state was marked.
    Ran,
    /// Not due, or the job lock was refused.
    Skipped,
    /// `enabled = false` in the definition.
    Disabled,
    /// Paused in the state store.
    Paused,
    /// The user operation ran and failed; state untouched.
    Failed,
}

/// Qualified ids partitioned by disposition. The five lists are disjoint
/// and together cover every input job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Successfully executed jobs.
    pub ran: Vec<String>,
    /// Not-due and lock-refused jobs.
    pub skipped: Vec<String>,
    /// Disabled jobs.
    pub disabled: Vec<String>,
    /// Paused jobs.
    pub paused: Vec<String>,
    /// Jobs whose user operation failed.
    pub failed: Vec<String>,
}

impl RunReport {
    fn record(&mut self, qid: String, disposition: RunDisposition) {
        match disposition {
            RunDisposition::Ran => self.ran.push(qid),
            RunDisposition::Skipped => self.skipped.push(qid),
            RunDisposition::Disabled => self.disabled.push(qid),
            RunDisposition::Paused => self.paused.push(qid),
            RunDisposition::Failed => self.failed.push(qid),
        }
    }

    /// Total jobs accounted for.
    #[must_use]
    pub fn total(&self) -> usize {
        self.ran.len()
            + self.skipped.len()
            + self.disabled.len()
            + self.paused.len()
            + self.failed.len()
    }
}

/// Why this invocation exists; appears in every runner-log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// launchd fired the job's trigger.
    Scheduled,
    /// The user ran it from the CLI.
    Manual,
    /// The run-at-load catch-up pass.
    WakeCheck,
}

impl Invocation {
    fn label(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::WakeCheck => "wake-check",
        }
    }
}

/// The runner over one state directory.
pub struct Runner {
    state: StateStore,
    locks: LockManager,
    job_logs: JobLogs,
    runner_log: LogFile,
}

impl Runner {
    /// Runner over explicit stores (tests and embedding).
    #[must_use]
    pub fn new(state: StateStore, locks: LockManager, job_logs: JobLogs, runner_log: LogFile) -> Self {
        Self {
            state,
            locks,
            job_logs,
            runner_log,
        }
    }

    /// Runner over the default `~/.cron-burgundy/` layout.
    #[must_use]
    pub fn at_default() -> Self {
        Self::new(
            StateStore::at_default(),
            LockManager::at_default(),
            JobLogs::at_default(),
            LogFile::new(crate::burgundy_dirs::runner_log_file()),
        )
    }

    /// The state store this runner persists through.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run one job immediately.
    ///
    /// `scheduled` marks launchd-triggered runs: the pause gate applies and
    /// interval jobs record their projected next run. A refused lock and a
    /// paused job both return `Ok` — they are outcomes, not errors. A
    /// failing user operation is re-raised after cleanup so the process
    /// exits non-zero.
    pub fn run_job_now(&self, job: &LoadedJob, scheduled: bool) -> Result<()> {
        let qid = job.qualified_id();
        let kind = if scheduled {
            Invocation::Scheduled
        } else {
            Invocation::Manual
        };

        if scheduled && self.state.is_paused(&qid)? {
            self.log(kind, &qid, "skipped - paused");
            return Ok(());
        }

        let Some(guard) = self.locks.acquire(&qid, stale_threshold(job))? else {
            self.log(kind, &qid, "skipped - locked");
            return Ok(());
        };
        let result = self.execute(job, &qid, kind, scheduled);
        drop(guard);
        result
    }

    /// Run every due job, partitioning the input into the five outcomes.
    pub fn run_all_due(&self, jobs: &[LoadedJob]) -> Result<RunReport> {
        let now = Utc::now();
        let mut report = RunReport::default();

        for job in jobs {
            let qid = job.qualified_id();
            let disposition = self.dispose_one(job, &qid, now)?;
            report.record(qid, disposition);
        }
        Ok(report)
    }

    fn dispose_one(&self, job: &LoadedJob, qid: &str, now: DateTime<Utc>) -> Result<RunDisposition> {
        if !job.spec.enabled {
            return Ok(RunDisposition::Disabled);
        }
        if self.state.is_paused(qid)? {
            return Ok(RunDisposition::Paused);
        }

        let last_run = self.state.get_last_run(qid)?;
        if !schedule::should_run(&job.spec, last_run, now)? {
            return Ok(RunDisposition::Skipped);
        }

        let Some(guard) = self.locks.acquire(qid, stale_threshold(job))? else {
            self.log(Invocation::Scheduled, qid, "skipped - locked");
            return Ok(RunDisposition::Skipped);
        };
        let outcome = match self.execute(job, qid, Invocation::Scheduled, true) {
            Ok(()) => RunDisposition::Ran,
            Err(_) => RunDisposition::Failed,
        };
        drop(guard);
        Ok(outcome)
    }

    /// Catch up jobs missed while the host slept.
    ///
    /// Disabled and paused jobs are filtered out entirely; the rest
    /// classify as `ran` or `skipped`.
    pub fn check_missed(&self, jobs: &[LoadedJob]) -> Result<RunReport> {
        let now = Utc::now();
        let mut report = RunReport::default();

        for job in jobs {
            let qid = job.qualified_id();
            if !job.spec.enabled || self.state.is_paused(&qid)? {
                continue;
            }

            let Some(guard) = self.locks.acquire(&qid, stale_threshold(job))? else {
                report.record(qid, RunDisposition::Skipped);
                continue;
            };
            let last_run = self.state.get_last_run(&qid)?;
            let disposition = if schedule::should_run(&job.spec, last_run, now)? {
                match self.execute(job, &qid, Invocation::WakeCheck, true) {
                    Ok(()) => RunDisposition::Ran,
                    Err(_) => RunDisposition::Failed,
                }
            } else {
                RunDisposition::Skipped
            };
            drop(guard);
            report.record(qid, disposition);
        }
        Ok(report)
    }

    /// Execute the user operation under an already-held lock, then persist
    /// and report. State is only touched on success; a failure leaves the
    /// job overdue so the next wake check retries it.
    fn execute(&self, job: &LoadedJob, qid: &str, kind: Invocation, scheduled: bool) -> Result<()> {
        let last_run = self.state.get_last_run(qid)?;
        self.log(kind, qid, "starting");
        let job_log = self.job_logs.writer(qid);
        let _ = job_log.append_line(&format!("starting: {}", job.spec.command));

        let started = Instant::now();
        let result = self.spawn_user_op(job, qid, last_run);
        let elapsed_ms = started.elapsed().as_millis();

        match result {
            Ok(()) => {
                let interval = if scheduled {
                    job.spec.interval.map(Duration::from_millis)
                } else {
                    None
                };
                self.state.mark_run(qid, interval)?;
                self.log(kind, qid, &format!("completed in {elapsed_ms}ms"));
                let _ = job_log.append_line(&format!("completed in {elapsed_ms}ms"));
                Ok(())
            }
            Err(e) => {
                self.log(kind, qid, &format!("failed: {e}"));
                let _ = job_log.append_line(&format!("failed: {e}"));
                crate::notify::job_failure(qid, &e.to_string());
                Err(e)
            }
        }
    }

    /// Spawn `sh -c <command>` with its stdio captured into the job log.
    fn spawn_user_op(
        &self,
        job: &LoadedJob,
        qid: &str,
        last_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let out = self.job_logs.writer(qid).open_append_rotated()?;
        let err = out.try_clone()?;

        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&job.spec.command)
            .current_dir(job.workdir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .env("CRON_BURGUNDY_JOB", qid);
        if let Some(last) = last_run {
            cmd.env("CRON_BURGUNDY_LAST_RUN", crate::state::iso_timestamp(last));
        }

        let status = cmd
            .status()
            .map_err(|e| CronError::JobFailed(format!("cannot spawn command: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(CronError::JobFailed(format!("command exited with {status}")))
        }
    }

    fn log(&self, kind: Invocation, qid: &str, message: &str) {
        // Log failures must not mask the run outcome.
        let _ = self
            .runner_log
            .append_line(&format!("{qid} [{}] {message}", kind.label()));
    }
}

/// Stale-lock threshold for one job.
fn stale_threshold(job: &LoadedJob) -> Duration {
    stale_threshold_for(job.spec.interval.map(Duration::from_millis))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::job::JobSpec;
    use crate::state::PauseTarget;
    use std::path::Path;

    fn runner_in(dir: &Path) -> Runner {
        Runner::new(
            StateStore::new(dir.join("state.json")),
            LockManager::new(dir.join("locks")),
            JobLogs::new(dir.join("jobs")),
            LogFile::new(dir.join("runner.log")),
        )
    }

    fn job(dir: &Path, id: &str, command: &str) -> LoadedJob {
        LoadedJob {
            spec: JobSpec {
                id: id.to_owned(),
                description: None,
                schedule: None,
                interval: Some(60_000),
                enabled: true,
                command: command.to_owned(),
            },
            namespace: None,
            source: dir.join("jobs.toml"),
        }
    }

    fn runner_log(dir: &Path) -> String {
        std::fs::read_to_string(dir.join("runner.log")).unwrap_or_default()
    }

    #[test]
    fn never_run_interval_job_is_due_and_runs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let start = Utc::now();

        let report = runner.run_all_due(&[job(dir.path(), "t", "true")]).unwrap();

        assert_eq!(report.ran, vec!["t"]);
        assert!(report.skipped.is_empty());
        assert!(report.disabled.is_empty());
        assert!(report.paused.is_empty());
        assert!(report.failed.is_empty());

        let last = runner.state().get_last_run("t").unwrap().expect("marked");
        assert!(last >= start - chrono::TimeDelta::milliseconds(2));
        assert!(last <= Utc::now() + chrono::TimeDelta::milliseconds(2));
    }

    #[test]
    fn recently_run_job_is_skipped_and_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let j = job(dir.path(), "t", "true");

        runner.state().mark_run("t", None).unwrap();
        let before = runner.state().get_last_run("t").unwrap();

        let report = runner.run_all_due(&[j]).unwrap();
        assert_eq!(report.skipped, vec!["t"]);
        assert!(report.ran.is_empty());
        assert_eq!(runner.state().get_last_run("t").unwrap(), before);
    }

    #[test]
    fn disabled_job_is_reported_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let mut j = job(dir.path(), "t", "true");
        j.spec.enabled = false;

        let report = runner.run_all_due(&[j]).unwrap();
        assert_eq!(report.disabled, vec!["t"]);
        assert!(runner.state().get_last_run("t").unwrap().is_none());
    }

    #[test]
    fn paused_job_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        runner.state().pause(PauseTarget::Job("t")).unwrap();

        let report = runner.run_all_due(&[job(dir.path(), "t", "true")]).unwrap();
        assert_eq!(report.paused, vec!["t"]);
    }

    #[test]
    fn failing_command_routes_to_failed_and_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let report = runner.run_all_due(&[job(dir.path(), "t", "false")]).unwrap();
        assert_eq!(report.failed, vec!["t"]);
        assert!(runner.state().get_last_run("t").unwrap().is_none());
        assert!(runner_log(dir.path()).contains("failed:"), "runner log should note the failure");
    }

    #[test]
    fn report_partitions_mixed_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let ok = job(dir.path(), "ok", "true");
        let bad = job(dir.path(), "bad", "false");
        let mut off = job(dir.path(), "off", "true");
        off.spec.enabled = false;
        runner.state().pause(PauseTarget::Job("idle")).unwrap();
        let idle = job(dir.path(), "idle", "true");
        runner.state().mark_run("fresh", None).unwrap();
        let fresh = job(dir.path(), "fresh", "true");

        let jobs = vec![ok, bad, off, idle, fresh];
        let report = runner.run_all_due(&jobs).unwrap();

        assert_eq!(report.ran, vec!["ok"]);
        assert_eq!(report.failed, vec!["bad"]);
        assert_eq!(report.disabled, vec!["off"]);
        assert_eq!(report.paused, vec!["idle"]);
        assert_eq!(report.skipped, vec!["fresh"]);
        assert_eq!(report.total(), jobs.len());
    }

    #[test]
    fn manual_run_executes_and_marks_without_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        runner.run_job_now(&job(dir.path(), "t", "true"), false).unwrap();

        assert!(runner.state().get_last_run("t").unwrap().is_some());
        assert!(runner.state().get_next_scheduled_run("t").unwrap().is_none());
    }

    #[test]
    fn scheduled_interval_run_records_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        runner.run_job_now(&job(dir.path(), "t", "true"), true).unwrap();

        let last = runner.state().get_last_run("t").unwrap().expect("last");
        let next = runner
            .state()
            .get_next_scheduled_run("t")
            .unwrap()
            .expect("next");
        assert_eq!(next - last, chrono::TimeDelta::milliseconds(60_000));
    }

    #[test]
    fn scheduled_run_honors_pause_but_manual_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        runner.state().pause(PauseTarget::Job("t")).unwrap();

        runner.run_job_now(&job(dir.path(), "t", "true"), true).unwrap();
        assert!(runner.state().get_last_run("t").unwrap().is_none());
        assert!(runner_log(dir.path()).contains("skipped - paused"));

        runner.run_job_now(&job(dir.path(), "t", "true"), false).unwrap();
        assert!(runner.state().get_last_run("t").unwrap().is_some());
    }

    #[test]
    fn failing_manual_run_re_raises_after_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let j = job(dir.path(), "t", "false");

        let err = runner.run_job_now(&j, false).unwrap_err();
        assert!(matches!(err, CronError::JobFailed(_)));
        assert!(runner.state().get_last_run("t").unwrap().is_none());
        // Lock released on the failure path.
        assert!(!dir.path().join("locks").join("t.lock").exists());
    }

    #[test]
    fn held_lock_skips_without_error() {
        let _s = crate::lock::test_lock_serial();
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let locks = LockManager::new(dir.path().join("locks"));
        let _guard = locks
            .acquire("t", Duration::from_secs(3600))
            .unwrap()
            .expect("held");

        runner.run_job_now(&job(dir.path(), "t", "true"), true).unwrap();
        assert!(runner.state().get_last_run("t").unwrap().is_none());
        assert!(runner_log(dir.path()).contains("skipped - locked"));
    }

    #[test]
    fn check_missed_runs_overdue_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let j = job(dir.path(), "t", "true");

        // Last run 2 intervals ago.
        let stale = Utc::now() - chrono::TimeDelta::milliseconds(120_000);
        runner
            .state()
            .update_state(|map| {
                map.insert(
                    "t".to_owned(),
                    serde_json::Value::String(crate::state::iso_timestamp(stale)),
                );
            })
            .unwrap();

        let report = runner.check_missed(std::slice::from_ref(&j)).unwrap();
        assert_eq!(report.ran, vec!["t"]);
        let last = runner.state().get_last_run("t").unwrap().expect("updated");
        assert!(last > stale);
    }

    #[test]
    fn check_missed_filters_disabled_and_paused() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let mut off = job(dir.path(), "off", "true");
        off.spec.enabled = false;
        runner.state().pause(PauseTarget::Job("idle")).unwrap();
        let idle = job(dir.path(), "idle", "true");

        let report = runner.check_missed(&[off, idle]).unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn user_op_stdio_is_captured_in_job_log() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let j = job(dir.path(), "t", "echo out-line; echo err-line >&2");

        runner.run_job_now(&j, false).unwrap();

        let log = std::fs::read_to_string(dir.path().join("jobs").join("t.log")).unwrap();
        assert!(log.contains("out-line"), "{log}");
        assert!(log.contains("err-line"), "{log}");
        assert!(log.contains("completed in"), "{log}");
    }

    #[test]
    fn last_run_is_exported_to_the_user_op() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());
        let j = job(dir.path(), "t", "echo \"last=$CRON_BURGUNDY_LAST_RUN\"");

        runner.run_job_now(&j, false).unwrap();
        let first = std::fs::read_to_string(dir.path().join("jobs").join("t.log")).unwrap();
        assert!(first.contains("last=\n") || first.contains("last=$"), "first run has no lastRun: {first}");

        runner.run_job_now(&j, false).unwrap();
        let second = std::fs::read_to_string(dir.path().join("jobs").join("t.log")).unwrap();
        assert!(second.contains("last=20"), "second run sees a timestamp: {second}");
    }

    #[test]
    fn namespaced_jobs_share_bare_ids_independently() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        let mut pm = job(dir.path(), "tick", "true");
        pm.namespace = Some("pm".to_owned());
        let mut am = job(dir.path(), "tick", "true");
        am.namespace = Some("am".to_owned());

        let report = runner.run_all_due(&[pm, am]).unwrap();
        assert_eq!(report.ran, vec!["pm/tick", "am/tick"]);
        assert!(runner.state().get_last_run("pm/tick").unwrap().is_some());
        assert!(runner.state().get_last_run("am/tick").unwrap().is_some());
        assert!(runner.state().get_last_run("tick").unwrap().is_none());
    }

    #[test]
    fn every_invocation_writes_a_runner_log_line() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner_in(dir.path());

        runner.run_job_now(&job(dir.path(), "t", "true"), true).unwrap();
        let log = runner_log(dir.path());
        assert!(log.contains("t [scheduled] starting"), "{log}");
        assert!(log.contains("completed in"), "{log}");
    }
}
