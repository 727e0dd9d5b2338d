//! Adapter lifecycle over a temp LaunchAgents directory: registry-driven
//! sync, byte-stable reinstall, orphan removal, and the wake trigger.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use cron_burgundy::launchd::{InstallOutcome, LaunchdAdapter, WAKECHECK_LABEL};
use cron_burgundy::lock::LockManager;
use cron_burgundy::logs::LogFile;
use cron_burgundy::registry::Registry;
use cron_burgundy::state::StateStore;
use std::path::{Path, PathBuf};

fn adapter_in(dir: &Path) -> LaunchdAdapter {
    LaunchdAdapter::new(
        dir.join("agents"),
        PathBuf::from("/usr/local/bin/cron-burgundy"),
        StateStore::new(dir.join("state.json")),
        LockManager::new(dir.join("locks")),
        LogFile::new(dir.join("runner.log")),
    )
}

fn registered_jobs(dir: &Path, body: &str, namespace: Option<&str>) -> Vec<cron_burgundy::LoadedJob> {
    let file = dir.join("jobs.toml");
    std::fs::write(&file, body).unwrap();
    let registry = Registry::new(dir.join("registry.json"));
    registry
        .register_file(&file, namespace.map(str::to_owned))
        .unwrap();
    registry
        .load_all_jobs()
        .unwrap()
        .into_iter()
        .flat_map(|source| source.loaded_jobs())
        .collect()
}

#[test]
fn sync_installs_enabled_jobs_and_wake_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter_in(dir.path());
    let jobs = registered_jobs(
        dir.path(),
        r#"
            [[job]]
            id = "tick"
            interval = 60000
            command = "echo tick"

            [[job]]
            id = "report"
            schedule = "on weekdays at 9:00"
            command = "echo report"

            [[job]]
            id = "off"
            interval = 60000
            enabled = false
            command = "true"
        "#,
        Some("pm"),
    );

    let summary = adapter.sync(&jobs, Some("pm")).unwrap();
    adapter.install_wake_check().unwrap();

    assert_eq!(summary.installed.len(), 2);
    assert_eq!(summary.disabled, vec!["pm/off"]);

    let agents = dir.path().join("agents");
    assert!(agents.join("com.cron-burgundy.job.pm.tick.plist").exists());
    assert!(agents.join("com.cron-burgundy.job.pm.report.plist").exists());
    assert!(!agents.join("com.cron-burgundy.job.pm.off.plist").exists());
    assert!(agents.join(format!("{WAKECHECK_LABEL}.plist")).exists());

    // The cron job expanded into five weekday records at 9:00.
    let report =
        std::fs::read_to_string(agents.join("com.cron-burgundy.job.pm.report.plist")).unwrap();
    assert_eq!(report.matches("<key>Weekday</key>").count(), 5);
    assert_eq!(report.matches("<integer>9</integer>").count(), 5);
    assert!(report.contains("<string>pm/report</string>"));

    // Resyncing the same definitions touches nothing.
    let summary = adapter.sync(&jobs, Some("pm")).unwrap();
    assert_eq!(summary.unchanged.len(), 2);
    assert!(summary.installed.is_empty());
}

#[test]
fn removing_a_job_from_the_source_orphans_its_trigger() {
    let dir = tempfile::tempdir().unwrap();
    let adapter = adapter_in(dir.path());

    let jobs = registered_jobs(
        dir.path(),
        r#"
            [[job]]
            id = "keep"
            interval = 60000
            command = "true"

            [[job]]
            id = "gone"
            interval = 60000
            command = "true"
        "#,
        None,
    );
    adapter.sync(&jobs, None).unwrap();

    // The user edits the file down to one job.
    let kept: Vec<_> = jobs.into_iter().filter(|j| j.spec.id == "keep").collect();
    let summary = adapter.sync(&kept, None).unwrap();

    assert_eq!(summary.orphaned, vec!["gone"]);
    let agents = dir.path().join("agents");
    assert!(agents.join("com.cron-burgundy.job.keep.plist").exists());
    assert!(!agents.join("com.cron-burgundy.job.gone.plist").exists());
}

#[test]
fn plist_bytes_are_stable_across_processes() {
    // Byte-equality is the install no-op contract, so generation must not
    // depend on anything run-to-run (timestamps, map ordering, ...).
    let dir = tempfile::tempdir().unwrap();
    let jobs = registered_jobs(
        dir.path(),
        r#"
            [[job]]
            id = "tick"
            schedule = "*/15 * * * *"
            command = "echo tick"
        "#,
        Some("pm"),
    );

    let first = adapter_in(dir.path()).generate_job_plist(&jobs[0]).unwrap();
    let second = adapter_in(dir.path()).generate_job_plist(&jobs[0]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.matches("<key>Minute</key>").count(), 4);

    let adapter = adapter_in(dir.path());
    assert_eq!(adapter.install(&jobs[0]).unwrap(), InstallOutcome::Installed);
    assert_eq!(adapter.install(&jobs[0]).unwrap(), InstallOutcome::Unchanged);
}

#[test]
fn evaluator_and_expansion_agree_on_fire_minutes() {
    // Walk a two-week minute grid: every evaluator fire time must be
    // covered by some calendar record, and every record match must be an
    // evaluator fire.
    use chrono::{Datelike, NaiveDate, TimeDelta, Timelike};
    use cron_burgundy::schedule::CronExpr;

    for source in ["*/20 * * * *", "0 6-8 * * *", "30 12 * * 1-5", "0 0 1,15 * *"] {
        let expr = CronExpr::parse(source).unwrap();
        let records = cron_burgundy::launchd::expand_calendar_intervals(&expr).unwrap();

        let mut t = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let end = t + TimeDelta::days(14);
        while t < end {
            let evaluator_fires = expr.next_fire(t) == Some(t);
            let record_fires = records.iter().any(|r| {
                r.minute.is_none_or(|m| m == t.minute())
                    && r.hour.is_none_or(|h| h == t.hour())
                    && r.day.is_none_or(|d| d == t.day())
                    && r.month.is_none_or(|m| m == t.month())
                    && r.weekday
                        .is_none_or(|w| w == t.weekday().num_days_from_sunday())
            });
            assert_eq!(
                evaluator_fires, record_fires,
                "{source} disagrees at {t}"
            );
            t += TimeDelta::minutes(1);
        }
    }
}
