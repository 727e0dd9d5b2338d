//! CLI binary for cron-burgundy.

use clap::{Parser, Subcommand};
use cron_burgundy::lock::release_all_job_locks;
use cron_burgundy::logs::JobLogs;
use cron_burgundy::state::{PauseTarget, ResumeOutcome, StateStore};
use cron_burgundy::{LaunchdAdapter, LoadedJob, Registry, Runner};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// cron-burgundy: cron-style job manager driving launchd.
#[derive(Parser)]
#[command(name = "cron-burgundy", version, about)]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run one job now, or every due job when no id is given.
    Run {
        /// Qualified (`ns/id`) or bare job id.
        id: Option<String>,

        /// Mark this as a launchd-triggered run (pause gate applies).
        #[arg(long)]
        scheduled: bool,
    },

    /// Catch up jobs missed while the machine slept.
    CheckMissed,

    /// Show registered jobs with their state and installed triggers.
    List {
        /// Only show jobs in this namespace.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Register a job file (optional) and reconcile launchd triggers.
    Sync {
        /// Job source file to register before syncing.
        path: Option<PathBuf>,

        /// Namespace for the file and the sync pass.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Uninstall triggers and unregister job files.
    Clear {
        /// A job file path, or "all".
        target: String,

        /// Restrict to this namespace.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// List installed launchd triggers.
    Status,

    /// Pause a job (or all jobs).
    Pause {
        /// Qualified job id, or "all" (default).
        id: Option<String>,
    },

    /// Resume a paused job (or all jobs).
    Unpause {
        /// Qualified job id, or "all" (default).
        id: Option<String>,
    },

    /// Inspect and manage log files.
    Logs {
        #[command(subcommand)]
        command: LogsCommand,
    },
}

/// Log file operations.
#[derive(Subcommand)]
enum LogsCommand {
    /// Print a job's log.
    View {
        /// Qualified job id.
        id: String,
    },
    /// List job logs and their sizes.
    List,
    /// Delete log files for one job, or for all jobs.
    Clear {
        /// Qualified job id; omit to clear everything.
        id: Option<String>,
    },
    /// Delete rotated log generations.
    Prune,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Diagnostics go to stderr; the runner's own log files are separate.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("cron_burgundy=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Release every held job lock if the process is interrupted.
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, releasing job locks");
            release_all_job_locks();
            std::process::exit(130);
        }
    });

    let result = dispatch(cli.command);
    release_all_job_locks();

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_user_error() => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

fn dispatch(command: Command) -> cron_burgundy::Result<()> {
    match command {
        Command::Run { id, scheduled } => run(id.as_deref(), scheduled),
        Command::CheckMissed => check_missed(),
        Command::List { namespace } => list(namespace.as_deref()),
        Command::Sync { path, namespace } => sync(path.as_deref(), namespace),
        Command::Clear { target, namespace } => clear(&target, namespace.as_deref()),
        Command::Status => status(),
        Command::Pause { id } => pause(id.as_deref(), true),
        Command::Unpause { id } => pause(id.as_deref(), false),
        Command::Logs { command } => logs(command),
    }
}

fn run(id: Option<&str>, scheduled: bool) -> cron_burgundy::Result<()> {
    let runner = Runner::at_default();
    match id {
        Some(id) => {
            let job = Registry::at_default().find_job(id)?;
            runner.run_job_now(&job, scheduled)
        }
        None => {
            let report = runner.run_all_due(&all_jobs(None)?)?;
            print_report(&report);
            Ok(())
        }
    }
}

fn check_missed() -> cron_burgundy::Result<()> {
    let runner = Runner::at_default();
    let report = runner.check_missed(&all_jobs(None)?)?;
    print_report(&report);
    Ok(())
}

fn list(namespace: Option<&str>) -> cron_burgundy::Result<()> {
    let registry = Registry::at_default();
    let state = StateStore::at_default();
    let adapter = LaunchdAdapter::at_default()?;
    let pause = state.get_pause_status()?;
    let installed = adapter.list_installed_plists()?;

    if pause.all {
        println!("(all jobs paused)");
    }

    for source in registry.load_all_jobs()? {
        if namespace.is_some() && source.namespace.as_deref() != namespace {
            continue;
        }
        if let Some(error) = &source.error {
            println!("{}: load failed: {error}", source.file.display());
            continue;
        }
        for job in source.loaded_jobs() {
            let qid = job.qualified_id();
            let mut flags = Vec::new();
            if !job.spec.enabled {
                flags.push("disabled");
            }
            if pause.all || pause.jobs.contains(&qid) {
                flags.push("paused");
            }
            let label = cron_burgundy::launchd::job_label(job.namespace.as_deref(), &job.spec.id);
            if installed.contains(&format!("{label}.plist")) {
                flags.push("installed");
            }

            let last_run = state.get_last_run(&qid)?;
            let last = last_run.map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
            let next =
                cron_burgundy::schedule::next_run(&job.spec, last_run, chrono::Utc::now())?
                    .map_or_else(|| "-".to_owned(), |t| t.to_rfc3339());

            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!(
                "{qid}: {}{flags}\n    last {last}, next {next}",
                cron_burgundy::schedule::describe(&job.spec)
            );
        }
    }
    Ok(())
}

fn sync(path: Option<&std::path::Path>, namespace: Option<String>) -> cron_burgundy::Result<()> {
    let registry = Registry::at_default();
    if let Some(path) = path {
        let outcome = registry.register_file(path, namespace.clone())?;
        println!("{}: {outcome:?}", path.display());
    }

    let adapter = LaunchdAdapter::at_default()?;
    let jobs = all_jobs(namespace.as_deref())?;
    let summary = adapter.sync(&jobs, namespace.as_deref())?;
    adapter.install_wake_check()?;

    println!(
        "sync: {} installed, {} unchanged, {} disabled, {} orphaned",
        summary.installed.len(),
        summary.unchanged.len(),
        summary.disabled.len(),
        summary.orphaned.len()
    );
    Ok(())
}

fn clear(target: &str, namespace: Option<&str>) -> cron_burgundy::Result<()> {
    let registry = Registry::at_default();
    let adapter = LaunchdAdapter::at_default()?;

    if target == "all" {
        for name in adapter.list_installed_plists()? {
            let Some(parsed) = cron_burgundy::parse_plist_filename(&name) else {
                continue;
            };
            if namespace.is_some() && parsed.namespace.as_deref() != namespace {
                continue;
            }
            adapter.uninstall(parsed.namespace.as_deref(), &parsed.id)?;
            println!("uninstalled {}", parsed.qualified_id());
        }
        for entry in registry.entries()? {
            if namespace.is_some() && entry.namespace.as_deref() != namespace {
                continue;
            }
            registry.unregister_file(&entry.path)?;
        }
        // The wake trigger belongs to the whole installation; namespace
        // teardowns leave it for the remaining jobs.
        if namespace.is_none() && adapter.uninstall_wake_check()? {
            println!("uninstalled wake check");
        }
        return Ok(());
    }

    let path = PathBuf::from(target);
    match cron_burgundy::registry::load_source_file(&path) {
        Ok(jobs) => {
            for job in jobs {
                adapter.uninstall(namespace, &job.id)?;
                println!(
                    "uninstalled {}",
                    cron_burgundy::qualify_job_id(&job.id, namespace)
                );
            }
        }
        Err(e) => eprintln!(
            "warning: cannot read {} ({e}); triggers may remain",
            path.display()
        ),
    }
    if registry.unregister_file(&path)? {
        println!("unregistered {}", path.display());
    } else {
        println!("{} was not registered", path.display());
    }
    Ok(())
}

fn status() -> cron_burgundy::Result<()> {
    let adapter = LaunchdAdapter::at_default()?;
    let names = adapter.list_installed_plists()?;
    if names.is_empty() {
        println!("no triggers installed");
        return Ok(());
    }
    for name in names {
        match cron_burgundy::parse_plist_filename(&name) {
            Some(parsed) => println!("{}  ({name})", parsed.qualified_id()),
            None => println!("wake-check  ({name})"),
        }
    }
    Ok(())
}

fn pause(id: Option<&str>, pausing: bool) -> cron_burgundy::Result<()> {
    let state = StateStore::at_default();
    let target = match id {
        None | Some("all") => PauseTarget::All,
        Some(id) => PauseTarget::Job(id),
    };

    if pausing {
        state.pause(target)?;
        match target {
            PauseTarget::All => println!("paused all jobs"),
            PauseTarget::Job(qid) => println!("paused {qid}"),
        }
        return Ok(());
    }

    match (state.resume(target)?, target) {
        (ResumeOutcome::GloballyPaused, PauseTarget::Job(qid)) => {
            println!(
                "all jobs are paused globally; '{qid}' stays paused until you run \
                 `cron-burgundy unpause all`"
            );
        }
        (ResumeOutcome::NotPaused, PauseTarget::Job(qid)) => {
            println!("{qid} was not paused");
        }
        (ResumeOutcome::NotPaused, PauseTarget::All) => println!("nothing was paused"),
        (_, PauseTarget::All) => println!("resumed all jobs"),
        (_, PauseTarget::Job(qid)) => println!("resumed {qid}"),
    }
    Ok(())
}

fn logs(command: LogsCommand) -> cron_burgundy::Result<()> {
    let logs = JobLogs::at_default();
    match command {
        LogsCommand::View { id } => {
            print!("{}", logs.view(&id)?);
        }
        LogsCommand::List => {
            let listed = logs.list()?;
            if listed.is_empty() {
                println!("no job logs");
            }
            for (qid, size) in listed {
                println!("{qid}  {size} bytes");
            }
        }
        LogsCommand::Clear { id } => {
            let removed = logs.clear(id.as_deref())?;
            println!("removed {removed} log file(s)");
        }
        LogsCommand::Prune => {
            let removed = logs.prune()?;
            println!("removed {removed} rotated log file(s)");
        }
    }
    Ok(())
}

/// Load every registered job, skipping sources that failed to load (their
/// errors surface in `list`) and optionally filtering by namespace.
fn all_jobs(namespace: Option<&str>) -> cron_burgundy::Result<Vec<LoadedJob>> {
    let registry = Registry::at_default();
    let mut jobs = Vec::new();
    for source in registry.load_all_jobs()? {
        if namespace.is_some() && source.namespace.as_deref() != namespace {
            continue;
        }
        if let Some(error) = &source.error {
            tracing::warn!("skipping {}: {error}", source.file.display());
            continue;
        }
        jobs.extend(source.loaded_jobs());
    }
    Ok(jobs)
}

fn print_report(report: &cron_burgundy::RunReport) {
    println!(
        "ran {}, skipped {}, disabled {}, paused {}, failed {}",
        report.ran.len(),
        report.skipped.len(),
        report.disabled.len(),
        report.paused.len(),
        report.failed.len()
    );
    for qid in &report.ran {
        println!("  ran {qid}");
    }
    for qid in &report.failed {
        println!("  failed {qid}");
    }
}
