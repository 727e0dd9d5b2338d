//! cron-burgundy: a host-side cron-style job manager for macOS.
//!
//! There is no daemon. launchd fires one short-lived process per trigger,
//! and the processes cooperate through the filesystem:
//!
//! - **State store**: one JSON mapping of qualified id → last-run, updated
//!   atomically under a cross-process lock
//! - **Lock manager**: per-job advisory lock files with pid liveness
//!   probing and stale takeover
//! - **Schedule model**: human phrases and five-field cron, evaluated in
//!   local time
//! - **Registry**: job source files (TOML) mapped to namespaces
//! - **Runner**: gate → lock → execute → persist, per invocation
//! - **launchd adapter**: schedules translated into LaunchAgent plists
//!
//! A run-at-load wake check catches up jobs missed while the host slept.

pub mod burgundy_dirs;
pub mod error;
pub mod job;
pub mod launchd;
pub mod lock;
pub mod logs;
pub mod notify;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod state;

pub use error::{CronError, Result};
pub use job::{JobSpec, LoadedJob, parse_qualified_id, qualify_job_id};
pub use launchd::{InstallOutcome, LaunchdAdapter, SyncSummary, parse_plist_filename};
pub use registry::{JobSource, Registry, RegisterOutcome};
pub use runner::{RunReport, Runner};
pub use schedule::parse_cron_expression;
pub use state::{PauseStatus, PauseTarget, ResumeOutcome, StateStore};
