//! Error types for the cron-burgundy core.

/// Top-level error type for the job manager.
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    /// Invalid job definition: bad id, bad schedule, interval below minimum.
    #[error("config error: {0}")]
    Config(String),

    /// State-store failure (corrupt state file, lock timeout).
    #[error("state error: {0}")]
    State(String),

    /// Per-job lock failure other than "held by a live process".
    #[error("lock error: {0}")]
    Lock(String),

    /// Registry or job-source loading error.
    #[error("registry error: {0}")]
    Registry(String),

    /// Schedule parsing or evaluation error.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// launchd plist generation or lifecycle error.
    #[error("launchd error: {0}")]
    Launchd(String),

    /// The user operation exited unsuccessfully.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// A job id could not be resolved through the registry.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CronError {
    /// Returns `true` for errors caused by user input (bad ids, unknown
    /// jobs, unreadable source files) rather than by the system itself.
    /// The CLI maps these to exit code 1.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Registry(_) | Self::Schedule(_) | Self::JobNotFound(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CronError>;
