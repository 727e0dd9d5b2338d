//! Centralized filesystem paths for cron-burgundy.
//!
//! Single source of truth for every path the job manager touches. All
//! persistent state lives under one root directory so that short-lived
//! invocations (one per launchd trigger) agree on where to cooperate.
//!
//! # Directory Layout
//!
//! | Purpose | Path |
//! |---------|------|
//! | State mapping | `~/.cron-burgundy/state.json` |
//! | State lock | `~/.cron-burgundy/state.lock` |
//! | Registry | `~/.cron-burgundy/registry.json` |
//! | Per-job locks | `~/.cron-burgundy/locks/<qid>.lock` |
//! | Per-job logs | `~/.cron-burgundy/jobs/<qid>.log` |
//! | Runner log | `~/.cron-burgundy/runner.log` |
//! | launchd agents | `~/Library/LaunchAgents/` |
//!
//! # Environment Overrides
//!
//! `CRON_BURGUNDY_DIR` overrides [`data_dir`] for tests and custom
//! deployments. `CRON_BURGUNDY_AGENTS_DIR` overrides [`launch_agents_dir`].

use std::path::PathBuf;

/// Root directory for all persistent state (`~/.cron-burgundy/`).
///
/// Override with the `CRON_BURGUNDY_DIR` environment variable.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CRON_BURGUNDY_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::home_dir()
        .map(|h| h.join(".cron-burgundy"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cron-burgundy"))
}

/// Persistent state mapping (`data_dir()/state.json`).
#[must_use]
pub fn state_file() -> PathBuf {
    data_dir().join("state.json")
}

/// Registry of job source files (`data_dir()/registry.json`).
#[must_use]
pub fn registry_file() -> PathBuf {
    data_dir().join("registry.json")
}

/// Per-job lock file directory (`data_dir()/locks/`).
#[must_use]
pub fn locks_dir() -> PathBuf {
    data_dir().join("locks")
}

/// Per-job log directory (`data_dir()/jobs/`).
#[must_use]
pub fn jobs_log_dir() -> PathBuf {
    data_dir().join("jobs")
}

/// Global runner log (`data_dir()/runner.log`).
#[must_use]
pub fn runner_log_file() -> PathBuf {
    data_dir().join("runner.log")
}

/// Global runner error log (`data_dir()/runner-error.log`).
///
/// launchd points each job's standard error here.
#[must_use]
pub fn runner_error_log_file() -> PathBuf {
    data_dir().join("runner-error.log")
}

/// Directory launchd scans for per-user agents (`~/Library/LaunchAgents/`).
///
/// Override with the `CRON_BURGUNDY_AGENTS_DIR` environment variable.
#[must_use]
pub fn launch_agents_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("CRON_BURGUNDY_AGENTS_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::home_dir()
        .map(|h| h.join("Library").join("LaunchAgents"))
        .unwrap_or_else(|| PathBuf::from("/tmp/cron-burgundy-agents"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    /// The override tests mutate process-wide env vars.
    fn env_serial() -> MutexGuard<'static, ()> {
        static SERIAL: Mutex<()> = Mutex::new(());
        SERIAL.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[test]
    fn data_dir_is_nonempty() {
        let _s = env_serial();
        let dir = data_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn state_file_is_subpath_of_data_dir() {
        let _s = env_serial();
        assert!(state_file().starts_with(data_dir()));
    }

    #[test]
    fn registry_file_ends_with_registry_json() {
        let _s = env_serial();
        let s = registry_file().to_string_lossy().to_string();
        assert!(s.ends_with("registry.json"), "registry_file: {s}");
    }

    #[test]
    fn locks_and_jobs_are_subpaths_of_data_dir() {
        let _s = env_serial();
        assert!(locks_dir().starts_with(data_dir()));
        assert!(jobs_log_dir().starts_with(data_dir()));
    }

    #[test]
    fn runner_logs_live_in_data_dir() {
        let _s = env_serial();
        let s = runner_log_file().to_string_lossy().to_string();
        assert!(s.ends_with("runner.log"), "runner_log_file: {s}");
        let e = runner_error_log_file().to_string_lossy().to_string();
        assert!(e.ends_with("runner-error.log"), "runner_error_log_file: {e}");
    }

    #[test]
    fn data_dir_override_via_env() {
        let _s = env_serial();
        let key = "CRON_BURGUNDY_DIR";
        let original = std::env::var_os(key);

        // SAFETY: env mutation is serialized through env_serial.
        unsafe { std::env::set_var(key, "/custom/burgundy") };
        assert_eq!(data_dir(), PathBuf::from("/custom/burgundy"));
        assert_eq!(state_file(), PathBuf::from("/custom/burgundy/state.json"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn agents_dir_override_via_env() {
        let _s = env_serial();
        let key = "CRON_BURGUNDY_AGENTS_DIR";
        let original = std::env::var_os(key);

        unsafe { std::env::set_var(key, "/custom/agents") };
        assert_eq!(launch_agents_dir(), PathBuf::from("/custom/agents"));

        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
