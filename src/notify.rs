//! User-facing failure notifications.
//!
//! On macOS this posts a Notification Center banner through `osascript`.
//! Everywhere else it degrades to a tracing warning. Always best-effort:
//! a broken notification path must never mask the job failure itself.

/// Notify the user that a job failed.
pub fn job_failure(qid: &str, message: &str) {
    let body = format!("Job {qid} failed: {message}");
    post("cron-burgundy", &body);
}

#[cfg(target_os = "macos")]
fn post(title: &str, body: &str) {
    let script = format!(
        "display notification \"{}\" with title \"{}\"",
        escape(body),
        escape(title)
    );
    let result = std::process::Command::new("osascript")
        .arg("-e")
        .arg(&script)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    if let Err(e) = result {
        tracing::debug!("notification skipped: {e}");
    }
}

#[cfg(not(target_os = "macos"))]
fn post(title: &str, body: &str) {
    tracing::warn!("{title}: {body}");
}

/// Escape for embedding in a double-quoted AppleScript string.
#[cfg(target_os = "macos")]
fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
