//! Model version ids: `YYYYMMDD-HHMM-<sha7>`.

use std::process::Command;

use chrono::{DateTime, Utc};

pub const LOCAL_SHA: &str = "local";

/// Build a version id from a UTC timestamp and a source revision.
///
/// Two runs in the same minute on the same revision produce the same id.
pub fn make_model_version(now: DateTime<Utc>, git_sha: &str) -> String {
    let sha: String = git_sha.trim().chars().take(7).collect();
    let sha = if sha.is_empty() { LOCAL_SHA.to_string() } else { sha };
    format!("{}-{sha}", now.format("%Y%m%d-%H%M"))
}

/// Short revision of the running code.
///
/// `GITHUB_SHA` first, then `git rev-parse --short HEAD`, else `local`.
pub fn resolve_git_sha() -> String {
    if let Some(sha) = std::env::var("GITHUB_SHA")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        return sha.chars().take(7).collect();
    }

    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().chars().take(7).collect::<String>())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| LOCAL_SHA.to_string())
}
