//! Async wrapper over the `git` binary
//!
//! The store only needs a handful of porcelain commands, so they are run as
//! subprocesses rather than through a library binding.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Output;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tracing::trace;

/// Errors from git subprocesses
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),
}

/// One line of `git log`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub date: DateTime<Utc>,
    pub subject: String,
}

/// Filters for a history query
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub limit: usize,
    /// Substring matched against commit messages
    pub grep: Option<String>,
    /// Any date git understands (`2026-01-01`, `2 weeks ago`)
    pub after: Option<String>,
    pub before: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            grep: None,
            after: None,
            before: None,
        }
    }
}

/// Git commands scoped to one working directory
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new<P: AsRef<Path>>(workdir: P) -> Self {
        Self {
            workdir: workdir.as_ref().to_path_buf(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn output(&self, args: &[&str]) -> Result<Output, GitError> {
        trace!("git {}", args.join(" "));
        let output = TokioCommand::new("git")
            .arg("-C")
            .arg(&self.workdir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }

    /// Run a command, returning stdout on success
    pub async fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(GitError::Failed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub async fn init(&self) -> Result<(), GitError> {
        self.run(&["init", "-q"]).await.map(|_| ())
    }

    /// Read a config value; `None` when unset
    pub async fn config_get(&self, key: &str) -> Result<Option<String>, GitError> {
        let output = self.output(&["config", "--get", key]).await?;
        // git exits 1 for a missing key
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(GitError::Failed {
                command: "config".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.run(&["config", key, value]).await.map(|_| ())
    }

    /// Stage and commit exactly one path, returning the new commit hash
    pub async fn commit_file(&self, path: &str, message: &str) -> Result<String, GitError> {
        self.run(&["add", "--", path]).await?;
        self.run(&["commit", "-q", "-m", message, "--", path]).await?;
        self.run(&["rev-parse", "HEAD"])
            .await
            .map(|hash| hash.trim().to_string())
    }

    /// Whether the repository has at least one commit
    pub async fn has_commits(&self) -> Result<bool, GitError> {
        let output = self.output(&["rev-parse", "--verify", "-q", "HEAD"]).await?;
        Ok(output.status.success())
    }

    /// Commits newest first, filtered by `query`
    pub async fn log(&self, query: &LogQuery) -> Result<Vec<LogEntry>, GitError> {
        if !self.has_commits().await? {
            return Ok(Vec::new());
        }

        let limit = format!("-n{}", query.limit.max(1));
        let mut args = vec!["log".to_string(), "--pretty=format:%H|%at|%s".to_string(), limit];
        if let Some(grep) = &query.grep {
            args.push(format!("--grep={}", grep));
            args.push("--regexp-ignore-case".to_string());
            args.push("--fixed-strings".to_string());
        }
        if let Some(after) = &query.after {
            args.push(format!("--after={}", after));
        }
        if let Some(before) = &query.before {
            args.push(format!("--before={}", before));
        }

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run(&args).await?;
        Ok(stdout.lines().filter_map(parse_log_line).collect())
    }

    /// Files touched by a commit
    pub async fn changed_files(&self, rev: &str) -> Result<Vec<String>, GitError> {
        check_revision(rev)?;
        let stdout = self
            .run(&["show", "--name-only", "--pretty=format:", rev])
            .await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Contents of `path` as of `rev`
    pub async fn show_file(&self, rev: &str, path: &str) -> Result<String, GitError> {
        check_revision(rev)?;
        self.run(&["show", &format!("{}:{}", rev, path)]).await
    }
}

fn check_revision(rev: &str) -> Result<(), GitError> {
    let valid = !rev.is_empty()
        && !rev.starts_with('-')
        && rev
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '~' | '^' | '_' | '.' | '/'));
    if valid {
        Ok(())
    } else {
        Err(GitError::InvalidRevision(rev.to_string()))
    }
}

fn parse_log_line(line: &str) -> Option<LogEntry> {
    let mut parts = line.splitn(3, '|');
    let hash = parts.next()?.to_string();
    let seconds = parts.next()?.parse::<i64>().ok()?;
    let subject = parts.next().unwrap_or_default().to_string();
    Some(LogEntry {
        hash,
        date: DateTime::<Utc>::from_timestamp(seconds, 0)?,
        subject,
    })
}
