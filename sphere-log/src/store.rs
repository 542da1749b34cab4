//! Version-controlled report log
//!
//! The [`LogStore`] owns one directory: it initializes the git repository on
//! first use, allocates run ids, writes each report exactly once and commits
//! it. Writers serialize on an in-process mutex plus the cross-process
//! [`StoreLock`], so concurrent runs against one store never interleave
//! their commit steps.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sphere_core::{AnalysisRun, Report, RunId};

use crate::{Git, GitError, LogEntry, LogQuery, StoreLock, LOCK_FILE};

/// Process log kept next to the reports, never committed
pub const AUDIT_LOG: &str = "audit.log";

const GITIGNORE: &str = "audit.log\n.sphere.lock\n";

/// Subject lines carry at most this many characters of the query
const SUBJECT_QUERY_CHARS: usize = 50;

const DEFAULT_IDENTITY_NAME: &str = "Sphere";
const DEFAULT_IDENTITY_EMAIL: &str = "sphere@localhost";

/// Store configuration
#[derive(Debug, Clone)]
pub struct LogStoreConfig {
    pub root: PathBuf,
    /// Attempts for the add+commit step
    pub commit_attempts: u32,
    /// Bounded wait for the cross-process lock
    pub lock_timeout: Duration,
}

impl LogStoreConfig {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            commit_attempts: 2,
            lock_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts.max(1);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

/// Fatal persistence failures; no report reached disk
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{0} exists and is not a git repository")]
    NotARepository(PathBuf),

    #[error("Could not lock store at {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to initialize store: {0}")]
    Init(#[from] GitError),

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The report was written but could not be committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceWarning {
    pub run_id: RunId,
    pub report_path: PathBuf,
    pub error: String,
}

impl fmt::Display for PersistenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "report saved to {} but not committed: {}",
            self.report_path.display(),
            self.error
        )
    }
}

/// A committed report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCommit {
    pub hash: String,
    pub run_id: RunId,
    pub report_path: PathBuf,
    /// SHA-256 of the written document
    pub report_sha256: String,
    pub message: String,
}

/// Result of a persist that got the report onto disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Committed(LogCommit),
    Warning(PersistenceWarning),
}

impl PersistOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            PersistOutcome::Committed(c) => &c.run_id,
            PersistOutcome::Warning(w) => &w.run_id,
        }
    }

    pub fn report_path(&self) -> &Path {
        match self {
            PersistOutcome::Committed(c) => &c.report_path,
            PersistOutcome::Warning(w) => &w.report_path,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, PersistOutcome::Committed(_))
    }
}

/// Single-writer, git-backed report directory
pub struct LogStore {
    config: LogStoreConfig,
    git: Git,
    /// Serializes writers in this process; `true` once the repo is ready
    writer: Mutex<bool>,
}

impl LogStore {
    pub fn new(config: LogStoreConfig) -> Self {
        let git = Git::new(&config.root);
        Self {
            config,
            git,
            writer: Mutex::new(false),
        }
    }

    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Self::new(LogStoreConfig::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn report_path(&self, run_id: &RunId) -> PathBuf {
        self.config.root.join(run_id.file_name())
    }

    /// Write and commit the report for `run`.
    ///
    /// The run id is re-allocated under the store lock so ids stay strictly
    /// increasing; the final id is in the returned outcome.
    pub async fn persist(&self, run: &AnalysisRun) -> Result<PersistOutcome, PersistenceError> {
        let mut initialized = self.writer.lock().await;

        tokio::fs::create_dir_all(&self.config.root).await?;
        let lock_path = self.config.root.join(LOCK_FILE);
        let _lock = StoreLock::acquire(lock_path.clone(), self.config.lock_timeout)
            .await
            .map_err(|source| PersistenceError::Lock {
                path: lock_path,
                source,
            })?;

        if !*initialized {
            self.ensure_repository().await?;
            *initialized = true;
        }

        let latest = self.latest_run_id().await?;
        let run_id = run.run_id.clone().after(latest.as_ref());
        let report_path = self.report_path(&run_id);

        let document = Report::from_run(run).render();
        write_new(&report_path, &document)
            .await
            .map_err(|source| PersistenceError::Write {
                path: report_path.clone(),
                source,
            })?;
        debug!("Wrote {}", report_path.display());

        let file_name = run_id.file_name();
        let message = commit_message(&run_id, run);
        let attempts = self.config.commit_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.git.commit_file(&file_name, &message).await {
                Ok(hash) => {
                    info!("Committed {} as {}", file_name, hash);
                    return Ok(PersistOutcome::Committed(LogCommit {
                        hash,
                        run_id,
                        report_path,
                        report_sha256: format!("{:x}", Sha256::digest(document.as_bytes())),
                        message,
                    }));
                }
                Err(e) => {
                    warn!("Commit of {} failed (attempt {}/{}): {}", file_name, attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }

        Ok(PersistOutcome::Warning(PersistenceWarning {
            run_id,
            report_path,
            error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        }))
    }

    /// Commits newest first; a store that was never written is empty
    pub async fn history(&self, query: &LogQuery) -> Result<Vec<LogEntry>, GitError> {
        if !self.config.root.join(".git").exists() {
            return Ok(Vec::new());
        }
        self.git.log(query).await
    }

    /// Report document introduced by `commit`
    pub async fn show(&self, commit: &str) -> Result<Option<String>, GitError> {
        let files = self.git.changed_files(commit).await?;
        let Some(report) = files.iter().find(|f| RunId::from_file_name(f).is_some()) else {
            return Ok(None);
        };
        self.git.show_file(commit, report).await.map(Some)
    }

    async fn ensure_repository(&self) -> Result<(), PersistenceError> {
        let root = &self.config.root;
        if root.join(".git").exists() {
            return Ok(());
        }

        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name != LOCK_FILE && name != AUDIT_LOG {
                return Err(PersistenceError::NotARepository(root.clone()));
            }
        }

        info!("Initializing report store at {}", root.display());
        self.git.init().await?;
        tokio::fs::write(root.join(".gitignore"), GITIGNORE).await?;

        if self.git.config_get("user.name").await?.is_none() {
            self.git.config_set("user.name", DEFAULT_IDENTITY_NAME).await?;
        }
        if self.git.config_get("user.email").await?.is_none() {
            self.git.config_set("user.email", DEFAULT_IDENTITY_EMAIL).await?;
        }
        self.git.config_set("commit.gpgsign", "false").await?;

        Ok(())
    }

    async fn latest_run_id(&self) -> std::io::Result<Option<RunId>> {
        let mut latest: Option<RunId> = None;
        let mut entries = tokio::fs::read_dir(&self.config.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(RunId::from_file_name) {
                if latest.as_ref().map_or(true, |l| id > *l) {
                    latest = Some(id);
                }
            }
        }
        Ok(latest)
    }
}

/// Open `<root>/audit.log` for appending, creating the store directory
pub fn open_audit_log(root: &Path) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(root)?;
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(root.join(AUDIT_LOG))
}

/// Create `path` and write `contents`; a partial file is removed on failure
async fn write_new(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let written = async {
        file.write_all(contents.as_bytes()).await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    discard_partial(path, written).await
}

async fn discard_partial(path: &Path, written: std::io::Result<()>) -> std::io::Result<()> {
    if written.is_err() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not remove partial report {}: {}", path.display(), e);
        }
    }
    written
}

fn commit_message(run_id: &RunId, run: &AnalysisRun) -> String {
    let query: String = run.query.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut subject: String = query.chars().take(SUBJECT_QUERY_CHARS).collect();
    if query.chars().count() > SUBJECT_QUERY_CHARS {
        subject.push_str("...");
    }
    format!(
        "Analysis {} ({}) [{}]: {}",
        run_id,
        run.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
        run.status,
        subject
    )
}
