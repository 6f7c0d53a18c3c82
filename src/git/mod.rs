//! Commit/Revert manager
//!
//! Wraps every successful fix in a version-control commit and records it in
//! the store. Commit failures are returned as data, never thrown across
//! this boundary; reverts mark the original record instead of deleting
//! history.

use crate::error::{Error, Result};
use crate::session::SessionId;
use crate::store::Store;
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput, ProcessRunner};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub mod parsers;
pub mod types;

pub use types::{
    ChangeType, CommitId, CommitOptions, CommitRecord, CommitResult, FileChange, RevertMode,
    RevertOptions, RevertResult,
};

const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_AUTHOR: &str = "mender";
const DEFAULT_AUTHOR_EMAIL: &str = "mender@localhost";

pub struct CommitManager {
    runner: Arc<dyn ProcessRunner>,
    repo_root: PathBuf,
    session_id: SessionId,
    store: Arc<dyn Store>,
}

impl CommitManager {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        repo_root: &Path,
        session_id: SessionId,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            runner,
            repo_root: repo_root.to_path_buf(),
            session_id,
            store,
        }
    }

    async fn git(&self, args: &[&str], description: &str) -> Result<ProcessOutput> {
        let command = ProcessCommandBuilder::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .timeout(GIT_TIMEOUT)
            .build();
        let output = self.runner.run(command).await?;
        if !output.success() {
            return Err(Error::Git(format!(
                "git {description} failed: {}",
                output.stderr.trim()
            )));
        }
        Ok(output)
    }

    pub async fn current_head(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "HEAD"], "rev-parse").await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn has_changes(&self) -> Result<bool> {
        let output = self.git(&["status", "--porcelain"], "status").await?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Discard all uncommitted changes in the working tree.
    pub async fn discard_working_copy(&self) -> Result<()> {
        self.git(&["checkout", "--", "."], "checkout").await?;
        self.git(&["clean", "-fd"], "clean").await?;
        Ok(())
    }

    /// Stage the requested files (or everything), create a commit, and
    /// record it. Never returns `Err`; failures come back as
    /// `CommitResult { success: false, .. }`.
    pub async fn commit(&self, options: CommitOptions) -> CommitResult {
        match self.commit_inner(options).await {
            Ok(result) => result,
            Err(e) => CommitResult::failed(e.to_string()),
        }
    }

    async fn commit_inner(&self, options: CommitOptions) -> Result<CommitResult> {
        match &options.files {
            Some(files) if !files.is_empty() => {
                let mut args = vec!["add", "--"];
                args.extend(files.iter().map(String::as_str));
                self.git(&args, "add").await?;
            }
            _ => {
                self.git(&["add", "-A"], "add").await?;
            }
        }

        let staged = self
            .git(&["diff", "--cached", "--name-only"], "diff --cached")
            .await?;
        if staged.stdout.trim().is_empty() {
            return Ok(CommitResult::failed("nothing to commit"));
        }

        let author = options.author.as_deref().unwrap_or(DEFAULT_AUTHOR);
        let email = options
            .author_email
            .as_deref()
            .unwrap_or(DEFAULT_AUTHOR_EMAIL);
        let name_config = format!("user.name={author}");
        let email_config = format!("user.email={email}");
        self.git(
            &[
                "-c",
                &name_config,
                "-c",
                &email_config,
                "commit",
                "-m",
                &options.message,
            ],
            "commit",
        )
        .await?;

        let hash = self.current_head().await?;
        let numstat_out = self
            .git(&["show", "--numstat", "--format=", &hash], "show --numstat")
            .await?;
        let name_status_out = self
            .git(
                &["show", "--name-status", "--format=", &hash],
                "show --name-status",
            )
            .await?;
        let diff_out = self
            .git(&["show", "--format=", &hash], "show")
            .await?;

        let numstat = parsers::parse_numstat(&numstat_out.stdout);
        let files_changed = parsers::parse_file_changes(&name_status_out.stdout, &numstat);
        let (insertions, deletions) = parsers::change_totals(&files_changed);

        let record = CommitRecord {
            id: CommitId::new(),
            session_id: self.session_id.clone(),
            issue_id: options.issue_id,
            hash: hash.clone(),
            message: options.message,
            diff_content: diff_out.stdout,
            files_changed,
            insertions,
            deletions,
            reverted: false,
            reverted_at: None,
            revert_hash: None,
            revert_reason: None,
            author: author.to_string(),
            author_email: email.to_string(),
            created_at: Utc::now(),
        };

        self.store
            .create_commit(record.clone())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        info!("Recorded commit {} ({} files)", hash, record.files_changed.len());
        Ok(CommitResult::ok(record))
    }

    /// Revert a recorded commit, either as a new revert commit or a hard
    /// reset. Fails explicitly when the commit is unknown or the working
    /// tree has uncommitted changes that would be clobbered.
    pub async fn revert(&self, options: RevertOptions) -> Result<RevertResult> {
        if options.reason.trim().is_empty() {
            return Err(Error::Validation(
                "revert requires a non-empty reason".to_string(),
            ));
        }
        if self.has_changes().await? {
            return Err(Error::Git(
                "working tree has uncommitted changes; commit or discard them first".to_string(),
            ));
        }

        let probe = format!("{}^{{commit}}", options.hash);
        if self.git(&["cat-file", "-e", &probe], "cat-file").await.is_err() {
            return Err(Error::NotFound(format!("commit {}", options.hash)));
        }

        let name_config = format!("user.name={DEFAULT_AUTHOR}");
        let email_config = format!("user.email={DEFAULT_AUTHOR_EMAIL}");

        let revert_hash = match options.mode {
            RevertMode::RevertCommit => {
                self.git(
                    &[
                        "-c",
                        &name_config,
                        "-c",
                        &email_config,
                        "revert",
                        "--no-edit",
                        &options.hash,
                    ],
                    "revert",
                )
                .await?;
                Some(self.current_head().await?)
            }
            RevertMode::HardReset => {
                let target = format!("{}^", options.hash);
                self.git(&["reset", "--hard", &target], "reset").await?;
                None
            }
        };

        self.store
            .mark_reverted(
                &self.session_id,
                &options.hash,
                &options.reason,
                revert_hash.clone(),
            )
            .await
            .map_err(|e| Error::Store(e.to_string()))?;

        debug!(
            "Reverted commit {} ({})",
            options.hash,
            revert_hash.as_deref().unwrap_or("hard reset")
        );
        Ok(RevertResult { revert_hash })
    }
}
