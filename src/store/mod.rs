//! Durable state behind a narrow repository interface
//!
//! The store is the sole owner of durable session/issue/commit state; all
//! writes go through these methods, and writes are serialized per session
//! id. The default backend persists pretty-printed JSON files under a
//! state directory; an in-memory backend backs tests.

use crate::error::Result;
use crate::git::CommitRecord;
use crate::issue::{Issue, IssueId, IssueStatus};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use std::path::PathBuf;

pub mod json;
pub mod memory;

pub use json::JsonStore;
pub use memory::InMemoryStore;

/// Criteria for listing issues.
#[derive(Debug, Clone)]
pub struct IssueFilter {
    pub session_id: SessionId,
    pub status: Option<IssueStatus>,
    pub file_path: Option<String>,
}

impl IssueFilter {
    pub fn all(session_id: SessionId) -> Self {
        Self {
            session_id,
            status: None,
            file_path: None,
        }
    }

    pub fn with_status(session_id: SessionId, status: IssueStatus) -> Self {
        Self {
            session_id,
            status: Some(status),
            file_path: None,
        }
    }

    pub fn matches(&self, issue: &Issue) -> bool {
        issue.session_id == self.session_id
            && self.status.map(|s| issue.status == s).unwrap_or(true)
            && self
                .file_path
                .as_deref()
                .map(|p| issue.file_path == p)
                .unwrap_or(true)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<()>;
    async fn update_session(&self, session: Session) -> Result<()>;
    async fn get_session(&self, id: &SessionId) -> Result<Session>;

    async fn create_issue(&self, issue: Issue) -> Result<()>;
    async fn update_issue(&self, issue: Issue) -> Result<()>;
    async fn get_issue(&self, id: &IssueId) -> Result<Issue>;
    async fn list_issues(&self, filter: IssueFilter) -> Result<Vec<Issue>>;

    async fn create_commit(&self, commit: CommitRecord) -> Result<()>;
    async fn list_commits(&self, session_id: &SessionId) -> Result<Vec<CommitRecord>>;

    /// Mark a recorded commit reverted. The reason is mandatory;
    /// `revert_hash` is present only when the revert was a new commit.
    async fn mark_reverted(
        &self,
        session_id: &SessionId,
        hash: &str,
        reason: &str,
        revert_hash: Option<String>,
    ) -> Result<CommitRecord>;
}

/// Default state directory for the JSON store.
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mender")
}
