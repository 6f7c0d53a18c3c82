//! Commit entities and operation options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::issue::IssueId;
use crate::session::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    pub fn new() -> Self {
        Self(format!("commit-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    pub insertions: usize,
    pub deletions: usize,
    #[serde(default)]
    pub old_path: Option<String>,
}

/// A recorded mutation the remediation loop applied. Append-only; a revert
/// updates flags on the record, never deletes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: CommitId,
    pub session_id: SessionId,
    pub issue_id: Option<IssueId>,
    pub hash: String,
    pub message: String,
    pub diff_content: String,
    pub files_changed: Vec<FileChange>,
    pub insertions: usize,
    pub deletions: usize,
    pub reverted: bool,
    pub reverted_at: Option<DateTime<Utc>>,
    /// Set only when the revert was performed as a new commit
    pub revert_hash: Option<String>,
    pub revert_reason: Option<String>,
    pub author: String,
    pub author_email: String,
    pub created_at: DateTime<Utc>,
}

impl CommitRecord {
    /// A reverted record must carry a non-empty reason.
    pub fn revert_state_valid(&self) -> bool {
        if self.reverted {
            self.revert_reason
                .as_deref()
                .map(|r| !r.trim().is_empty())
                .unwrap_or(false)
        } else {
            self.revert_hash.is_none() && self.revert_reason.is_none()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub message: String,
    /// Paths to stage; `None` stages all changes
    pub files: Option<Vec<String>>,
    pub issue_id: Option<IssueId>,
    pub author: Option<String>,
    pub author_email: Option<String>,
}

/// Returned across the commit boundary. Failure is data, not a panic.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub success: bool,
    pub commit: Option<CommitRecord>,
    pub error: Option<String>,
}

impl CommitResult {
    pub fn ok(commit: CommitRecord) -> Self {
        Self {
            success: true,
            commit: Some(commit),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            commit: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevertMode {
    /// Create a new revert commit (default)
    #[default]
    RevertCommit,
    /// Hard-reset the branch to before the commit
    HardReset,
}

#[derive(Debug, Clone)]
pub struct RevertOptions {
    pub hash: String,
    pub reason: String,
    pub mode: RevertMode,
}

#[derive(Debug, Clone)]
pub struct RevertResult {
    /// Hash of the new revert commit; absent for a hard reset
    pub revert_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CommitRecord {
        CommitRecord {
            id: CommitId::new(),
            session_id: SessionId::new(),
            issue_id: None,
            hash: "abc123".to_string(),
            message: "fix".to_string(),
            diff_content: String::new(),
            files_changed: Vec::new(),
            insertions: 0,
            deletions: 0,
            reverted: false,
            reverted_at: None,
            revert_hash: None,
            revert_reason: None,
            author: "a".to_string(),
            author_email: "a@b.c".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn revert_invariant_requires_reason() {
        let mut commit = record();
        assert!(commit.revert_state_valid());

        commit.reverted = true;
        assert!(!commit.revert_state_valid());

        commit.revert_reason = Some("  ".to_string());
        assert!(!commit.revert_state_valid());

        commit.revert_reason = Some("verification regression".to_string());
        assert!(commit.revert_state_valid());
    }
}
