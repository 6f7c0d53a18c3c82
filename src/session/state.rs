//! Session entities and the session state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MenderConfig;
use crate::issue::{Issue, IssueId, IssueStatus};

/// Unique identifier for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
    TimedOut,
}

impl SessionStatus {
    /// Pending -> Running -> {Paused, Completed, Failed, Stopped,
    /// TimedOut}; Paused -> {Running, Stopped}.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Stopped)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
                | (Running, TimedOut)
                | (Paused, Running)
                | (Paused, Stopped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Failed
                | SessionStatus::Stopped
                | SessionStatus::TimedOut
        )
    }
}

/// Issue counters, recomputed from the issue collection on every
/// transition rather than incrementally mutated, so the cached numbers
/// cannot drift from store truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub total_issues: usize,
    pub resolved_issues: usize,
    pub failed_issues: usize,
    pub skipped_issues: usize,
}

impl SessionCounters {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut counters = Self {
            total_issues: issues.len(),
            ..Default::default()
        };
        for issue in issues {
            match issue.status {
                IssueStatus::Resolved => counters.resolved_issues += 1,
                IssueStatus::Failed => counters.failed_issues += 1,
                IssueStatus::Skipped => counters.skipped_issues += 1,
                IssueStatus::Pending | IssueStatus::InProgress => {}
            }
        }
        counters
    }

    pub fn pending(&self) -> usize {
        self.total_issues - self.resolved_issues - self.failed_issues - self.skipped_issues
    }
}

/// Durable snapshot of session progress enabling resume after
/// interruption. Written strictly after the state it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub counters: SessionCounters,
    /// Last issue whose processing fully completed
    pub cursor: Option<IssueId>,
    pub created_at: DateTime<Utc>,
}

/// One remediation run against one repository checkout. Owned exclusively
/// by the session controller; mutated only through controller-mediated
/// transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub repository_path: String,
    pub branch: String,
    /// Isolated branch the fixes land on
    pub cleaning_branch: String,
    pub status: SessionStatus,
    pub config: MenderConfig,
    pub counters: SessionCounters,
    pub checkpoint: Option<Checkpoint>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(repository_path: &str, branch: &str, config: MenderConfig) -> Self {
        let now = Utc::now();
        let id = SessionId::new();
        let cleaning_branch = format!("mender/{}", id.as_str());
        Self {
            id,
            repository_path: repository_path.to_string(),
            branch: branch.to_string(),
            cleaning_branch,
            status: SessionStatus::Pending,
            config,
            counters: SessionCounters::default(),
            checkpoint: None,
            error: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply a status transition, validating it against the state machine.
    pub fn transition(&mut self, next: SessionStatus) -> crate::error::Result<()> {
        if !self.status.can_transition(next) {
            return Err(crate::error::Error::Session(format!(
                "invalid transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        if next.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, IssueType, Severity};

    fn issue(status: IssueStatus) -> Issue {
        Issue {
            id: IssueId::new(),
            session_id: SessionId::new(),
            issue_type: IssueType::Bug,
            severity: Severity::Medium,
            category: Category::Error,
            source: "test".to_string(),
            file_path: "a.rs".to_string(),
            line: 1,
            end_line: None,
            column: None,
            message: "m".to_string(),
            excerpt: None,
            status,
            retry_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn counters_recompute_from_issue_set() {
        let issues = vec![
            issue(IssueStatus::Resolved),
            issue(IssueStatus::Resolved),
            issue(IssueStatus::Failed),
            issue(IssueStatus::Skipped),
            issue(IssueStatus::Pending),
        ];
        let counters = SessionCounters::from_issues(&issues);
        assert_eq!(counters.total_issues, 5);
        assert_eq!(counters.resolved_issues, 2);
        assert_eq!(counters.failed_issues, 1);
        assert_eq!(counters.skipped_issues, 1);
        assert_eq!(counters.pending(), 1);
    }

    #[test]
    fn session_transitions_follow_state_machine() {
        let mut session = Session::new("/tmp/repo", "main", MenderConfig::default());
        assert_eq!(session.status, SessionStatus::Pending);
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::Paused).unwrap();
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::Completed).unwrap();
        assert!(session.completed_at.is_some());
        assert!(session.transition(SessionStatus::Running).is_err());
    }

    #[test]
    fn running_can_time_out_and_timeout_is_terminal() {
        let mut session = Session::new("/tmp/repo", "main", MenderConfig::default());
        session.transition(SessionStatus::Running).unwrap();
        session.transition(SessionStatus::TimedOut).unwrap();
        assert!(session.status.is_terminal());
        assert!(session.transition(SessionStatus::Running).is_err());
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut session = Session::new("/tmp/repo", "main", MenderConfig::default());
        assert!(session.transition(SessionStatus::Completed).is_err());
    }
}
