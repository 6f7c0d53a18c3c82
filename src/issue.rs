//! Issue entities and the per-issue state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;

/// Unique identifier for an issue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueId(String);

impl IssueId {
    pub fn new() -> Self {
        Self(format!("issue-{}", Uuid::new_v4()))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for IssueId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IssueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of defect an analyzer can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Stub,
    Duplicate,
    Bug,
    TypeError,
    LintError,
    MissingTest,
    DeadCode,
    Security,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IssueType::Stub => "stub",
            IssueType::Duplicate => "duplicate",
            IssueType::Bug => "bug",
            IssueType::TypeError => "type_error",
            IssueType::LintError => "lint_error",
            IssueType::MissingTest => "missing_test",
            IssueType::DeadCode => "dead_code",
            IssueType::Security => "security",
        };
        write!(f, "{name}")
    }
}

/// Severity, ordered so `max` picks the more urgent finding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Error,
    Warning,
    Suggestion,
}

/// Issue lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Pending,
    InProgress,
    Resolved,
    Failed,
    Skipped,
}

impl IssueStatus {
    /// Valid transitions: Pending -> InProgress -> {Resolved, Failed,
    /// Skipped}; a failed attempt with retries left goes back to Pending.
    pub fn can_transition(self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Resolved)
                | (InProgress, Failed)
                | (InProgress, Skipped)
                | (InProgress, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IssueStatus::Resolved | IssueStatus::Failed | IssueStatus::Skipped
        )
    }
}

/// One defect finding, produced by exactly one analyzer and consumed by at
/// most one remediation attempt at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub session_id: SessionId,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub category: Category,
    /// Name of the analyzer that produced this finding
    pub source: String,
    pub file_path: String,
    pub line: u32,
    pub end_line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    pub excerpt: Option<String>,
    pub status: IssueStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn span(&self) -> (u32, u32) {
        (self.line, self.end_line.unwrap_or(self.line))
    }

    /// Two findings describe the same logical issue when they share file,
    /// type, and an overlapping line range.
    pub fn same_logical_issue(&self, other: &Issue) -> bool {
        self.session_id == other.session_id
            && self.file_path == other.file_path
            && self.issue_type == other.issue_type
            && spans_overlap(self.span(), other.span())
    }
}

pub fn spans_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            Severity::High.max(Severity::Critical),
            Severity::Critical
        );
    }

    #[test]
    fn span_overlap() {
        assert!(spans_overlap((1, 5), (5, 9)));
        assert!(spans_overlap((3, 3), (1, 10)));
        assert!(!spans_overlap((1, 4), (5, 9)));
    }

    #[test]
    fn status_transitions() {
        use IssueStatus::*;
        assert!(Pending.can_transition(InProgress));
        assert!(InProgress.can_transition(Resolved));
        assert!(InProgress.can_transition(Pending));
        assert!(!Pending.can_transition(Resolved));
        assert!(!Resolved.can_transition(InProgress));
        assert!(!Failed.can_transition(Pending));
    }

    #[test]
    fn issue_type_serde_names() {
        let json = serde_json::to_string(&IssueType::TypeError).unwrap();
        assert_eq!(json, "\"type_error\"");
        let parsed: IssueType = serde_json::from_str("\"dead_code\"").unwrap();
        assert_eq!(parsed, IssueType::DeadCode);
    }
}
