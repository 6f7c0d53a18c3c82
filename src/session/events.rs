//! Structured progress events
//!
//! One-way notifications consumed by the server layer for realtime
//! display; never a control channel back into the core.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::SessionCounters;
use crate::issue::IssueId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    ScanStarted,
    AnalyzerStarted {
        analyzer: String,
        completed: usize,
        total: usize,
    },
    AnalyzerCompleted {
        analyzer: String,
        completed: usize,
        total: usize,
    },
    ScanCompleted {
        issues: usize,
        warnings: usize,
    },
    IssueStarted {
        issue_id: IssueId,
        file_path: String,
    },
    IssueResolved {
        issue_id: IssueId,
        commit_hash: String,
    },
    IssueFailed {
        issue_id: IssueId,
        reason: String,
    },
    IssueSkipped {
        issue_id: IssueId,
        reason: String,
    },
    CheckpointWritten {
        counters: SessionCounters,
    },
    SessionCompleted {
        counters: SessionCounters,
    },
}

impl ProgressEvent {
    pub fn description(&self) -> String {
        match self {
            ProgressEvent::ScanStarted => "Analysis started".to_string(),
            ProgressEvent::AnalyzerStarted {
                analyzer,
                completed,
                total,
            } => format!("Analyzer '{analyzer}' started ({completed}/{total})"),
            ProgressEvent::AnalyzerCompleted {
                analyzer,
                completed,
                total,
            } => format!("Analyzer '{analyzer}' completed ({completed}/{total})"),
            ProgressEvent::ScanCompleted { issues, warnings } => {
                format!("Analysis completed: {issues} issues, {warnings} warnings")
            }
            ProgressEvent::IssueStarted { file_path, .. } => {
                format!("Fixing {file_path}")
            }
            ProgressEvent::IssueResolved { commit_hash, .. } => {
                format!("Resolved in commit {commit_hash}")
            }
            ProgressEvent::IssueFailed { reason, .. } => format!("Attempt failed: {reason}"),
            ProgressEvent::IssueSkipped { reason, .. } => format!("Skipped: {reason}"),
            ProgressEvent::CheckpointWritten { counters } => format!(
                "Checkpoint: {}/{} resolved",
                counters.resolved_issues, counters.total_issues
            ),
            ProgressEvent::SessionCompleted { counters } => format!(
                "Session complete: {} resolved, {} failed, {} skipped",
                counters.resolved_issues, counters.failed_issues, counters.skipped_issues
            ),
        }
    }
}

/// Event sink shared by the orchestrator and the remediation loop.
pub type EventSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Sink that drops every event, for callers that do not observe progress.
pub fn null_sink() -> EventSink {
    Arc::new(|_| {})
}
