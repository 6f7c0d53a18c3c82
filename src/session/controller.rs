//! Session controller
//!
//! Owns the session state machine: scan, then process the backlog one
//! issue at a time in severity-then-path order, checkpointing at the
//! configured interval. Cancellation is cooperative; the wall-clock
//! deadline abandons mid-issue work without leaving partial patches.

use crate::analysis::{AnalysisOrchestrator, AnalysisPhase, AnalysisProgress};
use crate::config::MenderConfig;
use crate::error::{Error, Result};
use crate::git::CommitManager;
use crate::issue::{Issue, IssueStatus};
use crate::llm::CompletionProvider;
use crate::plugin::{Finding, PluginRegistry};
use crate::remediate::{AttemptOutcome, RemediationLoop};
use crate::store::{IssueFilter, Store};
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};

use super::events::{EventSink, ProgressEvent};
use super::state::{Checkpoint, Session, SessionCounters, SessionId, SessionStatus};

/// Cooperative cancellation shared with the remediation loop. Checked
/// between issues and between tool calls, never preemptively.
#[derive(Default)]
pub struct ControlHandle {
    stop: AtomicBool,
    pause: AtomicBool,
    deadline: Mutex<Option<Instant>>,
}

impl ControlHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn clear_pause(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Set the wall-clock deadline. The controller installs the session
    /// timeout here; an embedding layer may tighten it.
    pub fn set_deadline(&self, deadline: Instant) {
        *self.deadline.lock().unwrap() = Some(deadline);
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline
            .lock()
            .unwrap()
            .map(|d| Instant::now() >= d)
            .unwrap_or(false)
    }

    /// Stop signal seen by in-flight work: explicit stop or deadline.
    pub fn should_stop(&self) -> bool {
        self.stop_requested() || self.deadline_exceeded()
    }
}

pub struct SessionController {
    store: Arc<dyn Store>,
    registry: Arc<PluginRegistry>,
    provider: Arc<dyn CompletionProvider>,
    runner: Arc<dyn ProcessRunner>,
    events: EventSink,
    control: Arc<ControlHandle>,
}

impl SessionController {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<PluginRegistry>,
        provider: Arc<dyn CompletionProvider>,
        runner: Arc<dyn ProcessRunner>,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            registry,
            provider,
            runner,
            events,
            control: Arc::new(ControlHandle::new()),
        }
    }

    pub fn control(&self) -> Arc<ControlHandle> {
        Arc::clone(&self.control)
    }

    /// Create and persist a new session in the Pending state.
    pub async fn create_session(
        &self,
        repository_path: &Path,
        branch: &str,
        config: MenderConfig,
    ) -> Result<Session> {
        config.validate()?;
        if !repository_path.exists() {
            return Err(Error::Infrastructure(format!(
                "repository checkout {repository_path:?} does not exist"
            )));
        }
        let session = Session::new(&repository_path.to_string_lossy(), branch, config);
        self.store.create_session(session.clone()).await?;
        info!("Created session {}", session.id);
        Ok(session)
    }

    /// Drive a session from Pending (or Paused) until a terminal state or
    /// a pause. Returns the session as last persisted.
    pub async fn run(&self, session_id: &SessionId) -> Result<Session> {
        let mut session = self.store.get_session(session_id).await?;
        session.transition(SessionStatus::Running)?;
        self.control.clear_pause();
        self.store.update_session(session.clone()).await?;

        let started = Instant::now();
        let deadline = started + session.config.session_timeout();
        self.control.set_deadline(deadline);

        let repo_root = PathBuf::from(&session.repository_path);

        // Fixes land on the session's isolated branch
        if let Err(e) = self
            .checkout_cleaning_branch(&repo_root, &session.cleaning_branch)
            .await
        {
            error!("Session {} could not prepare its branch: {e}", session.id);
            session.error = Some(e.to_string());
            session.transition(SessionStatus::Failed)?;
            self.store.update_session(session.clone()).await?;
            return Err(e);
        }

        // Scan phase
        if let Err(e) = self.scan(&mut session, &repo_root).await {
            error!("Session {} failed during analysis: {e}", session.id);
            session.error = Some(e.to_string());
            session.transition(SessionStatus::Failed)?;
            self.store.update_session(session.clone()).await?;
            return Err(e);
        }

        // Remediation phase
        let commits = Arc::new(CommitManager::new(
            Arc::clone(&self.runner),
            &repo_root,
            session.id.clone(),
            Arc::clone(&self.store),
        ));
        let remediation = RemediationLoop::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.runner),
            commits,
            Arc::clone(&self.control),
            session.config.clone(),
            repo_root.clone(),
        );

        let mut processed_since_checkpoint = 0u32;
        loop {
            if self.control.stop_requested() {
                session.transition(SessionStatus::Stopped)?;
                break;
            }
            if self.control.deadline_exceeded() {
                session.transition(SessionStatus::TimedOut)?;
                break;
            }
            if self.control.pause_requested() {
                session.transition(SessionStatus::Paused)?;
                self.refresh_counters(&mut session).await?;
                self.store.update_session(session.clone()).await?;
                info!("Session {} paused", session.id);
                return Ok(session);
            }

            let pending = self
                .store
                .list_issues(IssueFilter::with_status(
                    session.id.clone(),
                    IssueStatus::Pending,
                ))
                .await?;
            if pending.is_empty() {
                session.transition(SessionStatus::Completed)?;
                break;
            }

            let mut issue = next_issue(pending);
            self.claim(&mut issue).await?;
            (self.events)(ProgressEvent::IssueStarted {
                issue_id: issue.id.clone(),
                file_path: issue.file_path.clone(),
            });

            let outcome = match remediation.process(&issue).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Infrastructure failure: release the claim, fail the
                    // session, surface the error.
                    issue.status = IssueStatus::Pending;
                    issue.updated_at = Utc::now();
                    self.store.update_issue(issue.clone()).await?;
                    error!("Session {} failed during remediation: {e}", session.id);
                    session.error = Some(e.to_string());
                    session.transition(SessionStatus::Failed)?;
                    self.store.update_session(session.clone()).await?;
                    return Err(e);
                }
            };
            self.apply_outcome(&session, &mut issue, outcome).await?;

            self.refresh_counters(&mut session).await?;
            processed_since_checkpoint += 1;
            if processed_since_checkpoint >= session.config.checkpoint_interval {
                processed_since_checkpoint = 0;
                session.checkpoint = Some(Checkpoint {
                    counters: session.counters,
                    cursor: Some(issue.id.clone()),
                    created_at: Utc::now(),
                });
                (self.events)(ProgressEvent::CheckpointWritten {
                    counters: session.counters,
                });
            }
            self.store.update_session(session.clone()).await?;
        }

        self.refresh_counters(&mut session).await?;
        self.store.update_session(session.clone()).await?;
        (self.events)(ProgressEvent::SessionCompleted {
            counters: session.counters,
        });
        info!(
            "Session {} finished with status {:?}",
            session.id, session.status
        );
        Ok(session)
    }

    /// Create (or reset) and switch to the session's cleaning branch.
    async fn checkout_cleaning_branch(&self, repo_root: &Path, branch: &str) -> Result<()> {
        let output = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["checkout", "-B", branch])
                    .current_dir(repo_root)
                    .timeout(std::time::Duration::from_secs(60))
                    .build(),
            )
            .await?;
        if !output.success() {
            return Err(Error::Infrastructure(format!(
                "cannot check out branch '{branch}': {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn scan(&self, session: &mut Session, repo_root: &Path) -> Result<()> {
        (self.events)(ProgressEvent::ScanStarted);
        let orchestrator = AnalysisOrchestrator::new(Arc::clone(&self.registry));
        let events = Arc::clone(&self.events);
        let progress: crate::analysis::ProgressCallback = Arc::new(move |p: AnalysisProgress| {
            let analyzer = p.analyzer.clone().unwrap_or_default();
            match p.phase {
                AnalysisPhase::AnalyzerStarted => (events)(ProgressEvent::AnalyzerStarted {
                    analyzer,
                    completed: p.completed,
                    total: p.total,
                }),
                AnalysisPhase::AnalyzerCompleted => (events)(ProgressEvent::AnalyzerCompleted {
                    analyzer,
                    completed: p.completed,
                    total: p.total,
                }),
                AnalysisPhase::MergeCompleted => {}
            }
        });

        let result = orchestrator
            .analyze(repo_root, &session.config, Some(progress))
            .await?;
        for warning in &result.warnings {
            warn!(
                "Analyzer '{}' reported a partial failure: {}",
                warning.analyzer, warning.error
            );
        }

        let created = self.sync_findings(session, result.findings).await?;
        self.refresh_counters(session).await?;
        (self.events)(ProgressEvent::ScanCompleted {
            issues: created,
            warnings: result.warnings.len(),
        });
        Ok(())
    }

    /// Merge scan findings into the stored backlog. An existing issue with
    /// the same logical identity keeps its status and retry count; its
    /// report fields refresh only from an equal-or-higher severity
    /// finding. Terminal issues are never reopened.
    async fn sync_findings(&self, session: &Session, findings: Vec<Finding>) -> Result<usize> {
        let existing = self
            .store
            .list_issues(IssueFilter::all(session.id.clone()))
            .await?;
        let mut total = 0usize;

        for finding in findings {
            let matched = existing.iter().find(|issue| {
                issue.file_path == finding.file_path
                    && issue.issue_type == finding.issue_type
                    && crate::issue::spans_overlap(issue.span(), finding.span())
            });
            match matched {
                Some(issue) if issue.status.is_terminal() => {}
                Some(issue) => {
                    if finding.severity >= issue.severity {
                        let mut updated = issue.clone();
                        updated.severity = finding.severity;
                        updated.category = finding.category;
                        updated.message = finding.message;
                        updated.excerpt = finding.excerpt;
                        updated.source = finding.source;
                        updated.line = finding.line;
                        updated.end_line = finding.end_line;
                        updated.column = finding.column;
                        updated.updated_at = Utc::now();
                        self.store.update_issue(updated).await?;
                    }
                    total += 1;
                }
                None => {
                    let now = Utc::now();
                    let issue = Issue {
                        id: crate::issue::IssueId::new(),
                        session_id: session.id.clone(),
                        issue_type: finding.issue_type,
                        severity: finding.severity,
                        category: finding.category,
                        source: finding.source,
                        file_path: finding.file_path,
                        line: finding.line,
                        end_line: finding.end_line,
                        column: finding.column,
                        message: finding.message,
                        excerpt: finding.excerpt,
                        status: IssueStatus::Pending,
                        retry_count: 0,
                        created_at: now,
                        updated_at: now,
                    };
                    self.store.create_issue(issue).await?;
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    /// Exclusive claim; no two loop instances may hold the same issue.
    async fn claim(&self, issue: &mut Issue) -> Result<()> {
        if !issue.status.can_transition(IssueStatus::InProgress) {
            return Err(Error::Session(format!(
                "issue {} cannot be claimed from {:?}",
                issue.id, issue.status
            )));
        }
        issue.status = IssueStatus::InProgress;
        issue.updated_at = Utc::now();
        self.store.update_issue(issue.clone()).await?;
        Ok(())
    }

    async fn apply_outcome(
        &self,
        session: &Session,
        issue: &mut Issue,
        outcome: AttemptOutcome,
    ) -> Result<()> {
        match outcome {
            AttemptOutcome::Resolved { commit } => {
                issue.status = IssueStatus::Resolved;
                (self.events)(ProgressEvent::IssueResolved {
                    issue_id: issue.id.clone(),
                    commit_hash: commit.hash,
                });
            }
            AttemptOutcome::Skipped { reason } => {
                issue.status = IssueStatus::Skipped;
                (self.events)(ProgressEvent::IssueSkipped {
                    issue_id: issue.id.clone(),
                    reason,
                });
            }
            AttemptOutcome::AttemptFailed { reason } => {
                if issue.retry_count >= session.config.max_retries {
                    issue.status = IssueStatus::Failed;
                } else {
                    issue.retry_count += 1;
                    issue.status = IssueStatus::Pending;
                }
                (self.events)(ProgressEvent::IssueFailed {
                    issue_id: issue.id.clone(),
                    reason,
                });
            }
            AttemptOutcome::Aborted => {
                // Mid-issue abandonment: back to the backlog untouched.
                issue.status = IssueStatus::Pending;
            }
        }
        issue.updated_at = Utc::now();
        self.store.update_issue(issue.clone()).await
    }

    /// Counters are recomputed from the issue collection, never mutated
    /// incrementally, so they cannot drift from store truth.
    async fn refresh_counters(&self, session: &mut Session) -> Result<()> {
        let issues = self
            .store
            .list_issues(IssueFilter::all(session.id.clone()))
            .await?;
        session.counters = SessionCounters::from_issues(&issues);
        session.updated_at = Utc::now();
        Ok(())
    }
}

/// Deterministic backlog order: severity descending, then file path
/// ascending, then line.
fn next_issue(mut pending: Vec<Issue>) -> Issue {
    pending.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(a.file_path.cmp(&b.file_path))
            .then(a.line.cmp(&b.line))
    });
    pending.remove(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, IssueType, Severity};

    fn issue(path: &str, severity: Severity, line: u32) -> Issue {
        let now = Utc::now();
        Issue {
            id: crate::issue::IssueId::new(),
            session_id: SessionId::new(),
            issue_type: IssueType::Bug,
            severity,
            category: Category::Error,
            source: "test".to_string(),
            file_path: path.to_string(),
            line,
            end_line: None,
            column: None,
            message: "m".to_string(),
            excerpt: None,
            status: IssueStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn backlog_order_is_severity_then_path() {
        let picked = next_issue(vec![
            issue("b.ts", Severity::Low, 1),
            issue("a.ts", Severity::Critical, 1),
            issue("a.ts", Severity::High, 1),
        ]);
        assert_eq!(picked.severity, Severity::Critical);
        assert_eq!(picked.file_path, "a.ts");

        let picked = next_issue(vec![
            issue("b.ts", Severity::High, 1),
            issue("a.ts", Severity::High, 1),
        ]);
        assert_eq!(picked.file_path, "a.ts");
    }

    #[test]
    fn control_handle_signals() {
        let control = ControlHandle::new();
        assert!(!control.should_stop());
        control.request_stop();
        assert!(control.should_stop());

        let control = ControlHandle::new();
        control.set_deadline(Instant::now() - std::time::Duration::from_secs(1));
        assert!(control.deadline_exceeded());
        assert!(control.should_stop());
    }
}
