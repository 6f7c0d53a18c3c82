//! End-to-end remediation tests: session controller + mock provider +
//! real temporary git repositories

use async_trait::async_trait;
use mender::config::{AnalysisConfig, MenderConfig};
use mender::error::Result;
use mender::issue::{Category, IssueStatus, IssueType, Severity};
use mender::llm::{
    Completion, CompletionProvider, CompletionRequest, MockProvider, ToolCall,
};
use mender::plugin::{Analyzer, AnalyzerManifest, AnalyzerOrigin, Finding, PluginRegistry};
use mender::session::{null_sink, ControlHandle, SessionController};
use mender::snapshot::Snapshot;
use mender::store::{InMemoryStore, IssueFilter, Store};
use mender::subprocess::TokioProcessRunner;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git available");
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(dir: &Path) {
    fs::create_dir_all(dir.join("src")).unwrap();
    fs::write(
        dir.join("src/app.rs"),
        "fn done() {}\nfn pending() { todo!(\"later\") }\n",
    )
    .unwrap();
    git(dir, &["init", "-q", "-b", "main"]);
    git(dir, &["config", "user.name", "tester"]);
    git(dir, &["config", "user.email", "tester@example.com"]);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "seed"]);
}

/// Analyzer that reports exactly one stub finding in src/app.rs.
struct SeededAnalyzer;

#[async_trait]
impl Analyzer for SeededAnalyzer {
    fn name(&self) -> &str {
        "seeded"
    }

    fn issue_types(&self) -> Vec<IssueType> {
        vec![IssueType::Stub]
    }

    async fn detect(&self, _: &Snapshot, _: &AnalysisConfig) -> Result<Vec<Finding>> {
        Ok(vec![Finding {
            issue_type: IssueType::Stub,
            severity: Severity::High,
            category: Category::Warning,
            file_path: "src/app.rs".to_string(),
            line: 2,
            end_line: None,
            column: None,
            message: "unfinished macro stub".to_string(),
            excerpt: Some("fn pending() { todo!(\"later\") }".to_string()),
            source: String::new(),
        }])
    }
}

fn seeded_registry() -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry
        .register(
            AnalyzerManifest::builtin("seeded", "test analyzer", vec![IssueType::Stub]),
            AnalyzerOrigin::Builtin,
            Arc::new(SeededAnalyzer),
        )
        .unwrap();
    Arc::new(registry)
}

fn write_patch_completion() -> Completion {
    Completion {
        text: String::new(),
        tool_calls: vec![ToolCall {
            name: "write_patch".to_string(),
            arguments: json!({
                "path": "src/app.rs",
                "content": "fn done() {}\nfn pending() {}\n"
            }),
        }],
    }
}

fn config(max_retries: u32) -> MenderConfig {
    MenderConfig {
        provider: "mock".to_string(),
        max_retries,
        corrective_retries: 0,
        ..Default::default()
    }
}

#[tokio::test]
async fn issue_resolves_on_third_attempt_after_two_verification_failures() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    // Verification passes only on its third run
    fs::write(
        dir.path().join("verify.sh"),
        "n=0\n[ -f .count ] && n=$(cat .count)\nn=$((n+1))\necho $n > .count\n[ $n -ge 3 ]\n",
    )
    .unwrap();
    git(dir.path(), &["add", "-A"]);
    git(dir.path(), &["commit", "-q", "-m", "verify script"]);

    let provider = Arc::new(MockProvider::new());
    for _ in 0..3 {
        provider.push_response(write_patch_completion());
        provider.push_text("Patched the stub.");
    }

    let mut config = config(2);
    config.verification.test_command = Some("sh verify.sh".to_string());

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let controller = SessionController::new(
        store.clone(),
        seeded_registry(),
        provider.clone(),
        Arc::new(TokioProcessRunner),
        null_sink(),
    );

    let session = controller
        .create_session(dir.path(), "main", config)
        .await
        .unwrap();
    let finished = controller.run(&session.id).await.unwrap();

    assert_eq!(finished.status, mender::session::SessionStatus::Completed);
    assert_eq!(finished.counters.resolved_issues, 1);
    assert_eq!(finished.counters.failed_issues, 0);

    let issues = store
        .list_issues(IssueFilter::all(session.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].status, IssueStatus::Resolved);
    assert_eq!(issues[0].retry_count, 2);

    let commits = store.list_commits(&session.id).await.unwrap();
    assert_eq!(commits.len(), 1);
    assert!(!commits[0].reverted);
    assert_eq!(commits[0].issue_id.as_ref(), Some(&issues[0].id));

    // The fix really is in the working tree
    let content = fs::read_to_string(dir.path().join("src/app.rs")).unwrap();
    assert!(!content.contains("todo!"));
}

#[tokio::test]
async fn exhausted_retries_end_in_failed_never_pending() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    let provider = Arc::new(MockProvider::new());
    // Two attempts, each ending without a proposed patch
    provider.push_text("I could not find a safe fix.");
    provider.push_text("Still no safe fix.");

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let controller = SessionController::new(
        store.clone(),
        seeded_registry(),
        provider,
        Arc::new(TokioProcessRunner),
        null_sink(),
    );

    let session = controller
        .create_session(dir.path(), "main", config(1))
        .await
        .unwrap();
    let finished = controller.run(&session.id).await.unwrap();

    assert_eq!(finished.status, mender::session::SessionStatus::Completed);
    let issues = store
        .list_issues(IssueFilter::all(session.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues[0].status, IssueStatus::Failed);
    assert_eq!(issues[0].retry_count, 1);
    assert_eq!(finished.counters.failed_issues, 1);
}

#[tokio::test]
async fn skip_marker_ends_issue_as_skipped() {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());

    let provider = Arc::new(MockProvider::new());
    provider.push_text("SKIP: analyzer false positive, the macro is test-only");

    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let controller = SessionController::new(
        store.clone(),
        seeded_registry(),
        provider,
        Arc::new(TokioProcessRunner),
        null_sink(),
    );

    let session = controller
        .create_session(dir.path(), "main", config(2))
        .await
        .unwrap();
    let finished = controller.run(&session.id).await.unwrap();

    let issues = store
        .list_issues(IssueFilter::all(session.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues[0].status, IssueStatus::Skipped);
    assert_eq!(finished.counters.skipped_issues, 1);
    // Skipping is a normal outcome; the session still completes
    assert_eq!(finished.status, mender::session::SessionStatus::Completed);
}

#[derive(Clone, Copy)]
enum Interrupt {
    Stop,
    Deadline,
}

/// Provider that applies a patch on its first call, then interrupts the
/// session before its second call returns, simulating cancellation (or a
/// timeout firing) mid-issue.
struct InterruptingProvider {
    control: Mutex<Option<Arc<ControlHandle>>>,
    calls: AtomicUsize,
    interrupt: Interrupt,
}

impl InterruptingProvider {
    fn new(interrupt: Interrupt) -> Self {
        Self {
            control: Mutex::new(None),
            calls: AtomicUsize::new(0),
            interrupt,
        }
    }
}

#[async_trait]
impl CompletionProvider for InterruptingProvider {
    fn name(&self) -> &str {
        "interrupting"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<Completion> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(write_patch_completion())
        } else {
            if let Some(control) = self.control.lock().unwrap().as_ref() {
                match self.interrupt {
                    Interrupt::Stop => control.request_stop(),
                    Interrupt::Deadline => {
                        control.set_deadline(std::time::Instant::now());
                    }
                }
            }
            Ok(Completion {
                text: String::new(),
                tool_calls: vec![ToolCall {
                    name: "read_file".to_string(),
                    arguments: json!({"path": "src/app.rs"}),
                }],
            })
        }
    }
}

async fn run_interrupted_session(
    interrupt: Interrupt,
) -> (
    tempfile::TempDir,
    String,
    Arc<InMemoryStore>,
    mender::session::Session,
) {
    let dir = tempfile::tempdir().unwrap();
    init_repo(dir.path());
    let original = fs::read_to_string(dir.path().join("src/app.rs")).unwrap();

    let provider = Arc::new(InterruptingProvider::new(interrupt));
    let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
    let controller = SessionController::new(
        store.clone(),
        seeded_registry(),
        provider.clone(),
        Arc::new(TokioProcessRunner),
        null_sink(),
    );
    *provider.control.lock().unwrap() = Some(controller.control());

    let session = controller
        .create_session(dir.path(), "main", config(2))
        .await
        .unwrap();
    let finished = controller.run(&session.id).await.unwrap();
    (dir, original, store, finished)
}

#[tokio::test]
async fn stop_mid_issue_restores_working_copy_and_requeues_issue() {
    let (dir, original, store, finished) = run_interrupted_session(Interrupt::Stop).await;

    assert_eq!(finished.status, mender::session::SessionStatus::Stopped);

    // The in-flight issue went back to the backlog without a retry charge
    let issues = store
        .list_issues(IssueFilter::all(finished.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues[0].status, IssueStatus::Pending);
    assert_eq!(issues[0].retry_count, 0);

    // No partial patch remains
    let content = fs::read_to_string(dir.path().join("src/app.rs")).unwrap();
    assert_eq!(content, original);
    let commits = store.list_commits(&finished.id).await.unwrap();
    assert!(commits.is_empty());
}

#[tokio::test]
async fn timeout_mid_issue_times_out_session_without_partial_patch() {
    let (dir, original, store, finished) = run_interrupted_session(Interrupt::Deadline).await;

    assert_eq!(finished.status, mender::session::SessionStatus::TimedOut);

    let issues = store
        .list_issues(IssueFilter::all(finished.id.clone()))
        .await
        .unwrap();
    assert_eq!(issues[0].status, IssueStatus::Pending);

    let content = fs::read_to_string(dir.path().join("src/app.rs")).unwrap();
    assert_eq!(content, original);
}
