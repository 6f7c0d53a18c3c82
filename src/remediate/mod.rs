//! LLM remediation loop
//!
//! Per issue, drives a bounded conversational loop against the abstract
//! completion capability: inspect files through the tool executor, apply a
//! patch, verify it with the project's own commands, then commit or back
//! out. Every attempt leaves the working copy either committed or exactly
//! as it was found.

use crate::config::MenderConfig;
use crate::error::{Error, Result};
use crate::git::{CommitManager, CommitOptions, CommitRecord};
use crate::issue::Issue;
use crate::llm::{Completion, CompletionProvider, CompletionRequest, Message};
use crate::session::ControlHandle;
use crate::snapshot::{Snapshot, SnapshotLimits};
use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessRunner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub mod prompt;
pub mod tools;

pub use prompt::{build_issue_prompt, compress_source, CompressedContext};
pub use tools::{ToolExecutor, ToolLimits, ToolOutcome};

/// Outcome of one remediation attempt. Retry accounting and issue status
/// transitions belong to the session controller.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Resolved { commit: CommitRecord },
    AttemptFailed { reason: String },
    Skipped { reason: String },
    /// Session was stopped or timed out mid-attempt; working copy restored
    Aborted,
}

/// Loop phases, for tracing and reasoning about suspension points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    AwaitingModel,
    ExecutingTool,
    Verifying,
    Done,
}

#[derive(Debug, Default)]
struct VerificationReport {
    failures: Vec<(String, String)>,
}

impl VerificationReport {
    fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    fn feedback(&self) -> String {
        let mut out = String::from("Verification failed.\n");
        for (label, output) in &self.failures {
            out.push_str(&format!("--- {label} ---\n{output}\n"));
        }
        out.push_str("The patch was reverted. Propose a corrected patch.");
        out
    }
}

pub struct RemediationLoop {
    provider: Arc<dyn CompletionProvider>,
    runner: Arc<dyn ProcessRunner>,
    commits: Arc<CommitManager>,
    control: Arc<ControlHandle>,
    config: MenderConfig,
    repo_root: PathBuf,
}

impl RemediationLoop {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        runner: Arc<dyn ProcessRunner>,
        commits: Arc<CommitManager>,
        control: Arc<ControlHandle>,
        config: MenderConfig,
        repo_root: PathBuf,
    ) -> Self {
        Self {
            provider,
            runner,
            commits,
            control,
            config,
            repo_root,
        }
    }

    /// Process one issue through a bounded agent loop.
    pub async fn process(&self, issue: &Issue) -> Result<AttemptOutcome> {
        let snapshot = Arc::new(Snapshot::capture(
            &self.repo_root,
            SnapshotLimits {
                max_file_bytes: self.config.limits.max_file_bytes,
                max_depth: self.config.limits.max_depth,
            },
            &self.config.analysis.exclude,
        )?);

        // The finding may be stale: file deleted or renamed since detection.
        if !snapshot.contains(&issue.file_path) {
            return Ok(AttemptOutcome::Skipped {
                reason: format!("{} no longer exists", issue.file_path),
            });
        }

        let source = match snapshot.read(&issue.file_path).await {
            Ok(source) => source,
            Err(Error::FileTooLarge { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        let context = compress_source(&source, self.config.limits.context_byte_budget);

        let executor = ToolExecutor::new(
            Arc::clone(&snapshot),
            Arc::clone(&self.runner),
            ToolLimits {
                command_timeout: self.config.verification.command_timeout,
                max_list_depth: self.config.limits.max_depth,
            },
        );

        let mut messages = vec![Message::user(build_issue_prompt(issue, &context))];
        let mut corrective_retries_left = self.config.corrective_retries;

        for turn in 0..self.config.turn_budget {
            if self.control.should_stop() {
                executor.revert_changes().await?;
                return Ok(AttemptOutcome::Aborted);
            }

            debug!(
                "Issue {} turn {}/{} state {:?}",
                issue.id,
                turn,
                self.config.turn_budget,
                LoopState::AwaitingModel
            );

            let completion = match self.complete(&messages).await {
                Ok(completion) => completion,
                Err(e) => {
                    // A provider failure spends the attempt, not the session.
                    executor.revert_changes().await?;
                    return Ok(AttemptOutcome::AttemptFailed {
                        reason: format!("provider error: {e}"),
                    });
                }
            };

            if !completion.tool_calls.is_empty() {
                debug!("Issue {} state {:?}", issue.id, LoopState::ExecutingTool);
                messages.push(Message::assistant(render_assistant_turn(&completion)));
                for call in &completion.tool_calls {
                    if self.control.should_stop() {
                        executor.revert_changes().await?;
                        return Ok(AttemptOutcome::Aborted);
                    }
                    let outcome = executor.execute(call).await;
                    messages.push(Message::tool(format!(
                        "[{}] {}",
                        call.name, outcome.content
                    )));
                }
                continue;
            }

            // Terminal action from the model
            let text = completion.text.trim();
            if text
                .to_uppercase()
                .starts_with(prompt::SKIP_PREFIX.trim_end_matches(':'))
            {
                executor.revert_changes().await?;
                let reason = text
                    .splitn(2, ':')
                    .nth(1)
                    .map(str::trim)
                    .unwrap_or("not actionable")
                    .to_string();
                return Ok(AttemptOutcome::Skipped { reason });
            }

            if !executor.has_changes().await {
                return Ok(AttemptOutcome::AttemptFailed {
                    reason: "model finished without proposing a patch".to_string(),
                });
            }

            debug!("Issue {} state {:?}", issue.id, LoopState::Verifying);
            let report = self.run_verification().await?;
            if report.passed() {
                let changed = executor.changed_files().await;
                let result = self
                    .commits
                    .commit(CommitOptions {
                        message: commit_message(issue),
                        files: Some(changed),
                        issue_id: Some(issue.id.clone()),
                        ..Default::default()
                    })
                    .await;
                return if result.success {
                    executor.accept_changes().await;
                    debug!("Issue {} state {:?}", issue.id, LoopState::Done);
                    let commit = result.commit.expect("successful commit carries a record");
                    info!("Issue {} resolved in commit {}", issue.id, commit.hash);
                    Ok(AttemptOutcome::Resolved { commit })
                } else {
                    executor.revert_changes().await?;
                    Ok(AttemptOutcome::AttemptFailed {
                        reason: result
                            .error
                            .unwrap_or_else(|| "commit failed".to_string()),
                    })
                };
            }

            warn!("Verification failed for issue {}", issue.id);
            executor.revert_changes().await?;
            if corrective_retries_left == 0 {
                return Ok(AttemptOutcome::AttemptFailed {
                    reason: "verification failed after corrective retry".to_string(),
                });
            }
            corrective_retries_left -= 1;
            messages.push(Message::assistant(completion.text.clone()));
            messages.push(Message::user(report.feedback()));
        }

        // Turn budget exhausted: a failed attempt, not a crash.
        executor.revert_changes().await?;
        Ok(AttemptOutcome::AttemptFailed {
            reason: format!("turn budget of {} exhausted", self.config.turn_budget),
        })
    }

    async fn complete(&self, messages: &[Message]) -> Result<Completion> {
        self.provider
            .complete(CompletionRequest {
                model: self.config.model.clone(),
                system: prompt::system_prompt(),
                messages: messages.to_vec(),
                tools: prompt::tool_catalog(),
            })
            .await
    }

    /// Run the configured verification commands; exit code 0 is a pass.
    async fn run_verification(&self) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        let checks = [
            ("test", &self.config.verification.test_command),
            ("lint", &self.config.verification.lint_command),
            ("build", &self.config.verification.build_command),
        ];
        for (label, command) in checks {
            let Some(command) = command else { continue };
            let words = shell_words::split(command)
                .map_err(|e| Error::Validation(format!("bad {label} command: {e}")))?;
            let Some((program, args)) = words.split_first() else {
                continue;
            };
            let output = self
                .runner
                .run(
                    ProcessCommandBuilder::new(program)
                        .args(args)
                        .current_dir(&self.repo_root)
                        .timeout(self.config.verification.command_timeout)
                        .build(),
                )
                .await?;
            match output.status {
                ExitStatus::Success => {}
                ExitStatus::Timeout => {
                    report.failures.push((
                        label.to_string(),
                        format!(
                            "timed out after {:?}",
                            self.config.verification.command_timeout
                        ),
                    ));
                }
                ExitStatus::Error(code) => {
                    report.failures.push((
                        label.to_string(),
                        format!("exit {code}\n{}\n{}", output.stdout, output.stderr),
                    ));
                }
            }
        }
        Ok(report)
    }
}

fn render_assistant_turn(completion: &Completion) -> String {
    let calls = completion
        .tool_calls
        .iter()
        .map(|c| format!("{}({})", c.name, c.arguments))
        .collect::<Vec<_>>()
        .join(", ");
    if completion.text.is_empty() {
        format!("[tool calls: {calls}]")
    } else {
        format!("{}\n[tool calls: {calls}]", completion.text)
    }
}

fn commit_message(issue: &Issue) -> String {
    let mut summary = issue.message.clone();
    if summary.len() > 72 {
        summary.truncate(69);
        summary.push_str("...");
    }
    format!("fix({}): {} in {}", issue.issue_type, summary, issue.file_path)
}
