//! Tool executor for the remediation loop
//!
//! Executes the fixed tool catalog on behalf of the model. Every failure
//! is returned as an error-flagged tool result that goes back into the
//! conversation; nothing here aborts the loop. Writes are backed up so a
//! failed attempt can restore the working copy exactly.

use crate::error::{Error, Result};
use crate::llm::ToolCall;
use crate::snapshot::Snapshot;
use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessRunner};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub command_timeout: Duration,
    pub max_list_depth: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(300),
            max_list_depth: 4,
        }
    }
}

/// Result of one tool call, fed back to the model verbatim.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

pub struct ToolExecutor {
    snapshot: Arc<Snapshot>,
    runner: Arc<dyn ProcessRunner>,
    limits: ToolLimits,
    /// Original content of every touched file; `None` marks a created file
    backups: Mutex<BTreeMap<String, Option<String>>>,
    changed: Mutex<BTreeSet<String>>,
}

impl ToolExecutor {
    pub fn new(snapshot: Arc<Snapshot>, runner: Arc<dyn ProcessRunner>, limits: ToolLimits) -> Self {
        Self {
            snapshot,
            runner,
            limits,
            backups: Mutex::new(BTreeMap::new()),
            changed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Execute one tool call. Errors become error-flagged outcomes, never
    /// a crash of the loop.
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let result = match call.name.as_str() {
            "read_file" => self.read_file(call).await,
            "write_patch" => self.write_patch(call).await,
            "list_directory" => self.list_directory(call).await,
            "run_command" => self.run_command(call).await,
            other => Err(Error::Validation(format!("unknown tool '{other}'"))),
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Tool '{}' rejected: {e}", call.name);
                ToolOutcome::error(format!("error: {e}"))
            }
        }
    }

    fn string_arg(call: &ToolCall, key: &str) -> Result<String> {
        call.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Validation(format!("tool argument '{key}' missing")))
    }

    async fn read_file(&self, call: &ToolCall) -> Result<ToolOutcome> {
        let path = Self::string_arg(call, "path")?;
        let content = self.snapshot.read(&path).await?;
        Ok(ToolOutcome::ok(content))
    }

    async fn write_patch(&self, call: &ToolCall) -> Result<ToolOutcome> {
        let path = Self::string_arg(call, "path")?;
        let content = Self::string_arg(call, "content")?;
        let resolved = self.snapshot.resolve(&path)?;

        // First write wins the backup slot; later writes keep the original
        {
            let mut backups = self.backups.lock().await;
            if !backups.contains_key(&path) {
                let original = if resolved.exists() {
                    Some(tokio::fs::read_to_string(&resolved).await?)
                } else {
                    None
                };
                backups.insert(path.clone(), original);
            }
        }

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, &content).await?;
        self.changed.lock().await.insert(path.clone());
        Ok(ToolOutcome::ok(format!(
            "patched {path} ({} bytes)",
            content.len()
        )))
    }

    async fn list_directory(&self, call: &ToolCall) -> Result<ToolOutcome> {
        let path = Self::string_arg(call, "path").unwrap_or_default();
        let depth = call
            .arguments
            .get("depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as usize;
        let entries = self
            .snapshot
            .list(&path, depth.min(self.limits.max_list_depth))?;
        let listing = entries
            .iter()
            .map(|e| {
                if e.is_dir {
                    format!("{}/", e.path)
                } else {
                    format!("{} ({} bytes)", e.path, e.size)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutcome::ok(listing))
    }

    async fn run_command(&self, call: &ToolCall) -> Result<ToolOutcome> {
        let command_line = Self::string_arg(call, "command")?;
        let words = shell_words::split(&command_line)
            .map_err(|e| Error::Validation(format!("unparseable command: {e}")))?;
        let (program, args) = words
            .split_first()
            .ok_or_else(|| Error::Validation("empty command".to_string()))?;

        let output = self
            .runner
            .run(
                ProcessCommandBuilder::new(program)
                    .args(args)
                    .current_dir(self.snapshot.root())
                    .timeout(self.limits.command_timeout)
                    .build(),
            )
            .await?;

        let mut content = String::new();
        if !output.stdout.is_empty() {
            content.push_str(&output.stdout);
        }
        if !output.stderr.is_empty() {
            content.push_str("\n--- stderr ---\n");
            content.push_str(&output.stderr);
        }
        match output.status {
            ExitStatus::Success => Ok(ToolOutcome::ok(content)),
            ExitStatus::Timeout => Ok(ToolOutcome::error(format!(
                "command timed out after {:?}",
                self.limits.command_timeout
            ))),
            ExitStatus::Error(code) => Ok(ToolOutcome::error(format!(
                "exit code {code}\n{content}"
            ))),
        }
    }

    pub async fn changed_files(&self) -> Vec<String> {
        self.changed.lock().await.iter().cloned().collect()
    }

    pub async fn has_changes(&self) -> bool {
        !self.changed.lock().await.is_empty()
    }

    /// Restore every touched file to its pre-attempt content.
    pub async fn revert_changes(&self) -> Result<()> {
        let mut backups = self.backups.lock().await;
        for (path, original) in backups.iter() {
            let resolved = self.snapshot.resolve(path)?;
            match original {
                Some(content) => tokio::fs::write(&resolved, content).await?,
                None => {
                    if resolved.exists() {
                        tokio::fs::remove_file(&resolved).await?;
                    }
                }
            }
            warn!("Reverted working-copy change to {path}");
        }
        backups.clear();
        self.changed.lock().await.clear();
        Ok(())
    }

    /// Forget backups after the changes were committed.
    pub async fn accept_changes(&self) {
        self.backups.lock().await.clear();
        self.changed.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::TokioProcessRunner;
    use serde_json::json;
    use std::fs;

    fn executor(dir: &std::path::Path) -> ToolExecutor {
        let snapshot = Arc::new(Snapshot::capture(dir, Default::default(), &[]).unwrap());
        ToolExecutor::new(snapshot, Arc::new(TokioProcessRunner), ToolLimits::default())
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn traversal_is_rejected_as_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        let executor = executor(dir.path());
        let outcome = executor
            .execute(&call("read_file", json!({"path": "../../etc/passwd"})))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("escapes repository root"));
    }

    #[tokio::test]
    async fn write_then_revert_restores_original() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "original").unwrap();
        let executor = executor(dir.path());

        let outcome = executor
            .execute(&call(
                "write_patch",
                json!({"path": "a.txt", "content": "patched"}),
            ))
            .await;
        assert!(!outcome.is_error);
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "patched");
        assert_eq!(executor.changed_files().await, vec!["a.txt".to_string()]);

        executor.revert_changes().await.unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "original"
        );
        assert!(!executor.has_changes().await);
    }

    #[tokio::test]
    async fn revert_removes_created_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seed.txt"), "s").unwrap();
        let executor = executor(dir.path());
        executor
            .execute(&call(
                "write_patch",
                json!({"path": "new.txt", "content": "fresh"}),
            ))
            .await;
        assert!(dir.path().join("new.txt").exists());
        executor.revert_changes().await.unwrap();
        assert!(!dir.path().join("new.txt").exists());
    }

    #[tokio::test]
    async fn run_command_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seed.txt"), "s").unwrap();
        let executor = executor(dir.path());
        let outcome = executor
            .execute(&call("run_command", json!({"command": "sh -c 'exit 2'"})))
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("exit code 2"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_outcome() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seed.txt"), "s").unwrap();
        let executor = executor(dir.path());
        let outcome = executor.execute(&call("format_disk", json!({}))).await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("unknown tool"));
    }
}
