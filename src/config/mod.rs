//! Configuration for remediation sessions
//!
//! Loaded from a TOML file or constructed in code; validated before any
//! side effect.

use crate::error::{Error, Result};
use crate::issue::IssueType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for one remediation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenderConfig {
    /// Completion provider name ("claude", "openai", "ollama", "mock")
    pub provider: String,

    /// Model identifier passed to the provider
    pub model: String,

    /// Remediation attempts per issue before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Wall-clock budget for the whole session, in minutes
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Persist a checkpoint every N processed issues
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Model turns allowed per remediation attempt
    #[serde(default = "default_turn_budget")]
    pub turn_budget: u32,

    /// Corrective retries after a verification failure, within one attempt
    #[serde(default = "default_corrective_retries")]
    pub corrective_retries: u32,

    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub limits: ResourceLimits,
}

/// Analyzer selection and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Issue types to scan for; empty means all types
    #[serde(default)]
    pub analysis_types: Vec<IssueType>,

    /// Glob patterns excluded from the snapshot
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// Parallel analyzer tasks
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Directory scanned for external analyzer plugins
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
}

/// Shell commands run to verify a proposed patch. All optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub test_command: Option<String>,
    pub lint_command: Option<String>,
    pub build_command: Option<String>,

    /// Per-command wall-clock timeout
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            lint_command: None,
            build_command: None,
            command_timeout: default_command_timeout(),
        }
    }
}

/// Size and depth bounds for file access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Largest file the snapshot or tool loop will read
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Maximum directory depth for snapshot and listing
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Byte budget for code context embedded in a prompt
    #[serde(default = "default_context_budget")]
    pub context_byte_budget: usize,
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_minutes() -> u64 {
    60
}

fn default_checkpoint_interval() -> u32 {
    5
}

fn default_turn_budget() -> u32 {
    8
}

fn default_corrective_retries() -> u32 {
    1
}

fn default_exclude() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ]
}

fn default_concurrency() -> usize {
    4
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_file_bytes() -> u64 {
    256 * 1024
}

fn default_max_depth() -> usize {
    16
}

fn default_context_budget() -> usize {
    24 * 1024
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            provider: "claude".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            max_retries: default_max_retries(),
            timeout_minutes: default_timeout_minutes(),
            checkpoint_interval: default_checkpoint_interval(),
            turn_budget: default_turn_budget(),
            corrective_retries: default_corrective_retries(),
            analysis: AnalysisConfig::default(),
            verification: VerificationConfig::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_types: Vec::new(),
            exclude: default_exclude(),
            concurrency: default_concurrency(),
            plugin_dir: None,
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            max_depth: default_max_depth(),
            context_byte_budget: default_context_budget(),
        }
    }
}

impl MenderConfig {
    /// Load and validate configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: MenderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed configuration before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(Error::Validation("provider must not be empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Validation("model must not be empty".to_string()));
        }
        if self.turn_budget == 0 {
            return Err(Error::Validation(
                "turn_budget must be at least 1".to_string(),
            ));
        }
        if self.timeout_minutes == 0 {
            return Err(Error::Validation(
                "timeout_minutes must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Validation(
                "checkpoint_interval must be at least 1".to_string(),
            ));
        }
        if self.analysis.concurrency == 0 {
            return Err(Error::Validation(
                "analysis.concurrency must be at least 1".to_string(),
            ));
        }
        for pattern in &self.analysis.exclude {
            glob::Pattern::new(pattern)?;
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        MenderConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_turn_budget() {
        let config = MenderConfig {
            turn_budget: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn rejects_bad_exclude_pattern() {
        let mut config = MenderConfig::default();
        config.analysis.exclude.push("[".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: MenderConfig = toml::from_str(
            r#"
            provider = "claude"
            model = "claude-sonnet-4-5"

            [verification]
            test_command = "cargo test"
            command_timeout = "2m"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(
            config.verification.command_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(
            config.verification.test_command.as_deref(),
            Some("cargo test")
        );
    }
}
