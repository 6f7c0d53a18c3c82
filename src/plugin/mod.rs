//! Analyzer plugin contract
//!
//! Every defect detector, built-in or externally loaded, implements the
//! [`Analyzer`] trait and carries a validated [`AnalyzerManifest`]. External
//! plugins are discovered from a directory of manifests; a corrupt plugin
//! never aborts discovery of its siblings.

use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::issue::{Category, IssueType, Severity};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod loader;
pub mod registry;

pub use loader::{LoadFailure, LoadReport, PluginLoader};
pub use registry::{PluginRegistry, RegisteredAnalyzer};

/// One raw defect finding, before merge into the issue backlog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub issue_type: IssueType,
    pub severity: Severity,
    pub category: Category,
    pub file_path: String,
    pub line: u32,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    pub message: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    /// Analyzer name; stamped by the orchestrator
    #[serde(default)]
    pub source: String,
}

impl Finding {
    pub fn span(&self) -> (u32, u32) {
        (self.line, self.end_line.unwrap_or(self.line))
    }
}

/// Capability interface shared by all analyzers.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Issue types this analyzer can produce
    fn issue_types(&self) -> Vec<IssueType>;

    async fn detect(&self, snapshot: &Snapshot, config: &AnalysisConfig) -> Result<Vec<Finding>>;
}

/// Where an analyzer came from. Built-ins take precedence on name
/// collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerOrigin {
    Builtin,
    External,
}

/// Manifest describing an analyzer plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerManifest {
    pub name: String,
    pub version: semver::Version,
    #[serde(default)]
    pub description: String,
    pub issue_types: Vec<IssueType>,
    /// Entry point relative to the plugin directory; unused for built-ins
    #[serde(default)]
    pub entry: Option<String>,
}

impl AnalyzerManifest {
    /// Manifest for a built-in analyzer.
    pub fn builtin(name: &str, description: &str, issue_types: Vec<IssueType>) -> Self {
        Self {
            name: name.to_string(),
            version: semver::Version::new(0, 1, 0),
            description: description.to_string(),
            issue_types,
            entry: None,
        }
    }

    pub fn validate(&self, origin: AnalyzerOrigin) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidPlugin(
                "manifest is missing a name".to_string(),
            ));
        }
        if self.issue_types.is_empty() {
            return Err(Error::InvalidPlugin(format!(
                "analyzer '{}' declares no issue types",
                self.name
            )));
        }
        if origin == AnalyzerOrigin::External
            && self.entry.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(Error::InvalidPlugin(format!(
                "analyzer '{}' is missing an entry point",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether this analyzer covers any of the requested types. An empty
    /// request means all types.
    pub fn covers(&self, requested: &[IssueType]) -> bool {
        requested.is_empty() || self.issue_types.iter().any(|t| requested.contains(t))
    }
}

/// Manifest file wrapper (`analyzer.toml` has one `[analyzer]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub analyzer: AnalyzerManifest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_manifest_is_valid() {
        let manifest = AnalyzerManifest::builtin("stub", "finds stubs", vec![IssueType::Stub]);
        manifest.validate(AnalyzerOrigin::Builtin).unwrap();
    }

    #[test]
    fn external_manifest_requires_entry() {
        let manifest = AnalyzerManifest::builtin("x", "", vec![IssueType::Bug]);
        let err = manifest.validate(AnalyzerOrigin::External).unwrap_err();
        assert!(matches!(err, Error::InvalidPlugin(_)));
    }

    #[test]
    fn empty_issue_types_rejected() {
        let manifest = AnalyzerManifest::builtin("x", "", vec![]);
        assert!(manifest.validate(AnalyzerOrigin::Builtin).is_err());
    }

    #[test]
    fn covers_matches_requested_types() {
        let manifest =
            AnalyzerManifest::builtin("stub", "", vec![IssueType::Stub, IssueType::DeadCode]);
        assert!(manifest.covers(&[]));
        assert!(manifest.covers(&[IssueType::Stub]));
        assert!(!manifest.covers(&[IssueType::Security]));
    }

    #[test]
    fn manifest_parses_from_toml() {
        let file: ManifestFile = toml::from_str(
            r#"
            [analyzer]
            name = "eslint-bridge"
            version = "0.3.1"
            description = "Runs eslint and maps diagnostics"
            issue_types = ["lint_error"]
            entry = "run.sh"
            "#,
        )
        .unwrap();
        assert_eq!(file.analyzer.name, "eslint-bridge");
        assert_eq!(file.analyzer.version, semver::Version::new(0, 3, 1));
        file.analyzer.validate(AnalyzerOrigin::External).unwrap();
    }
}
