//! External plugin discovery
//!
//! Scans a directory for `analyzer.toml` manifests. Loading is
//! side-effect-free until the caller registers the result; a corrupt
//! plugin is collected as a failure and never aborts its siblings.

use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::issue::IssueType;
use crate::snapshot::Snapshot;
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Analyzer, AnalyzerManifest, Finding, ManifestFile};

const MANIFEST_NAME: &str = "analyzer.toml";
const PLUGIN_TIMEOUT: Duration = Duration::from_secs(120);

/// One plugin that failed to load.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of a discovery pass.
#[derive(Default)]
pub struct LoadReport {
    pub loaded: Vec<(AnalyzerManifest, Arc<dyn Analyzer>)>,
    pub failed: Vec<LoadFailure>,
}

pub struct PluginLoader {
    runner: Arc<dyn ProcessRunner>,
}

impl PluginLoader {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Discover plugins under `dir`, one subdirectory per plugin.
    pub async fn discover(&self, dir: &Path) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        if !dir.exists() {
            return Ok(report);
        }

        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.load_plugin(&path).await {
                Ok((manifest, analyzer)) => {
                    debug!("Loaded plugin '{}' from {:?}", manifest.name, path);
                    report.loaded.push((manifest, analyzer));
                }
                Err(e) => {
                    warn!("Skipping plugin at {:?}: {e}", path);
                    report.failed.push(LoadFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Parse and validate one plugin directory without registering it.
    pub async fn load_plugin(
        &self,
        plugin_dir: &Path,
    ) -> Result<(AnalyzerManifest, Arc<dyn Analyzer>)> {
        let manifest_path = plugin_dir.join(MANIFEST_NAME);
        let content = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| Error::InvalidPlugin(format!("cannot read {manifest_path:?}: {e}")))?;

        let file: ManifestFile = toml::from_str(&content)
            .map_err(|e| Error::InvalidPlugin(format!("malformed manifest: {e}")))?;
        let manifest = file.analyzer;
        manifest.validate(super::AnalyzerOrigin::External)?;

        let entry = plugin_dir.join(manifest.entry.as_deref().unwrap_or_default());
        if !entry.exists() {
            return Err(Error::InvalidPlugin(format!(
                "entry point {entry:?} does not exist"
            )));
        }

        let analyzer = Arc::new(ExternalAnalyzer {
            manifest: manifest.clone(),
            entry,
            runner: Arc::clone(&self.runner),
        });
        Ok((manifest, analyzer))
    }
}

/// Analyzer backed by an external executable. The entry point receives the
/// repository root as its sole argument and prints a JSON array of findings
/// on stdout.
struct ExternalAnalyzer {
    manifest: AnalyzerManifest,
    entry: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

#[async_trait]
impl Analyzer for ExternalAnalyzer {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn issue_types(&self) -> Vec<IssueType> {
        self.manifest.issue_types.clone()
    }

    async fn detect(&self, snapshot: &Snapshot, _config: &AnalysisConfig) -> Result<Vec<Finding>> {
        let command = ProcessCommandBuilder::new(&self.entry.to_string_lossy())
            .arg(&snapshot.root().to_string_lossy())
            .current_dir(snapshot.root())
            .timeout(PLUGIN_TIMEOUT)
            .build();

        let output = self.runner.run(command).await?;
        if !output.success() {
            return Err(Error::InvalidPlugin(format!(
                "analyzer '{}' exited with {:?}: {}",
                self.manifest.name,
                output.status.code(),
                output.stderr.trim()
            )));
        }

        let findings: Vec<Finding> = serde_json::from_str(&output.stdout).map_err(|e| {
            Error::InvalidPlugin(format!(
                "analyzer '{}' produced invalid findings JSON: {e}",
                self.manifest.name
            ))
        })?;
        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::TokioProcessRunner;
    use std::fs;

    fn write_plugin(dir: &Path, name: &str, manifest: &str, script: Option<&str>) {
        let plugin_dir = dir.join(name);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join(MANIFEST_NAME), manifest).unwrap();
        if let Some(script) = script {
            let entry = plugin_dir.join("run.sh");
            fs::write(&entry, script).unwrap();
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&entry, fs::Permissions::from_mode(0o755)).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn corrupt_plugin_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(
            dir.path(),
            "good",
            r#"
            [analyzer]
            name = "good"
            version = "1.0.0"
            issue_types = ["lint_error"]
            entry = "run.sh"
            "#,
            Some("#!/bin/sh\necho '[]'\n"),
        );
        write_plugin(dir.path(), "bad", "not even toml [[", None);

        let loader = PluginLoader::new(Arc::new(TokioProcessRunner));
        let report = loader.discover(dir.path()).await.unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.loaded[0].0.name, "good");
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].error.contains("malformed manifest"));
    }

    #[tokio::test]
    async fn missing_entry_point_is_a_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(
            dir.path(),
            "no-entry",
            r#"
            [analyzer]
            name = "no-entry"
            version = "1.0.0"
            issue_types = ["bug"]
            entry = "run.sh"
            "#,
            None,
        );
        let loader = PluginLoader::new(Arc::new(TokioProcessRunner));
        let report = loader.discover(dir.path()).await.unwrap();
        assert!(report.loaded.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn external_analyzer_parses_findings_json() {
        let dir = tempfile::tempdir().unwrap();
        let findings = r#"[{"issue_type":"lint_error","severity":"medium","category":"warning","file_path":"src/lib.rs","line":3,"message":"unused import"}]"#;
        write_plugin(
            dir.path(),
            "jsonout",
            r#"
            [analyzer]
            name = "jsonout"
            version = "1.0.0"
            issue_types = ["lint_error"]
            entry = "run.sh"
            "#,
            Some(&format!("#!/bin/sh\necho '{findings}'\n")),
        );

        let repo = tempfile::tempdir().unwrap();
        fs::write(repo.path().join("x.rs"), "fn main() {}\n").unwrap();
        let snapshot = Snapshot::capture(repo.path(), Default::default(), &[]).unwrap();

        let loader = PluginLoader::new(Arc::new(TokioProcessRunner));
        let (_, analyzer) = loader.load_plugin(&dir.path().join("jsonout")).await.unwrap();
        let found = analyzer
            .detect(&snapshot, &AnalysisConfig::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].file_path, "src/lib.rs");
        assert_eq!(found[0].line, 3);
    }
}
