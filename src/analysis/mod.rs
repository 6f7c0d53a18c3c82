//! Analysis orchestration
//!
//! Fans enabled analyzers out over a shared snapshot, isolates per-analyzer
//! failures, merges duplicate findings, and reports progress. Re-running
//! against an unchanged tree yields the same merged set in the same order.

use crate::config::MenderConfig;
use crate::error::Result;
use crate::issue::spans_overlap;
use crate::plugin::{Finding, PluginRegistry};
use crate::snapshot::{Snapshot, SnapshotLimits};
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub mod builtins;

pub use builtins::register_builtins;

/// Progress callback phases, in emission order per analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisPhase {
    AnalyzerStarted,
    AnalyzerCompleted,
    MergeCompleted,
}

#[derive(Debug, Clone)]
pub struct AnalysisProgress {
    pub phase: AnalysisPhase,
    pub completed: usize,
    pub total: usize,
    pub analyzer: Option<String>,
}

pub type ProgressCallback = Arc<dyn Fn(AnalysisProgress) + Send + Sync>;

/// Failure of a single analyzer, surfaced as a warning instead of aborting
/// the run.
#[derive(Debug, Clone)]
pub struct AnalyzerWarning {
    pub analyzer: String,
    pub error: String,
}

#[derive(Default)]
pub struct AnalysisResult {
    pub findings: Vec<Finding>,
    pub warnings: Vec<AnalyzerWarning>,
    pub analyzers_run: usize,
}

pub struct AnalysisOrchestrator {
    registry: Arc<PluginRegistry>,
}

impl AnalysisOrchestrator {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Run every enabled analyzer against a fresh snapshot of the
    /// repository and merge the findings.
    pub async fn analyze(
        &self,
        repository_path: &Path,
        config: &MenderConfig,
        progress: Option<ProgressCallback>,
    ) -> Result<AnalysisResult> {
        let snapshot = Arc::new(Snapshot::capture(
            repository_path,
            SnapshotLimits {
                max_file_bytes: config.limits.max_file_bytes,
                max_depth: config.limits.max_depth,
            },
            &config.analysis.exclude,
        )?);

        let analyzers = self.registry.list_for(&config.analysis.analysis_types);
        let total = analyzers.len();
        let completed = Arc::new(AtomicUsize::new(0));
        debug!("Running {} analyzers over {:?}", total, repository_path);

        let runs: Vec<(String, Result<Vec<Finding>>)> = stream::iter(analyzers)
            .map(|entry| {
                let snapshot = Arc::clone(&snapshot);
                let analysis_config = config.analysis.clone();
                let progress = progress.clone();
                let completed = Arc::clone(&completed);
                async move {
                    let name = entry.manifest.name.clone();
                    if let Some(ref cb) = progress {
                        cb(AnalysisProgress {
                            phase: AnalysisPhase::AnalyzerStarted,
                            completed: completed.load(Ordering::SeqCst),
                            total,
                            analyzer: Some(name.clone()),
                        });
                    }
                    let result = entry.analyzer.detect(&snapshot, &analysis_config).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref cb) = progress {
                        cb(AnalysisProgress {
                            phase: AnalysisPhase::AnalyzerCompleted,
                            completed: done,
                            total,
                            analyzer: Some(name.clone()),
                        });
                    }
                    (name, result)
                }
            })
            .buffer_unordered(config.analysis.concurrency.max(1))
            .collect()
            .await;

        let mut all_findings = Vec::new();
        let mut warnings = Vec::new();
        for (name, result) in runs {
            match result {
                Ok(mut findings) => {
                    for finding in &mut findings {
                        finding.source = name.clone();
                    }
                    all_findings.extend(findings);
                }
                Err(e) => {
                    warn!("Analyzer '{}' failed: {e}", name);
                    warnings.push(AnalyzerWarning {
                        analyzer: name,
                        error: e.to_string(),
                    });
                }
            }
        }

        let findings = merge_findings(all_findings);
        if let Some(ref cb) = progress {
            cb(AnalysisProgress {
                phase: AnalysisPhase::MergeCompleted,
                completed: total,
                total,
                analyzer: None,
            });
        }

        Ok(AnalysisResult {
            findings,
            warnings,
            analyzers_run: total,
        })
    }
}

/// Merge duplicate findings: same file, same type, overlapping line range.
/// The highest-severity contributor wins the message; spans are unioned.
/// Output ordering is stable regardless of analyzer completion order:
/// file path ascending, then line, then severity descending.
pub fn merge_findings(mut findings: Vec<Finding>) -> Vec<Finding> {
    // Canonical input order makes the merge independent of arrival order.
    findings.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.line.cmp(&b.line))
            .then(b.severity.cmp(&a.severity))
            .then(a.source.cmp(&b.source))
            .then(a.message.cmp(&b.message))
    });

    let mut merged: Vec<Finding> = Vec::new();
    for finding in findings {
        if let Some(existing) = merged.iter_mut().find(|m| {
            m.file_path == finding.file_path
                && m.issue_type == finding.issue_type
                && spans_overlap(m.span(), finding.span())
        }) {
            let union_start = existing.line.min(finding.line);
            let union_end = existing.span().1.max(finding.span().1);
            if finding.severity > existing.severity {
                existing.severity = finding.severity;
                existing.category = finding.category;
                existing.message = finding.message;
                existing.excerpt = finding.excerpt;
                existing.source = finding.source;
            }
            existing.line = union_start;
            existing.end_line = if union_end > union_start {
                Some(union_end)
            } else {
                None
            };
        } else {
            merged.push(finding);
        }
    }

    merged.sort_by(|a, b| {
        a.file_path
            .cmp(&b.file_path)
            .then(a.line.cmp(&b.line))
            .then(b.severity.cmp(&a.severity))
    });
    merged
}
