//! Built-in analyzer seeds
//!
//! Regex signal scans over the snapshot. These keep the registry's
//! built-in set non-empty; rule depth is intentionally minimal and
//! external plugins carry the heavyweight detection.

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::issue::{Category, IssueType, Severity};
use crate::plugin::{Analyzer, AnalyzerManifest, Finding};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb", "c", "h", "cpp", "hpp", "cs",
];

static STUB_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"\b(?:todo|unimplemented)!\s*\(").unwrap(),
            "unfinished macro stub",
        ),
        (
            Regex::new(r"raise\s+NotImplementedError").unwrap(),
            "NotImplementedError stub",
        ),
        (
            Regex::new(r#"throw new Error\(["'](?i:not implemented)"#).unwrap(),
            "not-implemented throw",
        ),
    ]
});

static DEAD_CODE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"#\[allow\(dead_code\)\]").unwrap(),
            "dead_code lint suppressed",
        ),
        (
            Regex::new(r"^\s*//+\s*(?:fn |pub fn |let |if |for |while |return )").unwrap(),
            "commented-out code",
        ),
    ]
});

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|secret|password|auth[_-]?token)\s*[:=]\s*["'][A-Za-z0-9_\-]{12,}["']"#)
        .unwrap()
});

fn is_source_file(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e))
        .unwrap_or(false)
}

/// Scan every source file in the snapshot, line by line, collecting one
/// finding per pattern hit. Unreadable files are skipped, not fatal.
async fn scan_lines<F>(snapshot: &Snapshot, mut on_line: F) -> Result<Vec<Finding>>
where
    F: FnMut(&str, u32, &str, &mut Vec<Finding>),
{
    let mut findings = Vec::new();
    for file in snapshot.files() {
        if !is_source_file(&file.path) {
            continue;
        }
        let content = match snapshot.read(&file.path).await {
            Ok(content) => content,
            Err(_) => continue,
        };
        for (idx, line) in content.lines().enumerate() {
            on_line(&file.path, idx as u32 + 1, line, &mut findings);
        }
    }
    Ok(findings)
}

fn finding(
    issue_type: IssueType,
    severity: Severity,
    category: Category,
    path: &str,
    line_no: u32,
    line: &str,
    message: &str,
) -> Finding {
    Finding {
        issue_type,
        severity,
        category,
        file_path: path.to_string(),
        line: line_no,
        end_line: None,
        column: None,
        message: message.to_string(),
        excerpt: Some(line.trim().to_string()),
        source: String::new(),
    }
}

pub struct StubAnalyzer;

#[async_trait]
impl Analyzer for StubAnalyzer {
    fn name(&self) -> &str {
        "stub"
    }

    fn issue_types(&self) -> Vec<IssueType> {
        vec![IssueType::Stub]
    }

    async fn detect(&self, snapshot: &Snapshot, _config: &AnalysisConfig) -> Result<Vec<Finding>> {
        scan_lines(snapshot, |path, line_no, line, findings| {
            for (pattern, message) in STUB_PATTERNS.iter() {
                if pattern.is_match(line) {
                    findings.push(finding(
                        IssueType::Stub,
                        Severity::Medium,
                        Category::Warning,
                        path,
                        line_no,
                        line,
                        message,
                    ));
                }
            }
        })
        .await
    }
}

pub struct DeadCodeAnalyzer;

#[async_trait]
impl Analyzer for DeadCodeAnalyzer {
    fn name(&self) -> &str {
        "dead_code"
    }

    fn issue_types(&self) -> Vec<IssueType> {
        vec![IssueType::DeadCode]
    }

    async fn detect(&self, snapshot: &Snapshot, _config: &AnalysisConfig) -> Result<Vec<Finding>> {
        scan_lines(snapshot, |path, line_no, line, findings| {
            for (pattern, message) in DEAD_CODE_PATTERNS.iter() {
                if pattern.is_match(line) {
                    findings.push(finding(
                        IssueType::DeadCode,
                        Severity::Low,
                        Category::Suggestion,
                        path,
                        line_no,
                        line,
                        message,
                    ));
                    break;
                }
            }
        })
        .await
    }
}

pub struct SecretAnalyzer;

#[async_trait]
impl Analyzer for SecretAnalyzer {
    fn name(&self) -> &str {
        "security"
    }

    fn issue_types(&self) -> Vec<IssueType> {
        vec![IssueType::Security]
    }

    async fn detect(&self, snapshot: &Snapshot, _config: &AnalysisConfig) -> Result<Vec<Finding>> {
        scan_lines(snapshot, |path, line_no, line, findings| {
            if SECRET_PATTERN.is_match(line) {
                findings.push(finding(
                    IssueType::Security,
                    Severity::High,
                    Category::Error,
                    path,
                    line_no,
                    line,
                    "possible hardcoded credential",
                ));
            }
        })
        .await
    }
}

/// Register the built-in analyzer set into a registry.
pub fn register_builtins(registry: &mut crate::plugin::PluginRegistry) -> Result<()> {
    use crate::plugin::AnalyzerOrigin;

    registry.register(
        AnalyzerManifest::builtin("stub", "Detects unfinished stubs", vec![IssueType::Stub]),
        AnalyzerOrigin::Builtin,
        Arc::new(StubAnalyzer),
    )?;
    registry.register(
        AnalyzerManifest::builtin(
            "dead_code",
            "Detects suppressed or commented-out code",
            vec![IssueType::DeadCode],
        ),
        AnalyzerOrigin::Builtin,
        Arc::new(DeadCodeAnalyzer),
    )?;
    registry.register(
        AnalyzerManifest::builtin(
            "security",
            "Detects hardcoded credentials",
            vec![IssueType::Security],
        ),
        AnalyzerOrigin::Builtin,
        Arc::new(SecretAnalyzer),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn stub_analyzer_finds_todo_macro() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("lib.rs"),
            "fn ready() {}\nfn later() { todo!(\"soon\") }\n",
        )
        .unwrap();
        let snapshot = Snapshot::capture(dir.path(), Default::default(), &[]).unwrap();
        let findings = StubAnalyzer
            .detect(&snapshot, &AnalysisConfig::default())
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 2);
        assert_eq!(findings[0].issue_type, IssueType::Stub);
    }

    #[tokio::test]
    async fn secret_analyzer_flags_hardcoded_key() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.py"),
            "api_key = \"abcd1234efgh5678\"\nname = \"ok\"\n",
        )
        .unwrap();
        let snapshot = Snapshot::capture(dir.path(), Default::default(), &[]).unwrap();
        let findings = SecretAnalyzer
            .detect(&snapshot, &AnalysisConfig::default())
            .await
            .unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn non_source_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "todo!(...)\n").unwrap();
        let snapshot = Snapshot::capture(dir.path(), Default::default(), &[]).unwrap();
        let findings = StubAnalyzer
            .detect(&snapshot, &AnalysisConfig::default())
            .await
            .unwrap();
        assert!(findings.is_empty());
    }
}
