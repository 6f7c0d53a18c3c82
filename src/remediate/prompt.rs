//! Prompt assembly and context compression
//!
//! Over-budget source context is compressed by stripping comments first,
//! then hard-truncated with an explicit marker. Content is never silently
//! corrupted: the flags on [`CompressedContext`] say what happened.

use crate::issue::Issue;
use crate::llm::ToolSpec;
use serde_json::json;

pub const TRUNCATION_MARKER: &str = "[truncated]";
pub const SKIP_PREFIX: &str = "SKIP:";

#[derive(Debug, Clone)]
pub struct CompressedContext {
    pub content: String,
    pub compressed: bool,
    pub truncated: bool,
}

/// Fit source text into a byte budget. Comments go first; only if the
/// stripped text still exceeds the budget is it truncated, with a marker.
pub fn compress_source(content: &str, budget_bytes: usize) -> CompressedContext {
    if content.len() <= budget_bytes {
        return CompressedContext {
            content: content.to_string(),
            compressed: false,
            truncated: false,
        };
    }

    let stripped = strip_comments(content);
    if stripped.len() <= budget_bytes {
        return CompressedContext {
            content: stripped,
            compressed: true,
            truncated: false,
        };
    }

    let mut cut = budget_bytes.saturating_sub(TRUNCATION_MARKER.len() + 1);
    while cut > 0 && !stripped.is_char_boundary(cut) {
        cut -= 1;
    }
    CompressedContext {
        content: format!("{}\n{}", &stripped[..cut], TRUNCATION_MARKER),
        compressed: true,
        truncated: true,
    }
}

/// Remove comment-only lines and block comment spans, keeping code lines
/// and their positions readable.
pub fn strip_comments(content: &str) -> String {
    let mut out = Vec::new();
    let mut in_block = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if in_block {
            if let Some(end) = line.find("*/") {
                in_block = false;
                let rest = line[end + 2..].trim();
                if !rest.is_empty() {
                    out.push(line[end + 2..].to_string());
                }
            }
            continue;
        }
        if trimmed.starts_with("/*") {
            if !trimmed.contains("*/") {
                in_block = true;
            }
            continue;
        }
        if trimmed.starts_with("//") || trimmed.starts_with('#') && !trimmed.starts_with("#[") {
            continue;
        }
        if let Some(pos) = line.find("//") {
            let code = line[..pos].trim_end();
            if !code.is_empty() {
                out.push(code.to_string());
                continue;
            }
            continue;
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

/// System prompt establishing the fix protocol.
pub fn system_prompt() -> String {
    [
        "You are an automated code-repair agent working inside one repository.",
        "Fix exactly the reported issue. Use the tools to inspect files, apply",
        "a patch with write_patch, and check your work with run_command.",
        "When your patch is complete, reply WITHOUT tool calls and summarize the fix.",
        "If the finding is a false positive or cannot be acted on, reply with a",
        "single line starting with 'SKIP:' followed by the reason.",
    ]
    .join(" ")
}

/// Per-issue user prompt with the bounded code context inlined.
pub fn build_issue_prompt(issue: &Issue, context: &CompressedContext) -> String {
    let mut prompt = format!(
        "Issue [{}/{:?}] in {} at line {}: {}\n",
        issue.issue_type, issue.severity, issue.file_path, issue.line, issue.message
    );
    if let Some(excerpt) = &issue.excerpt {
        prompt.push_str(&format!("Flagged code: {excerpt}\n"));
    }
    let mut label = String::from("File content");
    if context.compressed {
        label.push_str(" (comments stripped)");
    }
    if context.truncated {
        label.push_str(" (truncated to fit budget)");
    }
    prompt.push_str(&format!(
        "\n{label} of {}:\n```\n{}\n```\n",
        issue.file_path, context.content
    ));
    prompt
}

/// The fixed tool catalog exposed to the model.
pub fn tool_catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read a file from the repository".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to the repository root"}
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: "write_patch".to_string(),
            description: "Replace the full content of a file with patched content".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: "list_directory".to_string(),
            description: "List files under a directory".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "depth": {"type": "integer", "minimum": 1}
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: "run_command".to_string(),
            description: "Run a shell command in the repository root".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"}
                },
                "required": ["command"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "\
// leading comment
fn alpha() -> u32 {
    // explain
    41 + 1 // trailing
}

/* block
   comment */
fn beta() {}
";

    #[test]
    fn under_budget_is_untouched() {
        let ctx = compress_source(SOURCE, 10_000);
        assert!(!ctx.compressed);
        assert!(!ctx.truncated);
        assert_eq!(ctx.content, SOURCE);
    }

    #[test]
    fn comment_stripping_keeps_code_intact() {
        let ctx = compress_source(SOURCE, SOURCE.len() - 1);
        assert!(ctx.compressed);
        assert!(!ctx.truncated);
        assert!(!ctx.content.contains("leading comment"));
        assert!(!ctx.content.contains("explain"));
        assert!(!ctx.content.contains("trailing"));
        assert!(!ctx.content.contains("block"));
        assert!(ctx.content.contains("fn alpha() -> u32 {"));
        assert!(ctx.content.contains("41 + 1"));
        assert!(ctx.content.contains("fn beta() {}"));
    }

    #[test]
    fn truncation_adds_explicit_marker() {
        let ctx = compress_source(SOURCE, 30);
        assert!(ctx.compressed);
        assert!(ctx.truncated);
        assert!(ctx.content.ends_with(TRUNCATION_MARKER));
        assert!(ctx.content.len() <= 30);
    }

    #[test]
    fn catalog_has_the_four_fixed_tools() {
        let names: Vec<String> = tool_catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["read_file", "write_patch", "list_directory", "run_command"]
        );
    }
}
