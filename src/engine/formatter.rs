use crate::engine::patch::render_edit_blocks;
use crate::engine::types::{
    AlgorithmResult, CodeResult, CodingOutput, ComplexityAnalysis, Intent, ToolResult,
};

const PREVIEW_CHARS: usize = 400;

fn preview_text(s: &str) -> String {
    if s.chars().count() <= PREVIEW_CHARS {
        return s.to_string();
    }
    let truncated: String = s.chars().take(PREVIEW_CHARS).collect();
    format!("{truncated}... (truncated, {} chars total)", s.chars().count())
}

fn fence_tag(language: Option<&str>) -> &str {
    language.unwrap_or("text")
}

pub fn fence(content: &str, language: Option<&str>) -> String {
    format!("```{}\n{}\n```", fence_tag(language), content)
}

/// One line per `(tool, action)` pair, summarizing `ToolResult` the way the
/// underlying command actually behaved rather than dumping raw JSON.
pub fn format_tool_result(result: &ToolResult) -> String {
    if !result.success {
        let err = result.error.as_deref().unwrap_or("unknown error");
        return format!("{}.{} failed: {err}", result.tool, result.action);
    }

    match (result.tool.as_str(), result.action.as_str()) {
        ("git", "status") => {
            let bucket = |key: &str| -> Vec<String> {
                result
                    .output
                    .get(key)
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_default()
            };
            let (staged, modified, untracked) = (bucket("staged"), bucket("modified"), bucket("untracked"));
            if staged.is_empty() && modified.is_empty() && untracked.is_empty() {
                "Working directory is clean".to_string()
            } else {
                let mut lines = Vec::new();
                if !staged.is_empty() {
                    lines.push(format!("staged:\n{}", staged.iter().map(|p| format!("  {p}")).collect::<Vec<_>>().join("\n")));
                }
                if !modified.is_empty() {
                    lines.push(format!("modified:\n{}", modified.iter().map(|p| format!("  {p}")).collect::<Vec<_>>().join("\n")));
                }
                if !untracked.is_empty() {
                    lines.push(format!("untracked:\n{}", untracked.iter().map(|p| format!("  {p}")).collect::<Vec<_>>().join("\n")));
                }
                lines.join("\n")
            }
        }
        ("git", "commit") => {
            let sha = result.output.get("sha").and_then(|v| v.as_str()).unwrap_or("?");
            format!("committed {sha}")
        }
        ("file", "read") => {
            let content = result.output.get("content").and_then(|v| v.as_str()).unwrap_or("");
            preview_text(content)
        }
        ("file", "write") => {
            let path = result.output.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            let bytes = result.output.get("bytes_written").and_then(|v| v.as_u64()).unwrap_or(0);
            format!("wrote {bytes} bytes to {path}")
        }
        ("file", "list") => {
            let entries = result.output.get("entries").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let names: Vec<String> = entries
                .iter()
                .map(|e| {
                    let name = e.get("name").and_then(|v| v.as_str()).unwrap_or("?");
                    if e.get("is_dir").and_then(|v| v.as_bool()).unwrap_or(false) { format!("{name}/") } else { name.to_string() }
                })
                .collect();
            names.join("\n")
        }
        ("file", "delete") => {
            let path = result.output.get("path").and_then(|v| v.as_str()).unwrap_or("?");
            format!("deleted {path}")
        }
        ("sqlite", "schema") => preview_text(&result.output.to_string()),
        ("sqlite", "query") => {
            let rows = result.output.get("rows").and_then(|v| v.as_array()).map(|r| r.len());
            match rows {
                Some(n) => format!("{n} row(s) returned"),
                None => preview_text(&result.output.to_string()),
            }
        }
        _ => preview_text(&result.output.to_string()),
    }
}

pub fn format_complexity(analysis: &ComplexityAnalysis) -> String {
    format!("time: {}, space: {}", analysis.time, analysis.space)
}

fn format_files(files: &std::collections::HashMap<String, String>) -> String {
    files
        .iter()
        .map(|(path, content)| {
            let lang = path.rsplit('.').next();
            format!("`{path}`\n{}", fence(content, lang))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_code_result(result: &CodeResult) -> String {
    if !result.success {
        return format!("code generation failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    match &result.output {
        CodingOutput::Files(files) => format_files(files),
        CodingOutput::Edits { blocks, needs_algorithm_specialist } => {
            let rendered = render_edit_blocks(blocks);
            if *needs_algorithm_specialist {
                format!("{rendered}\n(escalating to the algorithm specialist for this change)")
            } else {
                rendered
            }
        }
    }
}

pub fn format_algorithm_result(result: &AlgorithmResult) -> String {
    if !result.success {
        return format!("algorithm generation failed: {}", result.error.as_deref().unwrap_or("unknown error"));
    }
    format!(
        "{}\n\nComplexity: {}\n\n{}",
        format_files(&result.files),
        format_complexity(&result.complexity_analysis),
        result.rationale
    )
}

/// When the router lands on `Unknown` or below threshold, the user is
/// asked to disambiguate between the two most plausible intents rather
/// than being told "I don't understand".
pub fn format_clarification(utterance: &str, candidates: &[(Intent, f32)]) -> String {
    let mut ranked: Vec<&(Intent, f32)> = candidates.iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_two: Vec<String> = ranked.iter().take(2).map(|(intent, conf)| format!("{intent:?} ({:.0}%)", conf * 100.0)).collect();
    format!(
        "I'm not confident how to handle: \"{utterance}\".\nDid you mean one of: {}?",
        top_two.join(" or ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_tool_result_reports_the_error_not_the_payload() {
        let result = ToolResult {
            tool: "shell".to_string(),
            action: "run".to_string(),
            success: false,
            output: serde_json::Value::Null,
            error: Some("forbidden pattern".to_string()),
        };
        assert_eq!(format_tool_result(&result), "shell.run failed: forbidden pattern");
    }

    #[test]
    fn clean_git_status_is_reported_plainly() {
        let result = ToolResult {
            tool: "git".to_string(),
            action: "status".to_string(),
            success: true,
            output: json!({ "staged": [], "modified": [], "untracked": [] }),
            error: None,
        };
        assert_eq!(format_tool_result(&result), "Working directory is clean");
    }

    #[test]
    fn dirty_git_status_lists_each_bucket() {
        let result = ToolResult {
            tool: "git".to_string(),
            action: "status".to_string(),
            success: true,
            output: json!({ "staged": ["a.rs"], "modified": [], "untracked": ["b.rs"] }),
            error: None,
        };
        let formatted = format_tool_result(&result);
        assert!(formatted.contains("staged:\n  a.rs"));
        assert!(formatted.contains("untracked:\n  b.rs"));
        assert!(!formatted.contains("modified:"));
    }

    #[test]
    fn long_file_read_is_truncated_with_a_total_char_count() {
        let content = "x".repeat(1000);
        let result = ToolResult {
            tool: "file".to_string(),
            action: "read".to_string(),
            success: true,
            output: json!({ "content": content }),
            error: None,
        };
        let formatted = format_tool_result(&result);
        assert!(formatted.contains("truncated, 1000 chars total"));
    }

    #[test]
    fn clarification_lists_exactly_the_top_two_candidates_by_confidence() {
        let candidates = vec![
            (Intent::ToolCall, 0.4),
            (Intent::CodingTask, 0.6),
            (Intent::SimpleAnswer, 0.2),
        ];
        let msg = format_clarification("do the thing", &candidates);
        assert!(msg.contains("CodingTask"));
        assert!(msg.contains("ToolCall"));
        assert!(!msg.contains("SimpleAnswer"));
    }
}
