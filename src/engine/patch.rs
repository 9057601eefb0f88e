use crate::engine::types::EditBlock;
use regex::Regex;
use std::sync::OnceLock;

/// Instructs the engine to reply with numbered `EDIT i:` blocks carrying
/// `Lines: a-b`, `Old: ...`, `New: ...`, `Description: ...`.
pub fn build_edit_prompt(path: &str, existing: &str, instructions: &str) -> String {
    let numbered: String = existing
        .lines()
        .enumerate()
        .map(|(i, line)| format!("{:>5} | {}\n", i + 1, line))
        .collect();

    format!(
        "You are editing the file `{path}`. Apply the following instructions by \
         replying with one or more numbered edit blocks in EXACTLY this format:\n\n\
         EDIT 1:\n\
         Lines: <start>-<end>\n\
         Old: <exact current content of those lines>\n\
         New: <replacement content>\n\
         Description: <one-line summary>\n\n\
         EDIT 2:\n\
         ...\n\n\
         Rules: line numbers are 1-based and inclusive; Old must match the file's \
         current content exactly for its line range; do not include line-number \
         prefixes inside Old or New; reply with edit blocks only, no other prose.\n\n\
         Instructions: {instructions}\n\n\
         Current file (line numbers for reference only):\n{numbered}"
    )
}

fn edit_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)EDIT\s+\d+:\s*\n\s*Lines:\s*(\d+)\s*-\s*(\d+)\s*\n\s*Old:\s*(.*?)\n\s*New:\s*(.*?)\n\s*Description:\s*(.*?)(?:\n\n|\n?EDIT\s+\d+:|$)",
        )
        .unwrap()
    })
}

/// Tolerates ordering and whitespace; blocks lacking required fields are
/// discarded.
pub fn parse_edit_blocks(model_output: &str) -> Vec<EditBlock> {
    let mut blocks = Vec::new();
    for cap in edit_block_re().captures_iter(model_output) {
        let (Some(start), Some(end)) = (
            cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()),
            cap.get(2).and_then(|m| m.as_str().parse::<usize>().ok()),
        ) else {
            continue;
        };
        let old_content = cap.get(3).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        let new_content = cap.get(4).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        let description = cap.get(5).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
        if description.is_empty() && new_content.is_empty() {
            continue;
        }
        blocks.push(EditBlock { start_line: start, end_line: end, old_content, new_content, description });
    }
    blocks
}

/// Renders edit blocks back into the same wire format `parse_edit_blocks`
/// consumes, for the round-trip law `parseEditBlocks(render(blocks)) ==
/// blocks` holds for any block list.
pub fn render_edit_blocks(blocks: &[EditBlock]) -> String {
    blocks
        .iter()
        .enumerate()
        .map(|(i, b)| {
            format!(
                "EDIT {}:\nLines: {}-{}\nOld: {}\nNew: {}\nDescription: {}\n\n",
                i + 1,
                b.start_line,
                b.end_line,
                b.old_content,
                b.new_content,
                b.description
            )
        })
        .collect()
}

/// - ranges in bounds;
/// - no pairwise overlap;
/// - `oldContent` (when given) equals `existing[startLine..endLine]`.
pub fn validate_edits(existing: &str, blocks: &[EditBlock]) -> Vec<String> {
    let mut errors = Vec::new();
    let lines: Vec<&str> = existing.lines().collect();
    let line_count = lines.len();

    for (i, block) in blocks.iter().enumerate() {
        if block.start_line < 1 || block.end_line < block.start_line {
            errors.push(format!("block {}: invalid range {}-{}", i, block.start_line, block.end_line));
            continue;
        }
        if block.end_line > line_count.max(1) || line_count == 0 {
            errors.push(format!(
                "block {}: range {}-{} out of bounds for {} line file",
                i, block.start_line, block.end_line, line_count
            ));
            continue;
        }
        if !block.old_content.is_empty() {
            let actual = lines[block.start_line - 1..block.end_line].join("\n");
            if actual != block.old_content {
                errors.push(format!(
                    "block {}: old content does not match file content at lines {}-{}",
                    i, block.start_line, block.end_line
                ));
            }
        }
    }

    for i in 0..blocks.len() {
        for j in (i + 1)..blocks.len() {
            let (a, b) = (&blocks[i], &blocks[j]);
            if a.start_line <= b.end_line && b.start_line <= a.end_line {
                errors.push(format!("block {i} overlaps block {j}"));
            }
        }
    }

    errors
}

/// Sort blocks by `startLine` descending, splice from bottom to top so
/// earlier edits see unshifted line numbers.
pub fn apply_edits(existing: &str, blocks: &[EditBlock]) -> String {
    let mut lines: Vec<String> = existing.lines().map(|l| l.to_string()).collect();
    let mut sorted: Vec<&EditBlock> = blocks.iter().collect();
    sorted.sort_by(|a, b| b.start_line.cmp(&a.start_line));

    for block in sorted {
        let start = block.start_line - 1;
        let end = block.end_line;
        if start > lines.len() || end > lines.len() {
            continue;
        }
        let replacement: Vec<String> = if block.new_content.is_empty() {
            Vec::new()
        } else {
            block.new_content.lines().map(|l| l.to_string()).collect()
        };
        lines.splice(start..end, replacement);
    }

    let mut out = lines.join("\n");
    if existing.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

pub struct SavingsEstimate {
    pub full_tokens: usize,
    pub diff_tokens: usize,
    pub savings_pct: f32,
}

/// Informational: uses a 4-characters-per-token heuristic.
pub fn estimate_savings(existing: &str, blocks: &[EditBlock]) -> SavingsEstimate {
    let chars_to_tokens = |n: usize| (n as f32 / 4.0).ceil() as usize;
    let full_tokens = chars_to_tokens(existing.len());
    let diff_chars: usize = blocks
        .iter()
        .map(|b| b.old_content.len() + b.new_content.len() + b.description.len())
        .sum();
    let diff_tokens = chars_to_tokens(diff_chars);
    let savings_pct = if full_tokens == 0 {
        0.0
    } else {
        (1.0 - (diff_tokens as f32 / full_tokens as f32)).max(0.0) * 100.0
    };
    SavingsEstimate { full_tokens, diff_tokens, savings_pct }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> String {
        (1..=10).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn validate_edits_rejects_out_of_bounds_range() {
        let existing = sample_file();
        let blocks = vec![EditBlock {
            start_line: 1,
            end_line: 20,
            old_content: String::new(),
            new_content: "x".to_string(),
            description: "oob".to_string(),
        }];
        let errors = validate_edits(&existing, &blocks);
        assert!(!errors.is_empty());
    }

    #[test]
    fn single_line_edit_on_empty_file_fails_validation() {
        let errors = validate_edits("", &[EditBlock {
            start_line: 1,
            end_line: 1,
            old_content: String::new(),
            new_content: "x".to_string(),
            description: "d".to_string(),
        }]);
        assert!(!errors.is_empty());
    }

    #[test]
    fn validate_edits_rejects_overlap() {
        let existing = sample_file();
        let blocks = vec![
            EditBlock { start_line: 1, end_line: 3, old_content: String::new(), new_content: "a".to_string(), description: "d1".to_string() },
            EditBlock { start_line: 3, end_line: 5, old_content: String::new(), new_content: "b".to_string(), description: "d2".to_string() },
        ];
        let errors = validate_edits(&existing, &blocks);
        assert!(errors.iter().any(|e| e.contains("overlap")));
    }

    #[test]
    fn validate_edits_checks_old_content_equality() {
        let existing = sample_file();
        let blocks = vec![EditBlock {
            start_line: 2,
            end_line: 2,
            old_content: "not the real line 2".to_string(),
            new_content: "new".to_string(),
            description: "d".to_string(),
        }];
        let errors = validate_edits(&existing, &blocks);
        assert!(!errors.is_empty());
    }

    #[test]
    fn apply_edits_applies_bottom_to_top_so_line_numbers_stay_stable() {
        let existing = sample_file();
        let blocks = vec![
            EditBlock { start_line: 2, end_line: 2, old_content: "line 2".to_string(), new_content: "LINE TWO".to_string(), description: "d1".to_string() },
            EditBlock { start_line: 8, end_line: 9, old_content: "line 8\nline 9".to_string(), new_content: "LINE EIGHT-NINE".to_string(), description: "d2".to_string() },
        ];
        assert!(validate_edits(&existing, &blocks).is_empty());
        let result = apply_edits(&existing, &blocks);
        let lines: Vec<&str> = result.lines().collect();
        assert_eq!(lines[1], "LINE TWO");
        assert_eq!(lines[6], "LINE EIGHT-NINE");
        assert_eq!(lines.len(), 9);
    }

    #[test]
    fn apply_edits_on_empty_block_list_is_identity() {
        let existing = sample_file();
        assert_eq!(apply_edits(&existing, &[]), existing);
    }

    #[test]
    fn round_trip_parse_of_rendered_blocks_matches_original() {
        let blocks = vec![EditBlock {
            start_line: 1,
            end_line: 2,
            old_content: "a\nb".to_string(),
            new_content: "c\nd".to_string(),
            description: "swap".to_string(),
        }];
        let rendered = render_edit_blocks(&blocks);
        let parsed = parse_edit_blocks(&rendered);
        assert_eq!(parsed, blocks);
    }

    #[test]
    fn estimate_savings_is_positive_for_a_small_edit_in_a_large_file() {
        let existing = "x".repeat(4000);
        let blocks = vec![EditBlock {
            start_line: 1,
            end_line: 1,
            old_content: "x".to_string(),
            new_content: "y".to_string(),
            description: "tiny change".to_string(),
        }];
        let est = estimate_savings(&existing, &blocks);
        assert!(est.savings_pct > 0.0);
    }
}
