use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedKind {
    Py,
    Js,
    Ts,
    Css,
    Html,
    Json,
    Md,
    Other,
}

impl ExpectedKind {
    fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            ExpectedKind::Py => &["python", "py"],
            ExpectedKind::Js => &["javascript", "js"],
            ExpectedKind::Ts => &["typescript", "ts"],
            ExpectedKind::Css => &["css"],
            ExpectedKind::Html => &["html"],
            ExpectedKind::Json => &["json"],
            ExpectedKind::Md => &["markdown", "md"],
            ExpectedKind::Other => &[],
        }
    }
}

pub struct Extracted {
    pub content: String,
    pub confidence: f32,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)\n(.*?)```").unwrap())
}

fn filename_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(#|//)?\s*(file|path)\s*:\s*\S+\s*$").unwrap()
    })
}

/// Salvages typed content (code, CSS, JS, HTML) from noisy model output.
///
/// (a) strips fenced code blocks, preferring the first block whose language
/// tag matches `expected_kind`;
/// (b) strips filename-comment prefixes;
/// (c) trims trailing noise;
/// (d) validates content against `expected_kind` with shallow heuristics,
/// salvaging the longest substring that passes when validation fails.
pub fn extract(raw_text: &str, expected_kind: ExpectedKind) -> Extracted {
    let body = strip_fences(raw_text, expected_kind);
    let body = strip_filename_prefix(&body);
    let body = trim_trailing_noise(&body);

    if validate(&body, expected_kind) {
        return Extracted { content: body, confidence: 0.95 };
    }

    match salvage(&body, expected_kind) {
        Some(salvaged) => Extracted { content: salvaged, confidence: 0.55 },
        None => Extracted { content: body, confidence: 0.25 },
    }
}

fn strip_fences(raw: &str, expected_kind: ExpectedKind) -> String {
    let tags = expected_kind.fence_tags();
    let mut best: Option<(bool, String)> = None;
    for cap in fence_re().captures_iter(raw) {
        let lang = cap.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        let content = cap.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
        let matches_expected = tags.iter().any(|t| *t == lang);
        if matches_expected {
            return content;
        }
        if best.is_none() {
            best = Some((matches_expected, content));
        }
    }
    match best {
        Some((_, content)) => content,
        None => raw.to_string(),
    }
}

fn strip_filename_prefix(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(first) = lines.first() {
        if filename_prefix_re().is_match(first) || first.trim().starts_with("File:") {
            lines.remove(0);
        } else {
            break;
        }
    }
    lines.join("\n")
}

const TRAILING_NOISE_MARKERS: &[&str] = &["File:", "---", "leted", "eted", "pleted"];

fn trim_trailing_noise(text: &str) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while let Some(last) = lines.last() {
        let trimmed = last.trim();
        let is_noise = trimmed.is_empty()
            || trimmed.chars().all(|c| c == '-' || c == '=')
            || TRAILING_NOISE_MARKERS.iter().any(|m| trimmed == *m || trimmed.ends_with(m));
        if is_noise && lines.len() > 1 {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n").trim_end().to_string()
}

fn selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)[#.a-zA-Z][\w.#:\-\[\] ]*\{[^}]*\}").unwrap())
}

fn js_statement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(function|const|let|var|class|=>|document\.|window\.)\b").unwrap()
    })
}

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[a-zA-Z][^>]*>").unwrap())
}

fn validate(content: &str, expected_kind: ExpectedKind) -> bool {
    if content.trim().is_empty() {
        return false;
    }
    match expected_kind {
        ExpectedKind::Css => selector_re().is_match(content),
        ExpectedKind::Js | ExpectedKind::Ts => js_statement_re().is_match(content),
        ExpectedKind::Html => html_tag_re().is_match(content),
        ExpectedKind::Json => serde_json::from_str::<serde_json::Value>(content).is_ok(),
        _ => true,
    }
}

/// Scans the input for the longest substring passing the heuristic and
/// returns it with reduced confidence.
fn salvage(content: &str, expected_kind: ExpectedKind) -> Option<String> {
    let finder: &dyn Fn(&str) -> Option<(usize, usize)> = match expected_kind {
        ExpectedKind::Css => &|s: &str| selector_re().find_iter(s).map(|m| (m.start(), m.end())).reduce(span_union),
        ExpectedKind::Js | ExpectedKind::Ts => {
            &|s: &str| js_statement_re().find_iter(s).map(|m| (m.start(), m.end())).reduce(span_union)
        }
        ExpectedKind::Html => &|s: &str| html_tag_re().find_iter(s).map(|m| (m.start(), m.end())).reduce(span_union),
        _ => return None,
    };
    let (start, end) = finder(content)?;
    let candidate = content[start..end].to_string();
    if candidate.trim().is_empty() {
        None
    } else {
        Some(candidate)
    }
}

fn span_union(a: (usize, usize), b: (usize, usize)) -> (usize, usize) {
    (a.0.min(b.0), a.1.max(b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_fence_matching_expected_language() {
        let raw = "```js\nconsole.log(1);\n```\n```python\nprint(1)\n```";
        let out = extract(raw, ExpectedKind::Py);
        assert!(out.content.contains("print(1)"));
        assert_eq!(out.confidence, 0.95);
    }

    #[test]
    fn strips_filename_comment_prefix() {
        let raw = "```python\n# file: calc.py\ndef add(a, b):\n    return a + b\n```";
        let out = extract(raw, ExpectedKind::Py);
        assert!(!out.content.contains("file:"));
        assert!(out.content.contains("def add"));
    }

    #[test]
    fn trims_trailing_noise_markers() {
        let raw = "```css\nbody { color: red; }\n```\nFile:";
        let out = extract(raw, ExpectedKind::Css);
        assert!(!out.content.trim_end().ends_with("File:"));
    }

    #[test]
    fn css_without_a_selector_block_fails_validation_and_falls_back_to_low_confidence() {
        let raw = "this is not css at all";
        let out = extract(raw, ExpectedKind::Css);
        assert!(out.confidence < 0.95);
    }

    #[test]
    fn css_salvage_extracts_the_embedded_selector_block() {
        let raw = "Sure, here you go:\nbody { color: red; }\nHope that helps!";
        let out = extract(raw, ExpectedKind::Css);
        assert!(out.content.contains("body { color: red; }"));
        assert!(out.confidence > 0.25 && out.confidence < 0.95);
    }

    #[test]
    fn html_requires_at_least_one_tag() {
        assert!(validate("<div>hi</div>", ExpectedKind::Html));
        assert!(!validate("no tags here", ExpectedKind::Html));
    }
}
