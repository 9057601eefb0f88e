use crate::adapter::GenerateOptions;
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::types::{Intent, IntentResult, Role, Tool};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Default deadline for a single intent-classification call; the router is
/// always-resident and on the hot path of every utterance, so it gets the
/// tightest budget of the three generation call sites.
const CLASSIFY_TIMEOUT_SEC: u64 = 10;

const CLASSIFIER_PROMPT: &str = r#"You are an intent classifier for a coding assistant. Read the user's utterance and reply with ONLY a JSON object of the shape:
{"intent": "tool_call"|"simple_answer"|"coding_task"|"algorithm_task", "confidence": 0.0-1.0, "tool": "git"|"shell"|"file"|"sqlite"|null, "params": {}, "escalate_to": "coder"|"algorithm"|null}
No prose, no markdown fences. Utterance: "#;

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    intent: String,
    confidence: f32,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    params: HashMap<String, String>,
    #[serde(default)]
    escalate_to: Option<String>,
}

/// A cheap, always-resident classifier that turns one utterance into a
/// typed intent with a confidence score and parameters, backed by a
/// deterministic pattern-based fallback.
pub struct IntentRouter {
    lifecycle: std::sync::Arc<LifecycleManager>,
    adapter: std::sync::Arc<dyn crate::adapter::EngineAdapter>,
    cancel: watch::Receiver<bool>,
}

/// Ordered `(pattern, intent family, tool, confidence)` fallback table.
/// First match wins. Confidence constants are fixed:
/// 0.95 tool verbs, 0.85 simple-answer, 0.75 coding, 0.80 algorithmic.
struct FallbackRule {
    keywords: &'static [&'static str],
    intent: Intent,
    tool: Option<Tool>,
    confidence: f32,
}

const TOOL_VERBS: &[&str] = &[
    "git", "ls", "pwd", "mkdir", "rm", "run", "execute", "install", "clone", "commit", "push",
    "pull", "status",
];
const SIMPLE_ANSWER_PREFIXES: &[&str] = &["what", "why", "how", "explain"];
const CODING_VERBS: &[&str] = &[
    "create", "write", "generate", "implement", "edit", "modify", "refactor", "fix", "add",
    "remove",
];
pub const ALGORITHMIC_KEYWORDS: &[&str] = &[
    "binary search",
    "sort",
    "graph",
    "tree",
    "heap",
    "hash",
    "dynamic programming",
    "complexity",
    "parser",
    "state machine",
    "optimize",
];

fn fallback_table() -> Vec<FallbackRule> {
    vec![
        FallbackRule { keywords: TOOL_VERBS, intent: Intent::ToolCall, tool: Some(Tool::Git), confidence: 0.95 },
        FallbackRule { keywords: SIMPLE_ANSWER_PREFIXES, intent: Intent::SimpleAnswer, tool: None, confidence: 0.85 },
        FallbackRule { keywords: ALGORITHMIC_KEYWORDS, intent: Intent::AlgorithmTask, tool: None, confidence: 0.80 },
        FallbackRule { keywords: CODING_VERBS, intent: Intent::CodingTask, tool: None, confidence: 0.75 },
    ]
}

/// Maps a matched tool verb to its `(Tool, action)` pair for `params`.
fn tool_verb_action(verb: &str) -> (Tool, &'static str) {
    match verb {
        "git" | "commit" | "push" | "pull" | "status" | "clone" => (Tool::Git, "status"),
        "ls" | "pwd" => (Tool::File, "list"),
        "mkdir" => (Tool::Shell, "mkdir"),
        "rm" => (Tool::File, "delete"),
        "run" | "execute" | "install" => (Tool::Shell, "run"),
        _ => (Tool::Shell, "run"),
    }
}

impl IntentRouter {
    pub fn new(
        lifecycle: std::sync::Arc<LifecycleManager>,
        adapter: std::sync::Arc<dyn crate::adapter::EngineAdapter>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { lifecycle, adapter, cancel }
    }

    pub async fn classify(&self, utterance: &str) -> IntentResult {
        if let Some(result) = self.classify_tier_a(utterance).await {
            if result.confidence >= 0.50 {
                return result;
            }
        }
        classify_tier_b(utterance)
    }

    /// Prompts the always-resident engine with a fixed schema instruction.
    /// Returns `None` on any failure to load/generate/parse, which drops to
    /// tier B.
    async fn classify_tier_a(&self, utterance: &str) -> Option<IntentResult> {
        self.lifecycle.ensure_loaded(Role::Router).await.ok()?;
        let handle = self.lifecycle.handle_for(Role::Router).await?;
        let policy = self.lifecycle.policy(Role::Router);
        let prompt = format!("{CLASSIFIER_PROMPT}{utterance}");
        let opts = GenerateOptions::new(policy.max_tokens.min(256), policy.default_temperature, self.cancel.clone());
        let raw = tokio::time::timeout(Duration::from_secs(CLASSIFY_TIMEOUT_SEC), self.adapter.generate(&handle, &prompt, opts))
            .await
            .ok()?
            .ok()?;

        let trimmed = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
        let reply: ClassifierReply = serde_json::from_str(trimmed).ok()?;
        let intent = match reply.intent.as_str() {
            "tool_call" => Intent::ToolCall,
            "simple_answer" => Intent::SimpleAnswer,
            "coding_task" => Intent::CodingTask,
            "algorithm_task" => Intent::AlgorithmTask,
            _ => return None,
        };
        let tool = reply.tool.as_deref().and_then(parse_tool_name);
        if intent == Intent::ToolCall && tool.is_none() {
            return None;
        }
        let escalate_to = reply.escalate_to.as_deref().and_then(|s| match s {
            "coder" => Some(Role::Coder),
            "algorithm" => Some(Role::Algorithm),
            _ => None,
        });
        Some(IntentResult::new(
            intent,
            reply.confidence,
            if intent == Intent::ToolCall { tool } else { None },
            reply.params,
            escalate_to,
            false,
        ))
    }

}

/// A frozen, ordered table of regex/keyword patterns per intent family.
/// Free function (not a method) so the Task Planner can re-run the same
/// rules per clause without needing a loaded engine, so a clause's step
/// type is derived the same way a whole utterance's intent is.
pub(crate) fn classify_tier_b(utterance: &str) -> IntentResult {
    let lower = utterance.to_lowercase();
    for rule in fallback_table() {
        for kw in rule.keywords {
            let matched = if rule.intent == Intent::SimpleAnswer {
                lower.trim_start().starts_with(kw)
            } else {
                lower.split_whitespace().any(|w| w == *kw) || lower.contains(kw)
            };
            if matched {
                debug!(utterance, keyword = kw, intent = ?rule.intent, "tier-b fallback match");
                let (tool, params) = if rule.intent == Intent::ToolCall {
                    let (tool, action) = tool_verb_action(kw);
                    let mut p = HashMap::new();
                    p.insert("action".to_string(), action.to_string());
                    (Some(tool), p)
                } else {
                    (rule.tool, HashMap::new())
                };
                let escalate_to = if rule.intent == Intent::CodingTask {
                    if ALGORITHMIC_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        Some(Role::Algorithm)
                    } else {
                        Some(Role::Coder)
                    }
                } else if rule.intent == Intent::AlgorithmTask {
                    Some(Role::Algorithm)
                } else {
                    None
                };
                return IntentResult::new(rule.intent, rule.confidence, tool, params, escalate_to, true);
            }
        }
    }
    IntentResult::new(Intent::Unknown, 0.30, None, HashMap::new(), None, true)
}

pub(crate) fn parse_tool_name(s: &str) -> Option<Tool> {
    match s {
        "git" => Some(Tool::Git),
        "shell" => Some(Tool::Shell),
        "file" => Some(Tool::File),
        "sqlite" => Some(Tool::Sqlite),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_status_matches_tool_call_with_high_confidence() {
        let router_noop = fallback_table();
        let lower = "git status".to_lowercase();
        let rule = router_noop.iter().find(|r| r.intent == Intent::ToolCall).unwrap();
        assert!(rule.keywords.iter().any(|k| lower.contains(k)));
        assert_eq!(rule.confidence, 0.95);
    }

    #[test]
    fn algorithmic_keyword_takes_precedence_over_generic_coding_verb() {
        let utterance = "implement binary search with O(log n) complexity".to_lowercase();
        assert!(ALGORITHMIC_KEYWORDS.iter().any(|k| utterance.contains(k)));
    }

    #[test]
    fn simple_answer_prefix_must_be_at_start() {
        let utterance = "please tell me how this works";
        let lower = utterance.to_lowercase();
        assert!(!SIMPLE_ANSWER_PREFIXES.iter().any(|p| lower.trim_start().starts_with(p)));
    }
}
