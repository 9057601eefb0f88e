use crate::engine::router::classify_tier_b;
use crate::engine::types::{Intent, IntentResult, StepStatus, StepType, TaskPlan, TaskStep};
use regex::Regex;
use std::sync::OnceLock;

const SEQUENTIAL_CONNECTIVES: &[&str] = &["then", "after", "next", "followed by"];
const PARALLEL_CONNECTIVES: &[&str] = &["and also", "simultaneously"];

struct ChunkSpec {
    name: &'static str,
    target_path: &'static str,
    max_tokens: usize,
}

/// The fixed chunk template emitted for `create a full-stack X with ...`
/// requests. `maxTokens` stays in the
/// 192-384 range so each chunk completes well inside a CPU-inference
/// timeout.
const FULL_STACK_CHUNKS: &[ChunkSpec] = &[
    ChunkSpec { name: "database schema", target_path: "db/schema.sql", max_tokens: 256 },
    ChunkSpec { name: "backend setup", target_path: "server/main.rs", max_tokens: 320 },
    ChunkSpec { name: "backend routes", target_path: "server/routes.rs", max_tokens: 384 },
    ChunkSpec { name: "database init", target_path: "db/init.sql", max_tokens: 192 },
    ChunkSpec { name: "directory creation", target_path: ".", max_tokens: 192 },
    ChunkSpec { name: "html", target_path: "public/index.html", max_tokens: 320 },
    ChunkSpec { name: "css", target_path: "public/style.css", max_tokens: 256 },
    ChunkSpec { name: "js", target_path: "public/app.js", max_tokens: 320 },
    ChunkSpec { name: "readme", target_path: "README.md", max_tokens: 256 },
];

fn numbered_list_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s").unwrap())
}

fn full_stack_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)full[- ]stack").unwrap())
}

pub fn needs_planning(utterance: &str) -> bool {
    let lower = utterance.to_lowercase();
    SEQUENTIAL_CONNECTIVES.iter().any(|c| lower.contains(c))
        || PARALLEL_CONNECTIVES.iter().any(|c| lower.contains(c))
        || numbered_list_re().is_match(utterance)
        || full_stack_re().is_match(utterance)
}

fn split_on_connectives(utterance: &str) -> (Vec<String>, bool) {
    let lower = utterance.to_lowercase();

    if numbered_list_re().is_match(utterance) {
        let clauses: Vec<String> = numbered_list_re()
            .split(utterance)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        return (clauses, true);
    }

    for connective in SEQUENTIAL_CONNECTIVES {
        if lower.contains(connective) {
            let clauses: Vec<String> = split_case_insensitive(utterance, connective);
            return (clauses, true);
        }
    }

    for connective in PARALLEL_CONNECTIVES {
        if lower.contains(connective) {
            let clauses: Vec<String> = split_case_insensitive(utterance, connective);
            return (clauses, false);
        }
    }

    (vec![utterance.trim().to_string()], true)
}

fn split_case_insensitive(text: &str, needle: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut clauses = Vec::new();
    let mut rest = text;
    let mut rest_lower = lower.as_str();
    while let Some(idx) = rest_lower.find(needle) {
        let (head, tail) = rest.split_at(idx);
        clauses.push(head.trim().trim_end_matches(',').trim().to_string());
        let after = &tail[needle.len()..];
        rest = after;
        rest_lower = &rest_lower[idx + needle.len()..];
    }
    clauses.push(rest.trim().to_string());
    clauses.into_iter().filter(|c| !c.is_empty()).collect()
}

fn step_type_for(intent: Intent) -> StepType {
    match intent {
        Intent::ToolCall => StepType::ToolCall,
        Intent::AlgorithmTask => StepType::AlgorithmGen,
        Intent::CodingTask => StepType::CodeGen,
        Intent::SimpleAnswer | Intent::Unknown => StepType::SimpleAnswer,
    }
}

fn pending_step_from_clause(clause: &str, depends_on: Vec<String>, id: String) -> TaskStep {
    let classified: IntentResult = classify_tier_b(clause);
    let mut params = classified.params.clone();
    if let Some(tool) = classified.tool {
        params.insert("tool".to_string(), tool.to_string());
    }
    TaskStep {
        id,
        step_type: step_type_for(classified.intent),
        description: clause.to_string(),
        params,
        depends_on,
        status: StepStatus::Pending,
        result: None,
        error: None,
    }
}

fn pending_step(description: &str, step_type: StepType, depends_on: Vec<String>, id: String) -> TaskStep {
    TaskStep {
        id,
        step_type,
        description: description.to_string(),
        params: std::collections::HashMap::new(),
        depends_on,
        status: StepStatus::Pending,
        result: None,
        error: None,
    }
}

/// Builds the plan for an utterance already known to need one. Full-stack
/// requests get the fixed chunk template; everything else is clause-split
/// preserving order, each clause re-classified via the router's own
/// fallback table.
pub fn plan(utterance: &str) -> TaskPlan {
    if full_stack_re().is_match(utterance) {
        let steps: Vec<TaskStep> = FULL_STACK_CHUNKS
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let depends_on = if i == 0 { vec![] } else { vec![format!("step-{}", i - 1)] };
                let mut step = pending_step(
                    &format!("{}: write {}", chunk.name, chunk.target_path),
                    StepType::CodeGen,
                    depends_on,
                    format!("step-{i}"),
                );
                step.params.insert("max_tokens".to_string(), chunk.max_tokens.to_string());
                step.params.insert("target_path".to_string(), chunk.target_path.to_string());
                step
            })
            .collect();
        let execution_order = steps.iter().map(|s| s.id.clone()).collect();
        return TaskPlan { steps, execution_order, is_sequential: true };
    }

    let (clauses, is_sequential) = split_on_connectives(utterance);
    let mut steps = Vec::with_capacity(clauses.len());
    for (i, clause) in clauses.iter().enumerate() {
        let depends_on = if is_sequential && i > 0 { vec![format!("step-{}", i - 1)] } else { vec![] };
        steps.push(pending_step_from_clause(clause, depends_on, format!("step-{i}")));
    }
    let execution_order = steps.iter().map(|s| s.id.clone()).collect();
    TaskPlan { steps, execution_order, is_sequential }
}

/// Next `Pending` step whose dependencies are all `Completed`; `None` when
/// the plan is done or blocked.
pub fn step(plan: &TaskPlan) -> Option<&TaskStep> {
    plan.steps.iter().find(|s| {
        s.status == StepStatus::Pending && s.depends_on.iter().all(|dep| plan.step(dep).map(|d| d.status == StepStatus::Completed).unwrap_or(false))
    })
}

/// Transitions `stepId` to `status`. On a `Failed` step in a sequential
/// plan, every remaining `Pending` step is marked `Skipped` and the plan
/// completes with a partial summary.
pub fn update(plan: &mut TaskPlan, step_id: &str, status: StepStatus, result: Option<String>, error: Option<String>) -> Result<(), String> {
    let is_sequential = plan.is_sequential;
    let target = plan.step_mut(step_id).ok_or_else(|| format!("unknown step id {step_id}"))?;
    target.transition(status)?;
    target.result = result;
    target.error = error;

    if is_sequential && status == StepStatus::Failed {
        for s in plan.steps.iter_mut() {
            if s.status == StepStatus::Pending {
                s.status = StepStatus::Skipped;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_connective_is_detected() {
        assert!(needs_planning("write the function then run the tests"));
    }

    #[test]
    fn plain_single_clause_utterance_does_not_need_planning() {
        assert!(!needs_planning("what does this function do"));
    }

    #[test]
    fn numbered_list_splits_into_ordered_sequential_steps() {
        let p = plan("1. create main.rs\n2. create lib.rs\n3. run tests");
        assert_eq!(p.steps.len(), 3);
        assert!(p.is_sequential);
        assert_eq!(p.steps[2].depends_on, vec!["step-1"]);
    }

    #[test]
    fn parallel_connective_sets_is_sequential_false() {
        let p = plan("write the readme and also write the license");
        assert!(!p.is_sequential);
        assert_eq!(p.steps.len(), 2);
    }

    #[test]
    fn full_stack_template_emits_the_fixed_chunk_set() {
        let p = plan("create a full-stack todo app with login");
        assert_eq!(p.steps.len(), FULL_STACK_CHUNKS.len());
        assert!(p.is_sequential);
        assert!(p.steps.iter().all(|s| s.params.get("max_tokens").unwrap().parse::<usize>().unwrap() <= 384));
    }

    #[test]
    fn failed_step_in_sequential_plan_skips_remaining_pending_steps() {
        let mut p = plan("first do a then do b then do c");
        update(&mut p, "step-0", StepStatus::InProgress, None, None).unwrap();
        update(&mut p, "step-0", StepStatus::Failed, None, Some("boom".to_string())).unwrap();
        assert_eq!(p.step("step-1").unwrap().status, StepStatus::Skipped);
        assert_eq!(p.step("step-2").unwrap().status, StepStatus::Skipped);
    }

    #[test]
    fn step_returns_none_when_blocked_on_an_incomplete_dependency() {
        let p = plan("first do a then do b");
        let next = step(&p).unwrap();
        assert_eq!(next.id, "step-0");
    }

    #[test]
    fn illegal_transition_is_rejected_not_coerced() {
        let mut p = plan("first do a then do b");
        assert!(update(&mut p, "step-0", StepStatus::Completed, None, None).is_err());
    }
}
