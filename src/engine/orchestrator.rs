use crate::adapter::{EngineAdapter, GenerateOptions};
use crate::engine::extractor::{self, ExpectedKind};
use crate::engine::formatter;
use crate::engine::lifecycle::LifecycleManager;
use crate::engine::patch;
use crate::engine::permission::{fold_mkdir_paths, PermissionGate};
use crate::engine::planner;
use crate::engine::router::{IntentRouter, ALGORITHMIC_KEYWORDS};
use crate::engine::tool_exec::{self, ToolExecutor};
use crate::engine::types::{
    AlgorithmResult, AlgorithmTask, CodeResult, CodingOutput, CodingTask, CodingTaskType,
    ComplexityAnalysis, Decision, Intent, IntentResult, OptimizeFor, PermissionCategory,
    PermissionRequest, Role, StepStatus, StepType, TaskPlan, Tool,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

const CLARIFICATION_THRESHOLD: f32 = 0.70;

/// Default per-call generation deadlines. The router's own classification
/// deadline lives next to its call site in `router.rs`.
const SIMPLE_ANSWER_TIMEOUT_SEC: u64 = 60;
const CODING_TIMEOUT_SEC: u64 = 300;
const ALGORITHM_TIMEOUT_SEC: u64 = 600;

/// Wires the other components together and answers `process(utterance)`.
/// Owns no side-effecting state itself; every mutation it drives goes
/// through the Lifecycle Manager, Tool Executor, or Permission Gate.
pub struct Orchestrator {
    lifecycle: Arc<LifecycleManager>,
    adapter: Arc<dyn EngineAdapter>,
    router: IntentRouter,
    tool_executor: ToolExecutor,
    permission: Mutex<PermissionGate>,
    cancel: watch::Receiver<bool>,
}

impl Orchestrator {
    pub fn new(
        lifecycle: Arc<LifecycleManager>,
        adapter: Arc<dyn EngineAdapter>,
        router: IntentRouter,
        tool_executor: ToolExecutor,
        permission: PermissionGate,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self { lifecycle, adapter, router, tool_executor, permission: Mutex::new(permission), cancel }
    }

    pub async fn process(&self, utterance: &str) -> String {
        if planner::needs_planning(utterance) {
            return self.drive_plan(planner::plan(utterance)).await;
        }
        let result = self.router.classify(utterance).await;
        self.handle_intent(utterance, result).await
    }

    async fn drive_plan(&self, mut plan: TaskPlan) -> String {
        let mut progress = Vec::new();
        while let Some(next) = planner::step(&plan).cloned() {
            let id = next.id.clone();
            planner::update(&mut plan, &id, StepStatus::InProgress, None, None).expect("Pending -> InProgress is always legal");

            let outcome = self.run_step(&next).await;
            match outcome {
                Ok(rendered) => {
                    progress.push(format!("[done] {}: {}", next.description, rendered));
                    planner::update(&mut plan, &id, StepStatus::Completed, Some(rendered), None).expect("InProgress -> Completed is always legal");
                }
                Err(err) => {
                    progress.push(format!("[failed] {}: {err}", next.description));
                    planner::update(&mut plan, &id, StepStatus::Failed, None, Some(err)).expect("InProgress -> Failed is always legal");
                }
            }

            if plan.steps.iter().all(|s| s.status != StepStatus::Pending && s.status != StepStatus::InProgress) {
                break;
            }
        }

        let skipped = plan.steps.iter().filter(|s| s.status == StepStatus::Skipped).count();
        if skipped > 0 {
            progress.push(format!("({skipped} step(s) skipped after an earlier failure)"));
        }
        progress.join("\n")
    }

    /// Re-enters the single-step path for one `TaskStep`, the recursion
    /// path"), so each step is handled by the exact same dispatch a
    /// standalone utterance would go through.
    async fn run_step(&self, step: &crate::engine::types::TaskStep) -> Result<String, String> {
        match step.step_type {
            StepType::ToolCall => {
                let tool = step.params.get("tool").and_then(|s| tool_exec::normalize_tool(s)).ok_or_else(|| "step has no resolvable tool".to_string())?;
                let action = step.params.get("action").map(|s| s.as_str()).unwrap_or("status");
                self.run_tool_call(tool, action, serde_json::json!({})).await.map_err(|e| e.to_string())
            }
            StepType::CodeGen => {
                let target_hint = step.params.get("target_path").cloned();
                let task = self.build_coding_task(&step.description, target_hint).await;
                let result = self.run_coding_task(task).await;
                Ok(formatter::format_code_result(&result))
            }
            StepType::AlgorithmGen => {
                let task = AlgorithmTask {
                    target_files: vec![],
                    instructions: step.description.clone(),
                    existing_code: HashMap::new(),
                    language: None,
                    constraints: vec![],
                    expected_complexity: None,
                    optimize_for: OptimizeFor::Readability,
                };
                let result = self.run_algorithm_task(task).await;
                Ok(formatter::format_algorithm_result(&result))
            }
            StepType::SimpleAnswer => self.run_simple_answer(&step.description).await.map_err(|e| e.to_string()),
        }
    }

    async fn handle_intent(&self, utterance: &str, result: IntentResult) -> String {
        if result.intent == Intent::Unknown || result.confidence < CLARIFICATION_THRESHOLD {
            let candidates = vec![(result.intent, result.confidence), (Intent::CodingTask, 0.0)];
            return formatter::format_clarification(utterance, &candidates);
        }

        match result.intent {
            Intent::ToolCall => {
                let Some(tool) = result.tool else { return formatter::format_clarification(utterance, &[(result.intent, result.confidence)]) };
                let action = result.params.get("action").cloned().unwrap_or_else(|| default_action(tool).to_string());
                match self.run_tool_call(tool, &action, serde_json::json!(result.params)).await {
                    Ok(rendered) => rendered,
                    Err(e) => format!("{tool}.{action} failed: {e}"),
                }
            }
            Intent::SimpleAnswer => self.run_simple_answer(utterance).await.unwrap_or_else(|e| format!("could not produce an answer: {e}")),
            Intent::CodingTask => {
                if result.escalate_to == Some(Role::Algorithm) {
                    self.escalate_to_algorithm(utterance).await
                } else {
                    let task = self.build_coding_task(utterance, None).await;
                    let code_result = self.run_coding_task(task).await;
                    match &code_result.output {
                        CodingOutput::Edits { needs_algorithm_specialist: true, .. } => self.escalate_to_algorithm(utterance).await,
                        _ => formatter::format_code_result(&code_result),
                    }
                }
            }
            Intent::AlgorithmTask => {
                let task = AlgorithmTask {
                    target_files: vec![],
                    instructions: utterance.to_string(),
                    existing_code: HashMap::new(),
                    language: None,
                    constraints: vec![],
                    expected_complexity: None,
                    optimize_for: OptimizeFor::Readability,
                };
                formatter::format_algorithm_result(&self.run_algorithm_task(task).await)
            }
            Intent::Unknown => unreachable!("handled above"),
        }
    }

    /// Unloads Coder first if escalating would exceed budget; the
    /// Orchestrator never assumes Coder and Algorithm are co-resident
    /// together.
    async fn escalate_to_algorithm(&self, utterance: &str) -> String {
        let usage = self.lifecycle.memory_usage().await;
        let algorithm_need = self.lifecycle.policy(Role::Algorithm).memory_estimate_mb;
        if usage.total_mb + algorithm_need > self.budget_mb_hint() {
            let _ = self.lifecycle.unload(Role::Coder).await;
        }
        let task = AlgorithmTask {
            target_files: vec![],
            instructions: utterance.to_string(),
            existing_code: HashMap::new(),
            language: None,
            constraints: vec![],
            expected_complexity: None,
            optimize_for: OptimizeFor::Readability,
        };
        let rendered = formatter::format_algorithm_result(&self.run_algorithm_task(task).await);
        format!("(escalated to algorithm specialist)\n{rendered}")
    }

    fn budget_mb_hint(&self) -> usize {
        self.lifecycle.policy(Role::Router).memory_estimate_mb
            + self.lifecycle.policy(Role::Coder).memory_estimate_mb
            + self.lifecycle.policy(Role::Algorithm).memory_estimate_mb
    }

    async fn run_tool_call(&self, tool: Tool, action: &str, params: serde_json::Value) -> crate::error::ForgeResult<String> {
        let effect = tool_exec::side_effect(tool, action);
        let decision = if effect == tool_exec::SideEffect::Read {
            Decision::AllowOnce
        } else {
            let request = if tool == Tool::Shell && action == "mkdir" {
                let paths: Vec<String> = params
                    .get("paths")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                    .unwrap_or_else(|| params.get("path").and_then(|v| v.as_str()).map(|p| vec![p.to_string()]).unwrap_or_default());
                fold_mkdir_paths(&paths)
            } else {
                let category = permission_category(tool, action);
                let destructive = effect == tool_exec::SideEffect::Destructive;
                PermissionRequest { category, description: format!("{tool}.{action}"), preview: None, destructive, batch_id: None }
            };
            let mut gate = self.permission.lock().await;
            gate.request(request)
        };
        let result = self.tool_executor.execute(tool, action, params, decision).await?;
        Ok(formatter::format_tool_result(&result))
    }

    async fn run_simple_answer(&self, utterance: &str) -> crate::error::ForgeResult<String> {
        self.lifecycle.ensure_loaded(Role::Router).await?;
        let handle = self.lifecycle.handle_for(Role::Router).await.ok_or_else(|| crate::error::ForgeError::NotFound("router".to_string()))?;
        let policy = self.lifecycle.policy(Role::Router);
        let opts = GenerateOptions::new(policy.max_tokens.min(256), policy.default_temperature, self.cancel.clone());
        tokio::time::timeout(Duration::from_secs(SIMPLE_ANSWER_TIMEOUT_SEC), self.adapter.generate(&handle, utterance, opts))
            .await
            .map_err(|_| crate::error::ForgeError::Timeout(format!("simple answer generation exceeded {SIMPLE_ANSWER_TIMEOUT_SEC}s")))?
    }

    pub async fn run_coding_task(&self, task: CodingTask) -> CodeResult {
        let empty_files = |e: String| CodeResult { output: CodingOutput::Files(HashMap::new()), success: false, error: Some(e), metadata: HashMap::new() };

        if let Err(e) = self.lifecycle.ensure_loaded(Role::Coder).await {
            return empty_files(e.to_string());
        }
        let Some(handle) = self.lifecycle.handle_for(Role::Coder).await else {
            return empty_files("coder engine not resident".to_string());
        };
        let policy = self.lifecycle.policy(Role::Coder);

        let diff_target = if task.task_type != CodingTaskType::Create {
            task.target_files.first().and_then(|path| task.existing_code.get(path).map(|content| (path.clone(), content.clone())))
        } else {
            None
        };

        if let Some((path, existing)) = diff_target {
            let opts = GenerateOptions::new(policy.max_tokens, policy.default_temperature, self.cancel.clone());
            let prompt = patch::build_edit_prompt(&path, &existing, &task.instructions);
            let gen = tokio::time::timeout(Duration::from_secs(CODING_TIMEOUT_SEC), self.adapter.generate(&handle, &prompt, opts)).await;
            return match gen {
                Ok(Ok(raw)) => {
                    let blocks = patch::parse_edit_blocks(&raw);
                    let errors = patch::validate_edits(&existing, &blocks);
                    if !errors.is_empty() {
                        return empty_files(format!("edit validation failed: {}", errors.join("; ")));
                    }
                    let needs_algorithm_specialist = ALGORITHMIC_KEYWORDS.iter().any(|k| task.instructions.to_lowercase().contains(k));
                    let savings = patch::estimate_savings(&existing, &blocks);
                    let mut metadata = HashMap::new();
                    metadata.insert("savings_pct".to_string(), savings.savings_pct.to_string());
                    CodeResult { output: CodingOutput::Edits { blocks, needs_algorithm_specialist }, success: true, error: None, metadata }
                }
                Ok(Err(e)) => empty_files(e.to_string()),
                Err(_) => empty_files(format!("coding generation exceeded {CODING_TIMEOUT_SEC}s")),
            };
        }

        let opts = GenerateOptions::new(policy.max_tokens, policy.default_temperature, self.cancel.clone());
        let prompt = format!("{}\n\nRespond with the complete file content in a single fenced code block.", task.instructions);
        let gen = tokio::time::timeout(Duration::from_secs(CODING_TIMEOUT_SEC), self.adapter.generate(&handle, &prompt, opts)).await;

        match gen {
            Ok(Ok(raw)) => {
                let expected = task.language.as_deref().map(expected_kind_for_language).unwrap_or(ExpectedKind::Other);
                let extracted = extractor::extract(&raw, expected);
                let path = task.target_files.first().cloned().unwrap_or_else(|| "output".to_string());
                let mut files = HashMap::new();
                files.insert(path, extracted.content);
                let mut metadata = HashMap::new();
                metadata.insert("extraction_confidence".to_string(), extracted.confidence.to_string());
                CodeResult { output: CodingOutput::Files(files), success: true, error: None, metadata }
            }
            Ok(Err(e)) => empty_files(e.to_string()),
            Err(_) => empty_files(format!("coding generation exceeded {CODING_TIMEOUT_SEC}s")),
        }
    }

    pub async fn run_algorithm_task(&self, task: AlgorithmTask) -> AlgorithmResult {
        let empty = |err: String| AlgorithmResult {
            files: HashMap::new(),
            complexity_analysis: ComplexityAnalysis { time: "unknown".to_string(), space: "unknown".to_string() },
            rationale: String::new(),
            success: false,
            error: Some(err),
            metadata: HashMap::new(),
        };

        if let Err(e) = self.lifecycle.ensure_loaded(Role::Algorithm).await {
            return empty(e.to_string());
        }
        let Some(handle) = self.lifecycle.handle_for(Role::Algorithm).await else {
            return empty("algorithm engine not resident".to_string());
        };
        let policy = self.lifecycle.policy(Role::Algorithm);
        let opts = GenerateOptions::new(policy.max_tokens, policy.default_temperature, self.cancel.clone());
        let prompt = format!(
            "{}\n\nRespond with the complete file content in a fenced code block, followed by a line `Time: O(...)`, a line `Space: O(...)`, and a short rationale paragraph.",
            task.instructions
        );

        let gen = tokio::time::timeout(Duration::from_secs(ALGORITHM_TIMEOUT_SEC), self.adapter.generate(&handle, &prompt, opts)).await;
        match gen {
            Ok(Ok(raw)) => {
                let expected = task.language.as_deref().map(expected_kind_for_language).unwrap_or(ExpectedKind::Other);
                let extracted = extractor::extract(&raw, expected);
                let path = task.target_files.first().cloned().unwrap_or_else(|| "output".to_string());
                let mut files = HashMap::new();
                files.insert(path, extracted.content);
                let complexity = parse_complexity(&raw);
                AlgorithmResult { files, complexity_analysis: complexity, rationale: raw, success: true, error: None, metadata: HashMap::new() }
            }
            Ok(Err(e)) => empty(e.to_string()),
            Err(_) => empty(format!("algorithm generation exceeded {ALGORITHM_TIMEOUT_SEC}s")),
        }
    }

    /// Derives `task_type`/`language`/`existing_code` from the utterance (or
    /// a step's own description) and, when it names a file that already
    /// exists in the workspace, loads that file's content so `run_coding_task`
    /// can route through the diff editor instead of regenerating the whole
    /// file from scratch.
    async fn build_coding_task(&self, instructions: &str, target_hint: Option<String>) -> CodingTask {
        let task_type = task_type_for_instructions(instructions);
        let target = target_hint.or_else(|| extract_file_reference(instructions));

        if task_type != CodingTaskType::Create {
            if let Some(target) = &target {
                if let Some(content) = self.read_workspace_file(target).await {
                    let language = language_from_extension(target);
                    let mut existing_code = HashMap::new();
                    existing_code.insert(target.clone(), content);
                    return CodingTask {
                        task_type,
                        target_files: vec![target.clone()],
                        instructions: instructions.to_string(),
                        existing_code,
                        language,
                        constraints: vec![],
                    };
                }
            }
        }

        CodingTask {
            task_type: CodingTaskType::Create,
            target_files: target.clone().map(|t| vec![t]).unwrap_or_default(),
            instructions: instructions.to_string(),
            existing_code: HashMap::new(),
            language: target.as_deref().and_then(language_from_extension),
            constraints: vec![],
        }
    }

    async fn read_workspace_file(&self, relative: &str) -> Option<String> {
        let path = if std::path::Path::new(relative).is_absolute() {
            std::path::PathBuf::from(relative)
        } else {
            self.tool_executor.root.join(relative)
        };
        tokio::fs::read_to_string(&path).await.ok()
    }
}

fn expected_kind_for_language(language: &str) -> ExpectedKind {
    match language.to_lowercase().as_str() {
        "py" | "python" => ExpectedKind::Py,
        "js" | "javascript" => ExpectedKind::Js,
        "ts" | "typescript" => ExpectedKind::Ts,
        "css" => ExpectedKind::Css,
        "html" => ExpectedKind::Html,
        "json" => ExpectedKind::Json,
        "md" | "markdown" => ExpectedKind::Md,
        _ => ExpectedKind::Other,
    }
}

fn parse_complexity(raw: &str) -> ComplexityAnalysis {
    let time = raw.lines().find_map(|l| l.trim().strip_prefix("Time:")).map(|s| s.trim().to_string()).unwrap_or_else(|| "unknown".to_string());
    let space = raw.lines().find_map(|l| l.trim().strip_prefix("Space:")).map(|s| s.trim().to_string()).unwrap_or_else(|| "unknown".to_string());
    ComplexityAnalysis { time, space }
}

/// Leading-verb classification of an utterance/step description into a
/// `CodingTaskType`. Mirrors the router's fallback-table idiom: first match
/// wins, everything else defaults to `Create`.
fn task_type_for_instructions(instructions: &str) -> CodingTaskType {
    let lower = instructions.to_lowercase();
    const FIX: &[&str] = &["fix", "debug", "resolve"];
    const REFACTOR: &[&str] = &["refactor", "clean up", "simplify"];
    const EXPLAIN: &[&str] = &["explain", "what does", "how does"];
    const EDIT: &[&str] = &["edit", "modify", "update", "change", "add"];

    if FIX.iter().any(|k| lower.contains(k)) {
        CodingTaskType::Fix
    } else if REFACTOR.iter().any(|k| lower.contains(k)) {
        CodingTaskType::Refactor
    } else if EXPLAIN.iter().any(|k| lower.contains(k)) {
        CodingTaskType::Explain
    } else if EDIT.iter().any(|k| lower.contains(k)) {
        CodingTaskType::Edit
    } else {
        CodingTaskType::Create
    }
}

fn file_reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w./-]+\.[A-Za-z0-9]{1,8}").unwrap())
}

/// Pulls the first filename-like token (`calc.py`, `src/lib.rs`) out of an
/// utterance. Trailing punctuation from ordinary prose (`calc.py.`) is
/// stripped.
fn extract_file_reference(text: &str) -> Option<String> {
    let m = file_reference_re().find(text)?;
    Some(m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
}

fn language_from_extension(path: &str) -> Option<String> {
    path.rsplit('.').next().map(|ext| ext.to_lowercase())
}

fn default_action(tool: Tool) -> &'static str {
    match tool {
        Tool::Git => "status",
        Tool::Shell => "run",
        Tool::File => "read",
        Tool::Sqlite => "schema",
    }
}

fn permission_category(tool: Tool, action: &str) -> PermissionCategory {
    match (tool, action) {
        (Tool::File, "write") => PermissionCategory::FileWrite,
        (Tool::File, "delete") => PermissionCategory::FileDelete,
        (Tool::Shell, "run") => PermissionCategory::Shell,
        (Tool::Shell, "mkdir") => PermissionCategory::DirectoryCreate,
        (Tool::Git, "commit") | (Tool::Git, "push") => PermissionCategory::GitWrite,
        _ => PermissionCategory::Batch,
    }
}
