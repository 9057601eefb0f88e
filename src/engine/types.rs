use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// A tag drawn from `{Router, Coder, Algorithm}`. Extensible: new roles are
/// new tags plus a Lifecycle policy entry — no open inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Router,
    Coder,
    Algorithm,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Router => write!(f, "router"),
            Role::Coder => write!(f, "coder"),
            Role::Algorithm => write!(f, "algorithm"),
        }
    }
}

/// Static per-role policy. Held by the Lifecycle Manager, never mutated at
/// runtime.
#[derive(Debug, Clone)]
pub struct Policy {
    pub always_resident: bool,
    pub idle_evict_after: Option<std::time::Duration>,
    pub memory_estimate_mb: usize,
    pub context_size: usize,
    pub max_tokens: usize,
    pub default_temperature: f32,
    pub model_path: String,
}

/// An opaque handle paired with its `Role`, `modelPath`, `loadedAt`,
/// `lastUsedAt`, `estimatedMB`. Exists only while the Lifecycle Manager's
/// map entry for its role is live.
#[derive(Debug, Clone)]
pub struct LoadedEngine {
    pub handle: crate::adapter::EngineHandle,
    pub role: Role,
    pub model_path: String,
    pub loaded_at: Instant,
    pub last_used_at: Instant,
    pub estimated_mb: usize,
}

/// The categorical meaning of one utterance as classified by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    ToolCall,
    SimpleAnswer,
    CodingTask,
    AlgorithmTask,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    Git,
    Shell,
    File,
    Sqlite,
}

impl std::fmt::Display for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tool::Git => write!(f, "git"),
            Tool::Shell => write!(f, "shell"),
            Tool::File => write!(f, "file"),
            Tool::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Immutable classification record. `(intent=ToolCall) <=> (tool != None)`
/// is an invariant checked by `IntentResult::new` and exercised in tests
/// (checked here rather than trusted at every call site).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
    pub tool: Option<Tool>,
    pub params: HashMap<String, String>,
    pub escalate_to: Option<Role>,
    pub fallback_used: bool,
}

impl IntentResult {
    pub fn new(
        intent: Intent,
        confidence: f32,
        tool: Option<Tool>,
        params: HashMap<String, String>,
        escalate_to: Option<Role>,
        fallback_used: bool,
    ) -> Self {
        debug_assert!((0.0..=1.0).contains(&confidence));
        debug_assert_eq!(intent == Intent::ToolCall, tool.is_some());
        Self { intent, confidence: confidence.clamp(0.0, 1.0), tool, params, escalate_to, fallback_used }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingTaskType {
    Create,
    Edit,
    Refactor,
    Fix,
    Explain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizeFor {
    Time,
    Space,
    Readability,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodingTask {
    pub task_type: CodingTaskType,
    pub target_files: Vec<String>,
    pub instructions: String,
    pub existing_code: HashMap<String, String>,
    pub language: Option<String>,
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmTask {
    pub target_files: Vec<String>,
    pub instructions: String,
    pub existing_code: HashMap<String, String>,
    pub language: Option<String>,
    pub constraints: Vec<String>,
    pub expected_complexity: Option<String>,
    pub optimize_for: OptimizeFor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CodingOutput {
    Files(HashMap<String, String>),
    Edits { blocks: Vec<EditBlock>, needs_algorithm_specialist: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeResult {
    pub output: CodingOutput,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    pub time: String,
    pub space: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub files: HashMap<String, String>,
    pub complexity_analysis: ComplexityAnalysis,
    pub rationale: String,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// A line-anchored substitution in a text file.
///
/// Invariants: `1 <= start_line <= end_line <= fileLineCount`; no two
/// blocks in a list overlap by line range; when `old_content` is non-empty
/// it must equal the file's current content on `[start_line,end_line]` at
/// validation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBlock {
    pub start_line: usize,
    pub end_line: usize,
    pub old_content: String,
    pub new_content: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    ToolCall,
    CodeGen,
    AlgorithmGen,
    SimpleAnswer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub step_type: StepType,
    pub description: String,
    pub params: HashMap<String, String>,
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskStep {
    /// Legal transitions: `Pending -> InProgress -> {Completed, Failed,
    /// Skipped}`. Any other transition is an error and must not be
    /// silently coerced.
    pub fn transition(&mut self, to: StepStatus) -> Result<(), String> {
        let ok = matches!(
            (self.status, to),
            (StepStatus::Pending, StepStatus::InProgress)
                | (StepStatus::Pending, StepStatus::Skipped)
                | (StepStatus::InProgress, StepStatus::Completed)
                | (StepStatus::InProgress, StepStatus::Failed)
                | (StepStatus::InProgress, StepStatus::Skipped)
        );
        if !ok {
            return Err(format!("illegal transition {:?} -> {:?}", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub steps: Vec<TaskStep>,
    pub execution_order: Vec<String>,
    pub is_sequential: bool,
}

impl TaskPlan {
    pub fn step_mut(&mut self, id: &str) -> Option<&mut TaskStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn step(&self, id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn is_done(&self) -> bool {
        self.steps.iter().all(|s| s.is_terminal())
    }
}

/// `{tool, action, success, output, error}`. `output`'s schema is keyed by
/// `(tool, action)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub action: String,
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionCategory {
    FileWrite,
    FileDelete,
    Shell,
    GitWrite,
    Install,
    DirectoryCreate,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub category: PermissionCategory,
    pub description: String,
    pub preview: Option<String>,
    pub destructive: bool,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    AllowOnce,
    AllowBatch,
    Deny,
}
