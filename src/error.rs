use std::fmt;

/// The exhaustive set of error kinds callers can branch on. Anything that
/// doesn't fit one of these is an `anyhow::Error` bubbled straight to the
/// process boundary.
#[derive(Debug, Clone)]
pub enum ForgeError {
    NotFound(String),
    ResourceExhausted(String),
    Timeout(String),
    PermissionDenied(String),
    Forbidden(String),
    UnknownTool(String),
    UnknownAction { tool: String, action: String },
    SchemaMismatch(String),
    ValidationFailed(String),
    SubprocessFailed { command: String, exit_code: Option<i32>, stderr: String },
    Cancelled(String),
}

impl ForgeError {
    /// Recoverable kinds trigger at most one retry with a clarified prompt
    /// everything else fails the step outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ForgeError::SchemaMismatch(_) | ForgeError::ValidationFailed(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ForgeError::NotFound(_) => "NotFound",
            ForgeError::ResourceExhausted(_) => "ResourceExhausted",
            ForgeError::Timeout(_) => "Timeout",
            ForgeError::PermissionDenied(_) => "PermissionDenied",
            ForgeError::Forbidden(_) => "Forbidden",
            ForgeError::UnknownTool(_) => "UnknownTool",
            ForgeError::UnknownAction { .. } => "UnknownAction",
            ForgeError::SchemaMismatch(_) => "SchemaMismatch",
            ForgeError::ValidationFailed(_) => "ValidationFailed",
            ForgeError::SubprocessFailed { .. } => "SubprocessFailed",
            ForgeError::Cancelled(_) => "Cancelled",
        }
    }
}

impl fmt::Display for ForgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgeError::NotFound(what) => write!(f, "not found: {what}"),
            ForgeError::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
            ForgeError::Timeout(what) => write!(f, "timed out: {what}"),
            ForgeError::PermissionDenied(what) => write!(f, "permission denied: {what}"),
            ForgeError::Forbidden(what) => write!(f, "forbidden: {what}"),
            ForgeError::UnknownTool(tool) => write!(f, "unknown tool: {tool}"),
            ForgeError::UnknownAction { tool, action } => {
                write!(f, "unknown action '{action}' for tool '{tool}'")
            }
            ForgeError::SchemaMismatch(what) => write!(f, "schema mismatch: {what}"),
            ForgeError::ValidationFailed(what) => write!(f, "validation failed: {what}"),
            ForgeError::SubprocessFailed { command, exit_code, stderr } => write!(
                f,
                "subprocess '{command}' failed (exit {:?}): {stderr}",
                exit_code
            ),
            ForgeError::Cancelled(what) => write!(f, "cancelled: {what}"),
        }
    }
}

impl std::error::Error for ForgeError {}

pub type ForgeResult<T> = Result<T, ForgeError>;
