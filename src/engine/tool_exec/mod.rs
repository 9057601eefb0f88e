mod file;
mod git;
mod shell;
mod sqlite;

use crate::engine::types::{Decision, Tool, ToolResult};
use crate::error::{ForgeError, ForgeResult};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Read,
    Write,
    Network,
    Destructive,
}

/// Maps a raw tool-name alias onto a canonical `Tool`. Total for known
/// aliases; unknown tool names fall through to `None` so the caller can
/// surface `UnknownTool`.
pub fn normalize_tool(raw: &str) -> Option<Tool> {
    Some(match raw {
        "git" => Tool::Git,
        "shell" | "terminal" | "sh" | "bash" => Tool::Shell,
        "file" | "fs" => Tool::File,
        "sqlite" | "sql" | "db" => Tool::Sqlite,
        _ => return None,
    })
}

/// Maps a raw action alias onto the canonical action name for `tool`.
/// Unknown actions under a known tool fall through to `None` (the caller
/// surfaces `UnknownAction`, never a silent fallback to coding).
pub fn normalize_action(tool: Tool, raw: &str) -> Option<&'static str> {
    Some(match (tool, raw) {
        (Tool::Git, "status") => "status",
        (Tool::Git, "commit") => "commit",
        (Tool::Git, "push") => "push",
        (Tool::Shell, "run" | "execute" | "exec") => "run",
        (Tool::Shell, "mkdir") => "mkdir",
        (Tool::File, "read" | "cat") => "read",
        (Tool::File, "write") => "write",
        (Tool::File, "list" | "ls") => "list",
        (Tool::File, "delete" | "rm") => "delete",
        (Tool::Sqlite, "schema") => "schema",
        (Tool::Sqlite, "query") => "query",
        _ => return None,
    })
}

/// Resolves a single flat alias (e.g. `read`, `terminal`, `ls`) straight to
/// its canonical `tool.action` string. Idempotent: re-normalizing an
/// already-canonical string returns the same string.
pub fn normalize_alias(raw: &str) -> Option<String> {
    if let Some((tool_part, action_part)) = raw.split_once('.') {
        let tool = normalize_tool(tool_part)?;
        let action = normalize_action(tool, action_part)?;
        return Some(format!("{tool}.{action}"));
    }
    let (tool, action) = match raw {
        "read" | "cat" => (Tool::File, "read"),
        "write" => (Tool::File, "write"),
        "ls" | "list" => (Tool::File, "list"),
        "delete" | "rm" => (Tool::File, "delete"),
        "terminal" | "run" | "execute" | "exec" => (Tool::Shell, "run"),
        "mkdir" => (Tool::Shell, "mkdir"),
        "status" => (Tool::Git, "status"),
        "commit" => (Tool::Git, "commit"),
        "push" => (Tool::Git, "push"),
        "schema" => (Tool::Sqlite, "schema"),
        "query" => (Tool::Sqlite, "query"),
        _ => return None,
    };
    Some(format!("{tool}.{action}"))
}

pub fn side_effect(tool: Tool, action: &str) -> SideEffect {
    match (tool, action) {
        (Tool::Git, "status") => SideEffect::Read,
        (Tool::Git, "commit") => SideEffect::Write,
        (Tool::Git, "push") => SideEffect::Destructive,
        (Tool::Shell, "run") => SideEffect::Write,
        (Tool::Shell, "mkdir") => SideEffect::Write,
        (Tool::File, "read") => SideEffect::Read,
        (Tool::File, "list") => SideEffect::Read,
        (Tool::File, "write") => SideEffect::Write,
        (Tool::File, "delete") => SideEffect::Destructive,
        (Tool::Sqlite, "schema") => SideEffect::Read,
        (Tool::Sqlite, "query") => SideEffect::Read,
        _ => SideEffect::Write,
    }
}

/// The only component that touches the outside world (files, shell, git).
/// Never invokes the Permission Gate directly; callers pass a `Decision`
/// obtained from it.
pub struct ToolExecutor {
    pub root: PathBuf,
    pub allow_shell: bool,
    pub shell_timeout_sec: u64,
}

impl ToolExecutor {
    pub fn new(root: PathBuf, allow_shell: bool, shell_timeout_sec: u64) -> Self {
        Self { root, allow_shell, shell_timeout_sec }
    }

    pub async fn execute(
        &self,
        tool: Tool,
        action: &str,
        params: Value,
        decision: Decision,
    ) -> ForgeResult<ToolResult> {
        let effect = side_effect(tool, action);
        if effect != SideEffect::Read && decision == Decision::Deny {
            return Err(ForgeError::PermissionDenied(format!("{tool}.{action}")));
        }

        let result = match (tool, action) {
            (Tool::Git, "status") => git::status(&self.root).await,
            (Tool::Git, "commit") => git::commit(&self.root, params).await,
            (Tool::Git, "push") => git::push(&self.root, params).await,
            (Tool::Shell, "run") => {
                if !self.allow_shell {
                    return Err(ForgeError::Forbidden("shell execution disabled by config".to_string()));
                }
                shell::run(&self.root, params, self.shell_timeout_sec).await
            }
            (Tool::Shell, "mkdir") => shell::mkdir(&self.root, params).await,
            (Tool::File, "read") => file::read(&self.root, params).await,
            (Tool::File, "write") => file::write(&self.root, params).await,
            (Tool::File, "list") => file::list(&self.root, params).await,
            (Tool::File, "delete") => file::delete(&self.root, params).await,
            (Tool::Sqlite, "schema") => sqlite::schema(&self.root, params).await,
            (Tool::Sqlite, "query") => sqlite::query(&self.root, params).await,
            _ => return Err(ForgeError::UnknownAction { tool: tool.to_string(), action: action.to_string() }),
        };

        match result {
            Ok(output) => Ok(ToolResult { tool: tool.to_string(), action: action.to_string(), success: true, output, error: None }),
            Err(e) => Ok(ToolResult {
                tool: tool.to_string(),
                action: action.to_string(),
                success: false,
                output: Value::Null,
                error: Some(e.to_string()),
            }),
        }
    }
}

pub(crate) fn required_str(params: &Value, key: &str) -> ForgeResult<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ForgeError::ValidationFailed(format!("missing required parameter '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_normalization_resolves_known_shorthand() {
        assert_eq!(normalize_alias("read").as_deref(), Some("file.read"));
        assert_eq!(normalize_alias("terminal").as_deref(), Some("shell.run"));
        assert_eq!(normalize_alias("ls").as_deref(), Some("file.list"));
    }

    #[test]
    fn alias_normalization_is_idempotent() {
        for raw in ["read", "terminal", "ls", "file.read", "shell.run"] {
            let once = normalize_alias(raw).unwrap();
            let twice = normalize_alias(&once).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unknown_tool_name_yields_none() {
        assert!(normalize_tool("frobnicate").is_none());
    }

    #[test]
    fn unknown_action_under_known_tool_yields_none_not_a_fallback() {
        assert!(normalize_action(Tool::Git, "teleport").is_none());
    }

    #[test]
    fn git_push_is_classified_destructive() {
        assert_eq!(side_effect(Tool::Git, "push"), SideEffect::Destructive);
    }
}
