use crate::error::{ForgeError, ForgeResult};
use serde_json::{json, Value};
use std::path::Path;
use tokio::process::Command;

async fn run_git(root: &Path, args: &[&str]) -> ForgeResult<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .map_err(|e| ForgeError::SubprocessFailed { command: format!("git {}", args.join(" ")), exit_code: None, stderr: e.to_string() })
}

/// `git status --porcelain=v1 -z`, split on NUL and bucketed by the two
/// status-code columns (index, worktree) into `staged`/`modified`/
/// `untracked`. A path can appear in both `staged` and `modified` when it
/// carries changes in both columns (e.g. `MM`).
pub async fn status(root: &Path) -> ForgeResult<Value> {
    let output = run_git(root, &["status", "--porcelain=v1", "-z"]).await?;
    if !output.status.success() {
        return Err(ForgeError::SubprocessFailed {
            command: "git status".to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    let mut staged = Vec::new();
    let mut modified = Vec::new();
    let mut untracked = Vec::new();
    for entry in raw.split('\0').filter(|e| !e.is_empty()) {
        let mut chars = entry.chars();
        let index_status = chars.next().unwrap_or(' ');
        let worktree_status = chars.next().unwrap_or(' ');
        let path = entry.get(2..).unwrap_or("").trim_start().to_string();
        if path.is_empty() {
            continue;
        }
        if index_status == '?' && worktree_status == '?' {
            untracked.push(path);
            continue;
        }
        if index_status != ' ' && index_status != '?' {
            staged.push(path.clone());
        }
        if worktree_status != ' ' && worktree_status != '?' {
            modified.push(path);
        }
    }
    Ok(json!({ "staged": staged, "modified": modified, "untracked": untracked }))
}

/// `git add <files...>` (or `git add -A` when `files` is absent/empty) `&&
/// git commit -m <message> && git rev-parse HEAD`.
pub async fn commit(root: &Path, params: Value) -> ForgeResult<Value> {
    let message = params.get("message").and_then(|v| v.as_str()).unwrap_or("codeforge commit");
    let files: Vec<String> = params
        .get("files")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut add_args: Vec<&str> = vec!["add"];
    if files.is_empty() {
        add_args.push("-A");
    } else {
        add_args.extend(files.iter().map(String::as_str));
    }
    let add = run_git(root, &add_args).await?;
    if !add.status.success() {
        return Err(ForgeError::SubprocessFailed {
            command: format!("git {}", add_args.join(" ")),
            exit_code: add.status.code(),
            stderr: String::from_utf8_lossy(&add.stderr).to_string(),
        });
    }

    let commit = run_git(root, &["commit", "-m", message]).await?;
    if !commit.status.success() {
        return Err(ForgeError::SubprocessFailed {
            command: "git commit".to_string(),
            exit_code: commit.status.code(),
            stderr: String::from_utf8_lossy(&commit.stderr).to_string(),
        });
    }

    let rev = run_git(root, &["rev-parse", "HEAD"]).await?;
    let sha = String::from_utf8_lossy(&rev.stdout).trim().to_string();
    Ok(json!({ "sha": sha, "message": message }))
}

/// Always refused: pushing touches shared remote state outside this
/// assistant's local, single-machine scope.
pub async fn push(_root: &Path, _params: Value) -> ForgeResult<Value> {
    Err(ForgeError::Forbidden("git push is not permitted; this assistant operates on the local repository only".to_string()))
}
