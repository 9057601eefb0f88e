use super::required_str;
use crate::error::{ForgeError, ForgeResult};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// `shell.run` output beyond this many bytes per stream is truncated and
/// the result carries a `truncated: true` marker.
const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Commands matching any of these are refused outright — no prompt, no
/// override. Recursive deletes at the filesystem root, fork bombs, and raw
/// device writes are unrecoverable or can take the host down.
const FORBIDDEN_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -fr /",
    ":(){ :|:& };:",
    "mkfs",
    "> /dev/sda",
    "dd if=/dev/zero of=/dev/",
    "dd if=/dev/random of=/dev/",
];

fn is_forbidden(cmd: &str) -> bool {
    let collapsed: String = cmd.split_whitespace().collect::<Vec<_>>().join(" ");
    FORBIDDEN_PATTERNS.iter().any(|p| collapsed.contains(p))
}

pub async fn run(root: &Path, params: Value, timeout_sec: u64) -> ForgeResult<Value> {
    let cmd = required_str(&params, "command")?;
    if is_forbidden(&cmd) {
        return Err(ForgeError::Forbidden(format!("command matches a forbidden pattern: {cmd}")));
    }

    let child = Command::new("sh")
        .arg("-c")
        .arg(&cmd)
        .current_dir(root)
        .output();

    let output = timeout(Duration::from_secs(timeout_sec), child)
        .await
        .map_err(|_| ForgeError::Timeout(format!("command exceeded {timeout_sec}s: {cmd}")))?
        .map_err(|e| ForgeError::SubprocessFailed { command: cmd.clone(), exit_code: None, stderr: e.to_string() })?;

    let (stdout, stdout_truncated) = cap_output(&output.stdout);
    let (stderr, stderr_truncated) = cap_output(&output.stderr);

    Ok(json!({
        "command": cmd,
        "exit_code": output.status.code(),
        "stdout": stdout,
        "stderr": stderr,
        "truncated": stdout_truncated || stderr_truncated,
    }))
}

fn cap_output(bytes: &[u8]) -> (String, bool) {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        (String::from_utf8_lossy(bytes).to_string(), false)
    } else {
        (String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).to_string(), true)
    }
}

/// `{paths: [...], parents?: bool}` — `parents` defaults to `true` since a
/// non-recursive `mkdir` has little use inside a workspace tree; a path
/// that already exists as a directory is treated as already created, not
/// an error.
pub async fn mkdir(root: &Path, params: Value) -> ForgeResult<Value> {
    let raw_paths = params
        .get("paths")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>())
        .filter(|p| !p.is_empty())
        .or_else(|| required_str(&params, "path").ok().map(|p| vec![p]))
        .ok_or_else(|| ForgeError::ValidationFailed("missing required parameter 'paths'".to_string()))?;
    let parents = params.get("parents").and_then(|v| v.as_bool()).unwrap_or(true);

    let mut created = Vec::new();
    for raw in &raw_paths {
        let path = if Path::new(raw).is_absolute() { Path::new(raw).to_path_buf() } else { root.join(raw) };
        let result = if parents { tokio::fs::create_dir_all(&path).await } else { tokio::fs::create_dir(&path).await };
        match result {
            Ok(()) => created.push(path.to_string_lossy().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => created.push(path.to_string_lossy().to_string()),
            Err(e) => return Err(ForgeError::ValidationFailed(e.to_string())),
        }
    }
    Ok(json!({ "created": created }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursive_root_delete_is_forbidden() {
        assert!(is_forbidden("rm -rf /"));
        assert!(is_forbidden("sudo   rm   -rf   /"));
    }

    #[test]
    fn fork_bomb_is_forbidden() {
        assert!(is_forbidden(":(){ :|:& };:"));
    }

    #[test]
    fn ordinary_commands_are_not_forbidden() {
        assert!(!is_forbidden("cargo test"));
        assert!(!is_forbidden("rm -rf target"));
    }
}
