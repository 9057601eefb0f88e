use super::required_str;
use crate::error::{ForgeError, ForgeResult};
use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;

/// Resolves `raw` against `root`, rejecting `..` traversal. Absolute paths
/// are accepted as-is; relative paths resolve against `root` as a default,
/// not a jail: any readable/writable path is accepted, and the
/// filesystem root is only a default for relative paths.
fn resolve(root: &Path, raw: &str) -> ForgeResult<PathBuf> {
    if raw.is_empty() {
        return Err(ForgeError::ValidationFailed("empty path".to_string()));
    }
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { root.join(candidate) };
    if joined.components().filter(|c| matches!(c, Component::ParentDir)).count()
        > joined.components().filter(|c| matches!(c, Component::Normal(_))).count()
    {
        return Err(ForgeError::ValidationFailed(format!("path escapes filesystem root: {raw}")));
    }
    Ok(joined)
}

pub async fn read(root: &Path, params: Value) -> ForgeResult<Value> {
    let path = resolve(root, &required_str(&params, "path")?)?;
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| ForgeError::NotFound(format!("{}: {e}", path.display())))?;
    Ok(json!({ "path": path.to_string_lossy(), "content": content }))
}

pub async fn list(root: &Path, params: Value) -> ForgeResult<Value> {
    let raw = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
    let path = resolve(root, raw)?;
    let mut read_dir = fs::read_dir(&path)
        .await
        .map_err(|e| ForgeError::NotFound(format!("{}: {e}", path.display())))?;
    let mut entries = Vec::new();
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| ForgeError::NotFound(e.to_string()))? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        entries.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "is_dir": is_dir,
        }));
    }
    Ok(json!({ "path": path.to_string_lossy(), "entries": entries }))
}

/// Backs up the file before overwriting, then writes atomically via a
/// staged temp file renamed into place.
pub async fn write(root: &Path, params: Value) -> ForgeResult<Value> {
    let path = resolve(root, &required_str(&params, "path")?)?;
    let content = required_str(&params, "content")?;

    let backup_path = if path.exists() {
        Some(backup_before_write(root, &path).await?)
    } else {
        None
    };

    let parent = path.parent().unwrap_or(root).to_path_buf();
    fs::create_dir_all(&parent).await.map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;

    let staged = NamedTempFile::new_in(&parent).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
    fs::write(staged.path(), content.as_bytes()).await.map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
    staged.persist(&path).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;

    Ok(json!({
        "path": path.to_string_lossy(),
        "bytes_written": content.len(),
        "backup_path": backup_path.map(|p| p.to_string_lossy().to_string()),
    }))
}

pub async fn delete(root: &Path, params: Value) -> ForgeResult<Value> {
    let path = resolve(root, &required_str(&params, "path")?)?;
    let backup_path = backup_before_write(root, &path).await?;
    fs::remove_file(&path).await.map_err(|e| ForgeError::NotFound(format!("{}: {e}", path.display())))?;
    Ok(json!({ "path": path.to_string_lossy(), "backup_path": backup_path.to_string_lossy() }))
}

/// Copies `path` to `<root>/.backups/<relpath>.<iso8601>.bak` before a
/// destructive edit.
async fn backup_before_write(root: &Path, path: &Path) -> ForgeResult<PathBuf> {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let backup_path = root.join(".backups").join(format!("{}.{}.bak", rel.to_string_lossy(), timestamp));
    if let Some(parent) = backup_path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
    }
    fs::copy(path, &backup_path).await.map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
    Ok(backup_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_rejects_traversal_outside_root() {
        let root = Path::new("/tmp/workspace");
        assert!(resolve(root, "../../etc/passwd").is_err());
    }

    #[test]
    fn resolve_accepts_relative_path_under_root() {
        let root = Path::new("/tmp/workspace");
        let resolved = resolve(root, "src/main.rs").unwrap();
        assert_eq!(resolved, root.join("src/main.rs"));
    }

    #[test]
    fn resolve_accepts_absolute_path_as_is() {
        let root = Path::new("/tmp/workspace");
        let resolved = resolve(root, "/etc/hosts").unwrap();
        assert_eq!(resolved, PathBuf::from("/etc/hosts"));
    }
}
