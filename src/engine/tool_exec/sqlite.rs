use super::required_str;
use crate::error::{ForgeError, ForgeResult};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn resolve_db_path(root: &Path, raw: &str) -> PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() { p.to_path_buf() } else { root.join(p) }
}

fn is_select_like(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_ascii_uppercase();
    trimmed.starts_with("SELECT") || trimmed.starts_with("PRAGMA") || trimmed.starts_with("EXPLAIN") || trimmed.starts_with("WITH")
}

fn dml_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|REPLACE)\b").unwrap())
}

/// Matches on whole-word statement keywords, not a raw substring search, so
/// a column named `deleted_at` in `CREATE TABLE ... (deleted_at TEXT)`
/// doesn't trip the `DELETE` check.
fn contains_dml(sql: &str) -> bool {
    dml_re().is_match(sql)
}

/// Opens read-only against a database that already exists; falls back to
/// read-write when the file is absent so tests and scratch databases can
/// still be created from scratch.
fn open_for_read(path: &Path) -> ForgeResult<Connection> {
    let flags = if path.exists() { OpenFlags::SQLITE_OPEN_READ_ONLY } else { OpenFlags::default() };
    Connection::open_with_flags(path, flags).map_err(|e| ForgeError::ValidationFailed(e.to_string()))
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => json!(String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => json!(format!("<blob:{} bytes>", b.len())),
    }
}

fn rows_to_json(stmt: &mut rusqlite::Statement<'_>) -> ForgeResult<Vec<Value>> {
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let rows = stmt
        .query_map([], |row| {
            let mut obj = Map::new();
            for (i, name) in columns.iter().enumerate() {
                obj.insert(name.clone(), value_to_json(row.get_ref(i)?));
            }
            Ok(Value::Object(obj))
        })
        .map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(|e| ForgeError::ValidationFailed(e.to_string()))
}

/// With no `sql` param, introspects the schema via `sqlite_master`. With a
/// `sql` param, applies it as DDL — DML keywords are rejected, this action
/// only ever changes structure.
pub async fn schema(root: &Path, params: Value) -> ForgeResult<Value> {
    let path = resolve_db_path(root, &required_str(&params, "path")?);
    let sql = params.get("sql").and_then(|v| v.as_str()).map(|s| s.to_string());

    tokio::task::spawn_blocking(move || -> ForgeResult<Value> {
        if let Some(sql) = sql {
            if contains_dml(&sql) {
                return Err(ForgeError::ValidationFailed("sqlite.schema only accepts DDL; DML statements are rejected".to_string()));
            }
            let conn = Connection::open(&path).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
            conn.execute_batch(&sql).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
            return Ok(json!({ "path": path.to_string_lossy(), "applied": true }));
        }

        let conn = open_for_read(&path)?;
        let mut stmt = conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type IN ('table','view') ORDER BY name")
            .map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
        let tables = rows_to_json(&mut stmt)?;
        Ok(json!({ "path": path.to_string_lossy(), "tables": tables }))
    })
    .await
    .map_err(|e| ForgeError::ValidationFailed(e.to_string()))?
}

/// Read-only on an existing database — only `SELECT`/`PRAGMA`/`EXPLAIN`
/// statements run. Against a database file that does not exist yet, any
/// statement runs, since there is no prior state to protect.
pub async fn query(root: &Path, params: Value) -> ForgeResult<Value> {
    let path = resolve_db_path(root, &required_str(&params, "path")?);
    let sql = required_str(&params, "sql")?;
    let db_existed = path.exists();

    if db_existed && !is_select_like(&sql) {
        return Err(ForgeError::ValidationFailed(
            "sqlite.query is read-only against an existing database; only SELECT/PRAGMA/EXPLAIN are allowed".to_string(),
        ));
    }

    tokio::task::spawn_blocking(move || -> ForgeResult<Value> {
        let conn = open_for_read(&path)?;
        if is_select_like(&sql) {
            let mut stmt = conn.prepare(&sql).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
            let rows = rows_to_json(&mut stmt)?;
            Ok(json!({ "path": path.to_string_lossy(), "rows": rows }))
        } else {
            let affected = conn.execute(&sql, []).map_err(|e| ForgeError::ValidationFailed(e.to_string()))?;
            Ok(json!({ "path": path.to_string_lossy(), "rows_affected": affected }))
        }
    })
    .await
    .map_err(|e| ForgeError::ValidationFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_statements_are_recognized_as_read_only() {
        assert!(is_select_like("  select * from t"));
        assert!(is_select_like("PRAGMA table_info(t)"));
        assert!(!is_select_like("insert into t values (1)"));
    }

    #[test]
    fn schema_rejects_dml_keywords() {
        assert!(contains_dml("INSERT INTO t VALUES (1)"));
        assert!(!contains_dml("CREATE TABLE t (id INTEGER)"));
    }

    #[test]
    fn schema_does_not_mistake_a_column_name_for_a_dml_keyword() {
        assert!(!contains_dml("CREATE TABLE items (id INTEGER, deleted_at TEXT)"));
        assert!(contains_dml("DELETE FROM items WHERE id = 1"));
    }
}
