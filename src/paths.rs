use std::path::PathBuf;
use std::sync::OnceLock;

static FORGE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the tool's home directory (`~/.codeforge/`).
/// Supports a `$CODEFORGE_HOME` env override. Cached via `OnceLock`.
pub fn forge_home() -> &'static PathBuf {
    FORGE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("CODEFORGE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codeforge")
    })
}

/// `~/.codeforge/config/`
pub fn config_dir() -> PathBuf {
    forge_home().join("config")
}

/// `~/.codeforge/data/`
pub fn data_dir() -> PathBuf {
    forge_home().join("data")
}

/// `~/.codeforge/logs/`
pub fn logs_dir() -> PathBuf {
    forge_home().join("logs")
}
