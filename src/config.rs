use crate::engine::types::Role;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Recognized configuration keys per role, loaded from `codeforge.toml` in
/// the current directory with struct defaults when absent.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub models: HashMap<Role, ModelPolicyConfig>,
    #[serde(default = "default_memory_budget_mb")]
    pub memory_budget_mb: usize,
    #[serde(default)]
    pub workspace_dir: Option<PathBuf>,
    #[serde(default = "default_require_confirmation")]
    pub require_confirmation: bool,
    #[serde(default = "default_generation_timeout_sec")]
    pub generation_timeout_sec: u64,
    #[serde(default = "default_allow_shell")]
    pub allow_shell: bool,
    #[serde(default = "default_url")]
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelPolicyConfig {
    pub path: String,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_memory_estimate_mb")]
    pub memory_estimate_mb: usize,
    #[serde(default)]
    pub always_resident: bool,
    #[serde(default = "default_idle_evict_after_sec")]
    pub idle_evict_after_sec: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_memory_budget_mb() -> usize {
    8192
}
fn default_require_confirmation() -> bool {
    true
}
fn default_generation_timeout_sec() -> u64 {
    300
}
fn default_allow_shell() -> bool {
    true
}
fn default_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_context_size() -> usize {
    4096
}
fn default_max_tokens() -> usize {
    1024
}
fn default_memory_estimate_mb() -> usize {
    2048
}
fn default_idle_evict_after_sec() -> u64 {
    600
}
fn default_temperature() -> f32 {
    0.2
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Path::new("codeforge.toml");
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut models = HashMap::new();
        models.insert(
            Role::Router,
            ModelPolicyConfig {
                path: "qwen2.5-coder:1.5b".to_string(),
                context_size: 2048,
                max_tokens: 256,
                memory_estimate_mb: 1536,
                always_resident: true,
                idle_evict_after_sec: 0,
                temperature: 0.1,
            },
        );
        models.insert(
            Role::Coder,
            ModelPolicyConfig {
                path: "qwen2.5-coder:7b".to_string(),
                context_size: 8192,
                max_tokens: 1536,
                memory_estimate_mb: 4608,
                always_resident: false,
                idle_evict_after_sec: 600,
                temperature: 0.2,
            },
        );
        models.insert(
            Role::Algorithm,
            ModelPolicyConfig {
                path: "deepseek-coder:6.7b".to_string(),
                context_size: 8192,
                max_tokens: 2048,
                memory_estimate_mb: 4096,
                always_resident: false,
                idle_evict_after_sec: 600,
                temperature: 0.1,
            },
        );
        Self {
            models,
            memory_budget_mb: default_memory_budget_mb(),
            workspace_dir: None,
            require_confirmation: default_require_confirmation(),
            generation_timeout_sec: default_generation_timeout_sec(),
            allow_shell: default_allow_shell(),
            url: default_url(),
        }
    }
}
