use crate::engine::types::{Decision, PermissionCategory, PermissionRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedPermissions {
    #[serde(default)]
    batch_allows: HashSet<String>,
}

/// The single component that asks the user for approval before a side
/// effect. `Read` side-effects never prompt. Writes require a prompt
/// unless the current session has an active `AllowBatch` for the same
/// category. Destructive operations always prompt, even within a batch.
pub struct PermissionGate {
    session_batch_allows: HashSet<PermissionCategory>,
    project_file: Option<PathBuf>,
    require_confirmation: bool,
    prompt: Box<dyn Fn(&PermissionRequest) -> Decision + Send + Sync>,
}

impl PermissionGate {
    pub fn new(
        project_file: Option<PathBuf>,
        require_confirmation: bool,
        prompt: Box<dyn Fn(&PermissionRequest) -> Decision + Send + Sync>,
    ) -> Self {
        Self { session_batch_allows: HashSet::new(), project_file, require_confirmation, prompt }
    }

    pub fn is_destructive_category(category: PermissionCategory) -> bool {
        matches!(category, PermissionCategory::FileDelete | PermissionCategory::Shell | PermissionCategory::GitWrite)
    }

    pub fn request(&mut self, req: PermissionRequest) -> Decision {
        if !self.require_confirmation {
            // requireConfirmation=false fails any write instead of
            // silently skipping the prompt.
            return Decision::Deny;
        }

        let destructive = req.destructive || Self::is_destructive_category(req.category);
        if !destructive && self.session_batch_allows.contains(&req.category) {
            return Decision::AllowBatch;
        }

        let decision = (self.prompt)(&req);
        if decision == Decision::AllowBatch && !destructive {
            self.session_batch_allows.insert(req.category);
        }
        decision
    }

    pub fn clear_session(&mut self) {
        self.session_batch_allows.clear();
    }

    pub fn persist_batch_allow(&self, category: PermissionCategory) -> anyhow::Result<()> {
        let Some(path) = &self.project_file else { return Ok(()) };
        let mut persisted = load_persisted(path).unwrap_or_default();
        persisted.batch_allows.insert(format!("{category:?}"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&persisted)?)?;
        Ok(())
    }
}

fn load_persisted(path: &Path) -> anyhow::Result<PersistedPermissions> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// The gate may fold multiple directory creations in a single
/// `mkdir -p a b/c d` into one batch prompt.
pub fn fold_mkdir_paths(paths: &[String]) -> PermissionRequest {
    PermissionRequest {
        category: PermissionCategory::DirectoryCreate,
        description: format!("create {} director{}", paths.len(), if paths.len() == 1 { "y" } else { "ies" }),
        preview: Some(paths.join(", ")),
        destructive: false,
        batch_id: Some("mkdir-batch".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(require_confirmation: bool, decision: Decision) -> PermissionGate {
        PermissionGate::new(None, require_confirmation, Box::new(move |_| decision))
    }

    #[test]
    fn require_confirmation_false_denies_instead_of_skipping_the_prompt() {
        let mut g = gate(false, Decision::AllowOnce);
        let req = PermissionRequest {
            category: PermissionCategory::FileWrite,
            description: "write a.txt".to_string(),
            preview: None,
            destructive: false,
            batch_id: None,
        };
        assert_eq!(g.request(req), Decision::Deny);
    }

    #[test]
    fn batch_allow_is_reused_for_the_same_category() {
        let mut g = gate(true, Decision::AllowBatch);
        let req = || PermissionRequest {
            category: PermissionCategory::FileWrite,
            description: "write".to_string(),
            preview: None,
            destructive: false,
            batch_id: None,
        };
        assert_eq!(g.request(req()), Decision::AllowBatch);
        // second call should not re-prompt; our fake closure always returns
        // AllowBatch too, but the point is the cached allow short-circuits.
        assert!(g.session_batch_allows.contains(&PermissionCategory::FileWrite));
        assert_eq!(g.request(req()), Decision::AllowBatch);
    }

    #[test]
    fn destructive_category_always_prompts_even_with_an_active_batch_allow() {
        let mut g = gate(true, Decision::AllowOnce);
        let write_req = PermissionRequest {
            category: PermissionCategory::FileWrite,
            description: "write".to_string(),
            preview: None,
            destructive: false,
            batch_id: None,
        };
        g.session_batch_allows.insert(write_req.category);

        let delete_req = PermissionRequest {
            category: PermissionCategory::FileDelete,
            description: "delete a.txt".to_string(),
            preview: None,
            destructive: true,
            batch_id: None,
        };
        // Even though FileWrite has a batch allow, FileDelete is destructive
        // and is not in the allow set, so it must still call the prompt.
        assert_eq!(g.request(delete_req), Decision::AllowOnce);
    }

    #[test]
    fn read_effects_are_expected_to_bypass_the_gate_entirely() {
        // The gate itself has no Read category; callers never construct a
        // PermissionRequest for Read side effects, which is how "never
        // prompt" is enforced at the call site (see tool_exec dispatch).
        assert!(!matches!(PermissionCategory::FileWrite, PermissionCategory::Batch));
    }
}
