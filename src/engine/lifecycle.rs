use crate::adapter::{EngineAdapter, LoadOptions};
use crate::config::Config;
use crate::error::{ForgeError, ForgeResult};
use crate::engine::types::{LoadedEngine, Policy, Role};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Budget-enforcing, LRU-evicting cache of loaded inference engines. Owns
/// `loaded: Map<Role, LoadedEngine>`, static `policies: Map<Role, Policy>`,
/// and a configured `budgetMB`.
///
/// State is protected by a single lock; the lock is released around the
/// (blocking, seconds-long) adapter `load`/`generate`/`unload` calls so
/// inference never starves other roles' lookups. Per-role
/// semaphores, acquired above the lock, enforce the single-writer
/// discipline on each engine handle.
pub struct LifecycleManager {
    adapter: Arc<dyn EngineAdapter>,
    policies: HashMap<Role, Policy>,
    budget_mb: usize,
    loaded: Mutex<HashMap<Role, LoadedEngine>>,
    write_locks: HashMap<Role, Arc<Semaphore>>,
}

pub struct MemoryUsage {
    pub total_mb: usize,
    pub per_role: HashMap<Role, usize>,
}

impl LifecycleManager {
    pub fn new(adapter: Arc<dyn EngineAdapter>, config: &Config) -> Self {
        let mut policies = HashMap::new();
        let mut write_locks = HashMap::new();
        for role in [Role::Router, Role::Coder, Role::Algorithm] {
            let cfg = config.models.get(&role);
            let policy = Policy {
                always_resident: cfg.map(|c| c.always_resident).unwrap_or(role == Role::Router),
                idle_evict_after: cfg
                    .map(|c| c.idle_evict_after_sec)
                    .filter(|s| *s > 0)
                    .map(std::time::Duration::from_secs),
                memory_estimate_mb: cfg.map(|c| c.memory_estimate_mb).unwrap_or(2048),
                context_size: cfg.map(|c| c.context_size).unwrap_or(4096),
                max_tokens: cfg.map(|c| c.max_tokens).unwrap_or(1024),
                default_temperature: cfg.map(|c| c.temperature).unwrap_or(0.2),
                model_path: cfg.map(|c| c.path.clone()).unwrap_or_default(),
            };
            policies.insert(role, policy);
            write_locks.insert(role, Arc::new(Semaphore::new(1)));
        }
        Self {
            adapter,
            policies,
            budget_mb: config.memory_budget_mb,
            loaded: Mutex::new(HashMap::new()),
            write_locks,
        }
    }

    pub fn policy(&self, role: Role) -> &Policy {
        self.policies.get(&role).expect("every Role has a policy entry")
    }

    pub fn write_semaphore(&self, role: Role) -> Arc<Semaphore> {
        self.write_locks.get(&role).expect("every Role has a semaphore").clone()
    }

    /// If already present, updates `lastUsedAt` and returns the handle's
    /// role/model without reloading. Else computes the role's memory need,
    /// calls `enforceBudget`, then loads.
    pub async fn ensure_loaded(&self, role: Role) -> ForgeResult<()> {
        {
            let mut loaded = self.loaded.lock().await;
            if let Some(engine) = loaded.get_mut(&role) {
                engine.last_used_at = Instant::now();
                return Ok(());
            }
        }

        let policy = self.policy(role).clone_for_load();
        if policy.model_path.is_empty() {
            return Err(ForgeError::NotFound(format!("no model configured for role {role}")));
        }
        if policy.memory_estimate_mb > self.budget_mb {
            return Err(ForgeError::ResourceExhausted(format!(
                "role {role} needs {}MB but budget is {}MB",
                policy.memory_estimate_mb, self.budget_mb
            )));
        }

        self.enforce_budget(policy.memory_estimate_mb).await?;

        let handle = self
            .adapter
            .load(
                &PathBuf::from(&policy.model_path),
                LoadOptions {
                    context_size: policy.context_size,
                    max_tokens: policy.max_tokens,
                    n_threads: None,
                    extra_layers: 0,
                },
            )
            .await?;

        let mut loaded = self.loaded.lock().await;
        let now = Instant::now();
        loaded.insert(
            role,
            LoadedEngine {
                handle,
                role,
                model_path: policy.model_path.clone(),
                loaded_at: now,
                last_used_at: now,
                estimated_mb: policy.memory_estimate_mb,
            },
        );
        info!(%role, mb = policy.memory_estimate_mb, "engine loaded");
        Ok(())
    }

    pub async fn handle_for(&self, role: Role) -> Option<crate::adapter::EngineHandle> {
        let loaded = self.loaded.lock().await;
        loaded.get(&role).map(|e| e.handle.clone())
    }

    /// Idempotent; forbidden on always-resident roles (errors, never
    /// silently succeeds).
    pub async fn unload(&self, role: Role) -> ForgeResult<()> {
        if self.policy(role).always_resident {
            return Err(ForgeError::PermissionDenied(format!(
                "role {role} is always-resident and may not be unloaded"
            )));
        }
        self.unload_unchecked(role).await
    }

    async fn unload_unchecked(&self, role: Role) -> ForgeResult<()> {
        let engine = {
            let mut loaded = self.loaded.lock().await;
            loaded.remove(&role)
        };
        let Some(engine) = engine else {
            return Ok(());
        };
        self.adapter.unload(engine.handle).await?;
        info!(%role, "engine unloaded");
        Ok(())
    }

    pub async fn memory_usage(&self) -> MemoryUsage {
        let loaded = self.loaded.lock().await;
        let mut per_role = HashMap::new();
        let mut total = 0;
        for (role, engine) in loaded.iter() {
            per_role.insert(*role, engine.estimated_mb);
            total += engine.estimated_mb;
        }
        MemoryUsage { total_mb: total, per_role }
    }

    /// Unloads all engines, ignoring the always-resident restriction.
    pub async fn shutdown(&self) {
        let roles: Vec<Role> = {
            let loaded = self.loaded.lock().await;
            loaded.keys().copied().collect()
        };
        for role in roles {
            if let Err(e) = self.unload_unchecked(role).await {
                warn!(%role, error = %e, "error during shutdown unload");
            }
        }
    }

    /// 1. If `sum(loaded.estimatedMB) + needMB <= budgetMB`, return.
    /// 2. Order loaded engines by `lastUsedAt` ascending, skipping
    ///    always-resident.
    /// 3. Unload the head of the list, repeat until (1) holds or the list
    ///    is empty.
    /// 4. If still insufficient, fail with `ResourceExhausted`. Never
    ///    partially load; never evict the router.
    async fn enforce_budget(&self, need_mb: usize) -> ForgeResult<()> {
        loop {
            let current_total: usize = {
                let loaded = self.loaded.lock().await;
                loaded.values().map(|e| e.estimated_mb).sum()
            };
            if current_total + need_mb <= self.budget_mb {
                return Ok(());
            }

            let victim = {
                let loaded = self.loaded.lock().await;
                loaded
                    .values()
                    .filter(|e| !self.policy(e.role).always_resident)
                    .min_by_key(|e| e.last_used_at)
                    .map(|e| e.role)
            };

            match victim {
                Some(role) => {
                    self.unload_unchecked(role).await?;
                }
                None => {
                    return Err(ForgeError::ResourceExhausted(format!(
                        "cannot free {need_mb}MB within {}MB budget without evicting an always-resident role",
                        self.budget_mb
                    )));
                }
            }
        }
    }
}

impl Policy {
    fn clone_for_load(&self) -> Policy {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{EngineHandle, GenerateOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAdapter {
        loads: AtomicUsize,
        unloads: AtomicUsize,
    }

    #[async_trait]
    impl EngineAdapter for FakeAdapter {
        async fn load(&self, path: &std::path::Path, _opts: LoadOptions) -> ForgeResult<EngineHandle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(EngineHandle { id: uuid::Uuid::new_v4(), model_name: path.to_string_lossy().to_string() })
        }
        async fn generate(&self, _e: &EngineHandle, _p: &str, _o: GenerateOptions<'_>) -> ForgeResult<String> {
            Ok(String::new())
        }
        async fn unload(&self, _e: EngineHandle) -> ForgeResult<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config(budget_mb: usize) -> Config {
        let mut cfg = Config::default();
        cfg.memory_budget_mb = budget_mb;
        cfg
    }

    #[tokio::test]
    async fn router_is_always_resident_and_unload_is_rejected() {
        let adapter = Arc::new(FakeAdapter { loads: AtomicUsize::new(0), unloads: AtomicUsize::new(0) });
        let mgr = LifecycleManager::new(adapter, &test_config(16384));
        mgr.ensure_loaded(Role::Router).await.unwrap();
        assert!(mgr.unload(Role::Router).await.is_err());
    }

    #[tokio::test]
    async fn budget_exhaustion_never_partially_loads() {
        let adapter = Arc::new(FakeAdapter { loads: AtomicUsize::new(0), unloads: AtomicUsize::new(0) });
        let mut cfg = test_config(1000);
        cfg.models.get_mut(&Role::Coder).unwrap().memory_estimate_mb = 5000;
        let mgr = LifecycleManager::new(adapter, &cfg);
        let err = mgr.ensure_loaded(Role::Coder).await.unwrap_err();
        assert!(matches!(err, ForgeError::ResourceExhausted(_)));
        assert_eq!(mgr.memory_usage().await.total_mb, 0);
    }

    #[tokio::test]
    async fn lru_eviction_frees_the_least_recently_used_role() {
        let adapter = Arc::new(FakeAdapter { loads: AtomicUsize::new(0), unloads: AtomicUsize::new(0) });
        let mut cfg = test_config(6000);
        cfg.models.get_mut(&Role::Router).unwrap().memory_estimate_mb = 1500;
        cfg.models.get_mut(&Role::Coder).unwrap().memory_estimate_mb = 4000;
        cfg.models.get_mut(&Role::Algorithm).unwrap().memory_estimate_mb = 4000;
        let mgr = LifecycleManager::new(adapter, &cfg);

        mgr.ensure_loaded(Role::Router).await.unwrap();
        mgr.ensure_loaded(Role::Coder).await.unwrap();
        // Touch coder again so algorithm load must evict nothing newer than it.
        mgr.ensure_loaded(Role::Coder).await.unwrap();
        mgr.ensure_loaded(Role::Algorithm).await.unwrap();

        let usage = mgr.memory_usage().await;
        assert!(usage.per_role.contains_key(&Role::Router));
        assert!(usage.per_role.contains_key(&Role::Algorithm));
        assert!(!usage.per_role.contains_key(&Role::Coder));
        assert!(usage.total_mb <= 6000);
    }

    #[tokio::test]
    async fn unload_is_idempotent() {
        let adapter = Arc::new(FakeAdapter { loads: AtomicUsize::new(0), unloads: AtomicUsize::new(0) });
        let mgr = LifecycleManager::new(adapter, &test_config(16384));
        mgr.ensure_loaded(Role::Coder).await.unwrap();
        mgr.unload(Role::Coder).await.unwrap();
        mgr.unload(Role::Coder).await.unwrap();
    }
}
