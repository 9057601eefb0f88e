mod ollama;

pub use ollama::OllamaAdapter;

use crate::error::ForgeError;
use std::path::Path;
use tokio::sync::watch;

/// Thin capability consumed by the Lifecycle Manager: load a model file at a
/// context size, produce tokens for a prompt, stream tokens, unload. This is
/// the only seam through which the orchestration core talks to the external
/// native inference engine; no hidden global state, each `load` is
/// independent.
#[async_trait::async_trait]
pub trait EngineAdapter: Send + Sync {
    async fn load(&self, path: &Path, opts: LoadOptions) -> Result<EngineHandle, ForgeError>;

    async fn generate(
        &self,
        engine: &EngineHandle,
        prompt: &str,
        opts: GenerateOptions<'_>,
    ) -> Result<String, ForgeError>;

    async fn unload(&self, engine: EngineHandle) -> Result<(), ForgeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub context_size: usize,
    pub max_tokens: usize,
    pub n_threads: Option<usize>,
    pub extra_layers: usize,
}

/// An opaque handle to a loaded model. Carries only what's needed to address
/// the model again through the adapter; the Lifecycle Manager pairs this
/// with `Role`, `loadedAt`, `lastUsedAt`, `estimatedMB`.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    pub id: uuid::Uuid,
    pub model_name: String,
}

pub struct GenerateOptions<'a> {
    pub max_tokens: usize,
    pub temperature: f32,
    pub stop: &'a [String],
    pub on_token: Option<Box<dyn FnMut(&str) + Send>>,
    pub cancel: watch::Receiver<bool>,
}

impl<'a> GenerateOptions<'a> {
    pub fn new(max_tokens: usize, temperature: f32, cancel: watch::Receiver<bool>) -> Self {
        Self { max_tokens, temperature, stop: &[], on_token: None, cancel }
    }
}
