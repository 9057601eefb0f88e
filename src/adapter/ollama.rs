use super::{EngineAdapter, EngineHandle, GenerateOptions, LoadOptions};
use crate::error::ForgeError;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::codec::{FramedRead, LinesCodec};

/// HTTP-backed `EngineAdapter` for a local model-serving daemon. `load` is a
/// keep-alive preload call, `generate` is a chat call (streaming when
/// `on_token` is supplied), `unload` sets `keep_alive` to zero. The daemon
/// itself owns the actual model residency; this adapter's `EngineHandle`
/// is bookkeeping only.
pub struct OllamaAdapter {
    http: Client,
    base_url: String,
}

impl OllamaAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn model_name_from_path(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }
}

#[async_trait::async_trait]
impl EngineAdapter for OllamaAdapter {
    async fn load(&self, path: &Path, _opts: LoadOptions) -> Result<EngineHandle, ForgeError> {
        let model = Self::model_name_from_path(path);
        let url = format!("{}/api/chat", self.base_url);
        let req = ChatRequest {
            model: model.clone(),
            messages: vec![],
            stream: Some(false),
            format: None,
            keep_alive: Some("30m".to_string()),
        };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ForgeError::NotFound(format!("engine at {model}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ForgeError::NotFound(format!(
                "engine {model} failed to load ({status}): {text}"
            )));
        }
        Ok(EngineHandle { id: uuid::Uuid::new_v4(), model_name: model })
    }

    async fn generate(
        &self,
        engine: &EngineHandle,
        prompt: &str,
        mut opts: GenerateOptions<'_>,
    ) -> Result<String, ForgeError> {
        let url = format!("{}/api/chat", self.base_url);
        let messages = vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }];

        if opts.on_token.is_none() {
            let req = ChatRequest {
                model: engine.model_name.clone(),
                messages,
                stream: Some(false),
                format: None,
                keep_alive: None,
            };
            let resp = self.http.post(&url).json(&req).send().await.map_err(|e| {
                ForgeError::SubprocessFailed {
                    command: "ollama chat".to_string(),
                    exit_code: None,
                    stderr: e.to_string(),
                }
            })?;
            if *opts.cancel.borrow() {
                return Err(ForgeError::Cancelled("generation cancelled".to_string()));
            }
            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(ForgeError::SubprocessFailed {
                    command: "ollama chat".to_string(),
                    exit_code: Some(status.as_u16() as i32),
                    stderr: text,
                });
            }
            let payload: ChatResponse = resp
                .json()
                .await
                .map_err(|e| ForgeError::SchemaMismatch(format!("ollama response: {e}")))?;
            return Ok(payload.message.content);
        }

        let req = ChatRequest {
            model: engine.model_name.clone(),
            messages,
            stream: Some(true),
            format: None,
            keep_alive: None,
        };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ForgeError::SubprocessFailed {
                command: "ollama chat".to_string(),
                exit_code: None,
                stderr: e.to_string(),
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ForgeError::SubprocessFailed {
                command: "ollama chat".to_string(),
                exit_code: Some(status.as_u16() as i32),
                stderr: text,
            });
        }

        let stream = resp
            .bytes_stream()
            .map(|item| item.map_err(std::io::Error::other));
        let reader = tokio_util::io::StreamReader::new(stream);
        let mut lines = FramedRead::new(reader, LinesCodec::new());

        let mut full = String::new();
        let on_token = opts.on_token.as_mut().expect("checked above");
        while let Some(line) = lines.next().await {
            if *opts.cancel.borrow() {
                return Err(ForgeError::Cancelled("generation cancelled".to_string()));
            }
            let line = line.map_err(|e| ForgeError::SchemaMismatch(format!("stream error: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            let payload: ChatResponse = serde_json::from_str(&line)
                .map_err(|e| ForgeError::SchemaMismatch(format!("ollama stream line: {e}")))?;
            on_token(&payload.message.content);
            full.push_str(&payload.message.content);
        }
        Ok(full)
    }

    async fn unload(&self, engine: EngineHandle) -> Result<(), ForgeError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = ChatRequest {
            model: engine.model_name.clone(),
            messages: vec![],
            stream: Some(false),
            format: None,
            keep_alive: Some("0".to_string()),
        };
        let resp = self.http.post(&url).json(&req).send().await.map_err(|e| {
            ForgeError::SubprocessFailed {
                command: "ollama unload".to_string(),
                exit_code: None,
                stderr: e.to_string(),
            }
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ForgeError::SubprocessFailed {
                command: "ollama unload".to_string(),
                exit_code: Some(status.as_u16() as i32),
                stderr: text,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}
