use super::{empty_response, send_json, transport_error};
use crate::llm::{Completion, CompletionOptions, LlmProvider, Message, ProviderName, TokenUsage};
use crate::types::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_MODEL: &str = "llama3:8b";

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<LocalModel>,
}

#[derive(Debug, Deserialize)]
struct LocalModel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Local Ollama server. Free, and the designated fallback.
///
/// Availability comes from a probe of `/api/tags` and drops to false when a
/// call cannot connect.
pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    probe_timeout: Duration,
    available: AtomicBool,
}

impl OllamaProvider {
    pub fn new(client: Client, base_url: impl Into<String>, model: Option<String>, timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout,
            probe_timeout,
            available: AtomicBool::new(false),
        }
    }

    /// Names of the models pulled on the server.
    pub async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let request = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.probe_timeout);
        let tags: TagsResponse = send_json(self.name(), request).await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Ollama
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn check_availability(&self) -> bool {
        let reachable = match self.list_models().await {
            Ok(models) => {
                info!("Ollama reachable at {} with {} models", self.base_url, models.len());
                true
            }
            Err(e) => {
                debug!("Ollama probe failed: {}", e);
                false
            }
        };
        self.available.store(reachable, Ordering::SeqCst);
        reachable
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion, LlmError> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        let sent = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await;
        let raw = match sent {
            Ok(response) => response,
            Err(e) => {
                if e.is_connect() {
                    warn!("Ollama unreachable at {}, marking unavailable", self.base_url);
                    self.available.store(false, Ordering::SeqCst);
                }
                return Err(transport_error(self.name(), e));
            }
        };

        let status = raw.status();
        let text = raw.text().await.map_err(|e| transport_error(self.name(), e))?;
        if !status.is_success() {
            return Err(super::status_error(self.name(), status, &text));
        }
        let response: ChatResponse = serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
            provider: self.name().to_string(),
            message: e.to_string(),
        })?;

        let content = response
            .message
            .map(|m| m.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| empty_response(self.name()))?;
        let usage = TokenUsage {
            input_tokens: response.prompt_eval_count,
            output_tokens: response.eval_count,
        };
        Ok(Completion::new(self.name(), model, content, usage))
    }
}
