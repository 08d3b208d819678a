use super::{empty_response, send_json};
use crate::llm::{Completion, CompletionOptions, LlmProvider, Message, ProviderName, TokenUsage};
use crate::types::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_MODEL: &str = "gpt-4o-mini";
const GLM_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const GLM_MODEL: &str = "glm-4-flash";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Any backend speaking the Chat Completions protocol. OpenAI itself and GLM use it.
pub struct OpenAiCompatibleProvider {
    name: ProviderName,
    client: Client,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        name: ProviderName,
        client: Client,
        api_key: Option<String>,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: default_model.into(),
            timeout,
        }
    }

    pub fn openai(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self::new(ProviderName::Openai, client, api_key, OPENAI_BASE_URL, OPENAI_MODEL, timeout)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

pub fn glm_provider(client: Client, api_key: Option<String>, timeout: Duration) -> OpenAiCompatibleProvider {
    OpenAiCompatibleProvider::new(ProviderName::Glm, client, api_key, GLM_BASE_URL, GLM_MODEL, timeout)
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::NotConfigured(self.name.to_string()))?;
        let model = options.model.as_deref().unwrap_or(&self.default_model);

        let body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
        });

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(api_key)
            .json(&body);
        let response: ChatResponse = send_json(self.name, request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| empty_response(self.name))?;

        let usage = response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();
        // Priced by the requested model; responses may name a dated snapshot.
        Ok(Completion::new(self.name, model, content, usage))
    }
}
