use super::providers::{glm_provider, ClaudeProvider, GeminiProvider, OllamaProvider, OpenAiCompatibleProvider};
use super::{Completion, CompletionOptions, LlmProvider, Message, ProviderName};
use crate::config::LlmSettings;
use crate::fetcher::build_client;
use crate::store::Store;
use crate::types::{Error, FetchConfig, LlmError, LlmUsageRecord, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operation tag written on every usage record.
pub const USAGE_OPERATION: &str = "summarize";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: ProviderName,
    pub available: bool,
    pub default_model: String,
    pub is_default: bool,
}

/// Named completion backends with default selection and a free fallback.
pub struct LlmProviderRegistry {
    providers: HashMap<ProviderName, Arc<dyn LlmProvider>>,
    default_provider: RwLock<ProviderName>,
    fallback: ProviderName,
    ollama: Option<Arc<OllamaProvider>>,
    store: Arc<dyn Store>,
}

impl LlmProviderRegistry {
    /// Empty registry defaulting to `claude` with `ollama` as fallback.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: RwLock::new(ProviderName::Claude),
            fallback: ProviderName::Ollama,
            ollama: None,
            store,
        }
    }

    pub fn with_default(mut self, name: ProviderName) -> Self {
        *self.default_provider.get_mut() = name;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        debug!("Registering LLM provider {}", provider.name());
        self.providers.insert(provider.name(), provider);
    }

    /// Builds all five providers from settings and probes their availability.
    pub async fn from_settings(settings: &LlmSettings, fetch: &FetchConfig, store: Arc<dyn Store>) -> Result<Self> {
        let client = build_client(fetch)?;
        let cloud_timeout = fetch.cloud_llm_timeout();

        let ollama = Arc::new(OllamaProvider::new(
            client.clone(),
            settings.ollama_base_url.clone(),
            settings.ollama_model.clone(),
            fetch.local_llm_timeout(),
            fetch.probe_timeout(),
        ));

        let mut registry = Self::new(store)
            .with_default(settings.default_provider.unwrap_or(ProviderName::Claude))
            .with_provider(Arc::new(ClaudeProvider::new(
                client.clone(),
                settings.anthropic_api_key.clone(),
                cloud_timeout,
            )))
            .with_provider(Arc::new(OpenAiCompatibleProvider::openai(
                client.clone(),
                settings.openai_api_key.clone(),
                cloud_timeout,
            )))
            .with_provider(Arc::new(GeminiProvider::new(
                client.clone(),
                settings.google_api_key.clone(),
                cloud_timeout,
            )))
            .with_provider(Arc::new(glm_provider(client, settings.glm_api_key.clone(), cloud_timeout)))
            .with_provider(ollama.clone());
        registry.ollama = Some(ollama);

        registry.refresh_availability().await;
        Ok(registry)
    }

    /// Re-runs each provider's availability check.
    pub async fn refresh_availability(&self) -> Vec<ProviderInfo> {
        for provider in self.providers.values() {
            let available = provider.check_availability().await;
            info!(
                "LLM provider {}: {}",
                provider.name(),
                if available { "available" } else { "unavailable" }
            );
        }
        self.list_providers().await
    }

    pub async fn default_provider(&self) -> ProviderName {
        *self.default_provider.read().await
    }

    /// Only an available provider can become the default.
    pub async fn set_default_provider(&self, name: ProviderName) -> Result<()> {
        if self.available(name).is_none() {
            return Err(Error::InvalidInput(format!("provider {} is not available", name)));
        }
        *self.default_provider.write().await = name;
        info!("Default LLM provider set to {}", name);
        Ok(())
    }

    /// Providers in fixed order.
    pub async fn list_providers(&self) -> Vec<ProviderInfo> {
        let default = self.default_provider().await;
        ProviderName::ALL
            .into_iter()
            .filter_map(|name| self.providers.get(&name))
            .map(|p| ProviderInfo {
                name: p.name(),
                available: p.is_available(),
                default_model: p.default_model().to_string(),
                is_default: p.name() == default,
            })
            .collect()
    }

    /// Models pulled on the local server.
    pub async fn list_local_models(&self) -> std::result::Result<Vec<String>, LlmError> {
        match &self.ollama {
            Some(ollama) => ollama.list_models().await,
            None => Err(LlmError::NotConfigured(ProviderName::Ollama.to_string())),
        }
    }

    fn available(&self, name: ProviderName) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(&name).filter(|p| p.is_available()).cloned()
    }

    /// Requested provider, else the default; the fallback stands in for an unavailable choice.
    async fn resolve(&self, requested: Option<ProviderName>) -> std::result::Result<Arc<dyn LlmProvider>, LlmError> {
        let wanted = match requested {
            Some(name) => name,
            None => self.default_provider().await,
        };
        if let Some(provider) = self.available(wanted) {
            return Ok(provider);
        }

        warn!("LLM provider {} unavailable, trying {}", wanted, self.fallback);
        self.available(self.fallback).ok_or(LlmError::NoProviderAvailable)
    }

    /// Runs one completion and appends a usage record for it.
    pub async fn complete(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
        requested: Option<ProviderName>,
    ) -> std::result::Result<Completion, LlmError> {
        let provider = self.resolve(requested).await?;

        let completion = match provider.complete(messages, options).await {
            Ok(completion) => completion,
            Err(e) if e.triggers_fallback() && provider.name() != self.fallback => {
                let Some(fallback) = self.available(self.fallback) else {
                    return Err(e);
                };
                warn!("{} failed ({}), retrying once on {}", provider.name(), e, fallback.name());
                // The model override belongs to the provider that failed.
                let options = CompletionOptions { model: None, ..options.clone() };
                fallback.complete(messages, &options).await?
            }
            Err(e) => return Err(e),
        };

        debug!(
            "{} / {} used {} tokens (${:.6})",
            completion.provider,
            completion.model,
            completion.usage.total(),
            completion.cost
        );
        self.record_usage(&completion).await;
        Ok(completion)
    }

    async fn record_usage(&self, completion: &Completion) {
        let record = LlmUsageRecord {
            id: Uuid::new_v4(),
            provider: completion.provider.to_string(),
            model: completion.model.clone(),
            tokens_in: i32::try_from(completion.usage.input_tokens).unwrap_or(i32::MAX),
            tokens_out: i32::try_from(completion.usage.output_tokens).unwrap_or(i32::MAX),
            cost: completion.cost,
            operation: USAGE_OPERATION.to_string(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_usage(record).await {
            warn!("Failed to record LLM usage: {}", e);
        }
    }
}
