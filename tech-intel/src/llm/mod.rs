//! Completion backends behind one trait, plus the registry that picks one.

pub mod pricing;
pub mod providers;
pub mod registry;
pub mod usage;

use crate::types::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use pricing::calculate_cost;
pub use registry::{LlmProviderRegistry, ProviderInfo, USAGE_OPERATION};
pub use usage::{summarize_usage, UsageSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Claude,
    Openai,
    Gemini,
    Glm,
    Ollama,
}

impl ProviderName {
    pub const ALL: [ProviderName; 5] = [
        ProviderName::Claude,
        ProviderName::Openai,
        ProviderName::Gemini,
        ProviderName::Glm,
        ProviderName::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Claude => "claude",
            ProviderName::Openai => "openai",
            ProviderName::Gemini => "gemini",
            ProviderName::Glm => "glm",
            ProviderName::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown LLM provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ProviderName::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Joins the system messages; most APIs take them apart from the conversation.
pub(crate) fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages.iter().filter(|m| m.role != Role::System).collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, rest)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Overrides the provider's default model.
    pub model: Option<String>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
            model: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
    /// USD, from the static price table.
    pub cost: f64,
    pub provider: ProviderName,
}

impl Completion {
    pub fn new(provider: ProviderName, model: impl Into<String>, content: String, usage: TokenUsage) -> Self {
        let model = model.into();
        let cost = calculate_cost(&model, usage.input_tokens, usage.output_tokens);
        Self { content, usage, model, cost, provider }
    }
}

/// A completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Current availability, without I/O.
    fn is_available(&self) -> bool;

    /// Re-evaluates availability. Providers that need a reachability probe override this.
    async fn check_availability(&self) -> bool {
        self.is_available()
    }

    fn default_model(&self) -> &str;

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("Claude".parse::<ProviderName>().unwrap(), ProviderName::Claude);
        assert_eq!(" ollama ".parse::<ProviderName>().unwrap(), ProviderName::Ollama);
        assert!("watson".parse::<ProviderName>().is_err());
    }

    #[test]
    fn system_messages_are_split_out() {
        let messages = vec![
            Message::system("be terse"),
            Message::user("hello"),
            Message::system("answer in JSON"),
        ];
        let (system, rest) = split_system(&messages);
        assert_eq!(system.as_deref(), Some("be terse\n\nanswer in JSON"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "hello");
    }

    #[test]
    fn completion_prices_known_models() {
        let usage = TokenUsage { input_tokens: 1_000_000, output_tokens: 1_000_000 };
        let completion = Completion::new(ProviderName::Openai, "gpt-4o-mini", "hi".into(), usage);
        assert!((completion.cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn token_total_saturates() {
        let usage = TokenUsage { input_tokens: u32::MAX, output_tokens: 10 };
        assert_eq!(usage.total(), u32::MAX);
    }
}
