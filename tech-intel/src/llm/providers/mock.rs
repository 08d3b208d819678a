use crate::llm::{Completion, CompletionOptions, LlmProvider, Message, ProviderName, TokenUsage};
use crate::types::LlmError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted provider for development and tests.
///
/// Replies are consumed in order; once the script runs out every call gets
/// the default reply.
pub struct MockProvider {
    name: ProviderName,
    model: String,
    available: AtomicBool,
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    default_reply: String,
    usage: TokenUsage,
    response_delay: Duration,
    calls: AtomicUsize,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    pub fn new(name: ProviderName) -> Self {
        Self {
            name,
            model: "mock-model".to_string(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            default_reply: r#"{"summary":"Mock summary","categories":["tooling"],"tags":["mock"],"relevanceScore":0.5,"urgencyLevel":"normal"}"#.to_string(),
            usage: TokenUsage { input_tokens: 100, output_tokens: 50 },
            response_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.script.get_mut().push_back(Ok(reply.into()));
        self
    }

    pub fn with_error(mut self, error: LlmError) -> Self {
        self.script.get_mut().push_back(Err(error));
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = TokenUsage { input_tokens, output_tokens };
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Message lists of every call so far.
    pub async fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().await.push(messages.to_vec());

        if !self.response_delay.is_zero() {
            tokio::time::sleep(self.response_delay).await;
        }

        let next = self.script.lock().await.pop_front();
        let content = match next {
            Some(entry) => entry?,
            None => self.default_reply.clone(),
        };

        let model = options.model.clone().unwrap_or_else(|| self.model.clone());
        Ok(Completion::new(self.name, model, content, self.usage))
    }
}
