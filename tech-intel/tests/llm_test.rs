mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tech_intel::llm::providers::{ClaudeProvider, MockProvider, OllamaProvider, OpenAiCompatibleProvider};
use tech_intel::llm::{CompletionOptions, LlmProvider, LlmProviderRegistry, Message, ProviderName};
use tech_intel::types::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prompt() -> Vec<Message> {
    vec![Message::system("You are terse."), Message::user("Summarize this.")]
}

#[tokio::test]
async fn default_provider_serves_and_records_usage() {
    init_tracing();
    let store = memory_store();
    let claude = Arc::new(MockProvider::new(ProviderName::Claude).with_reply("hello").with_usage(1000, 500));
    let registry = mock_registry(&store, claude.clone());

    let completion = registry.complete(&prompt(), &CompletionOptions::default(), None).await.unwrap();
    assert_eq!(completion.content, "hello");
    assert_eq!(completion.provider, ProviderName::Claude);
    assert_eq!(claude.calls(), 1);

    let usage = store.usage_since(chrono::Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].provider, "claude");
    assert_eq!(usage[0].tokens_in, 1000);
    assert_eq!(usage[0].tokens_out, 500);
    assert_eq!(usage[0].operation, "summarize");
}

#[tokio::test]
async fn unavailable_default_falls_back_to_local() {
    init_tracing();
    let store = memory_store();
    let claude = Arc::new(MockProvider::new(ProviderName::Claude).unavailable());
    let ollama = Arc::new(MockProvider::new(ProviderName::Ollama).with_reply("local answer"));
    let registry = LlmProviderRegistry::new(store.clone())
        .with_provider(claude.clone())
        .with_provider(ollama.clone());

    let completion = registry.complete(&prompt(), &CompletionOptions::default(), None).await.unwrap();
    assert_eq!(completion.provider, ProviderName::Ollama);
    assert_eq!(completion.content, "local answer");
    assert_eq!(claude.calls(), 0);

    let usage = store.usage_since(chrono::Utc::now() - chrono::Duration::hours(1)).await.unwrap();
    assert_eq!(usage[0].provider, "ollama");
}

#[tokio::test]
async fn nothing_available_fails_without_usage() {
    init_tracing();
    let store = memory_store();
    let registry = LlmProviderRegistry::new(store.clone())
        .with_provider(Arc::new(MockProvider::new(ProviderName::Claude).unavailable()))
        .with_provider(Arc::new(MockProvider::new(ProviderName::Ollama).unavailable()));

    let err = registry.complete(&prompt(), &CompletionOptions::default(), None).await.unwrap_err();
    assert_eq!(err, LlmError::NoProviderAvailable);
    assert!(store.usage_since(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH).await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_limited_call_retries_once_on_fallback() {
    init_tracing();
    let store = memory_store();
    let claude = Arc::new(
        MockProvider::new(ProviderName::Claude).with_error(LlmError::RateLimited("claude".to_string())),
    );
    let ollama = Arc::new(MockProvider::new(ProviderName::Ollama).with_reply("rescued"));
    let registry = LlmProviderRegistry::new(store.clone())
        .with_provider(claude.clone())
        .with_provider(ollama.clone());

    let options = CompletionOptions {
        model: Some("claude-3-haiku-20240307".to_string()),
        ..CompletionOptions::default()
    };
    let completion = registry.complete(&prompt(), &options, None).await.unwrap();
    assert_eq!(completion.content, "rescued");
    assert_eq!(completion.model, "mock-model");
    assert_eq!(claude.calls(), 1);
    assert_eq!(ollama.calls(), 1);

    let usage = store.usage_since(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH).await.unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].provider, "ollama");
}

#[tokio::test]
async fn upstream_errors_do_not_fall_back() {
    init_tracing();
    let store = memory_store();
    let claude = Arc::new(MockProvider::new(ProviderName::Claude).with_error(LlmError::Upstream {
        provider: "claude".to_string(),
        message: "HTTP 500".to_string(),
    }));
    let ollama = Arc::new(MockProvider::new(ProviderName::Ollama));
    let registry = LlmProviderRegistry::new(store.clone())
        .with_provider(claude)
        .with_provider(ollama.clone());

    let err = registry.complete(&prompt(), &CompletionOptions::default(), None).await.unwrap_err();
    assert!(matches!(err, LlmError::Upstream { .. }));
    assert_eq!(ollama.calls(), 0);
}

#[tokio::test]
async fn default_can_only_move_to_available_provider() {
    init_tracing();
    let store = memory_store();
    let registry = LlmProviderRegistry::new(store)
        .with_provider(Arc::new(MockProvider::new(ProviderName::Claude)))
        .with_provider(Arc::new(MockProvider::new(ProviderName::Openai).unavailable()))
        .with_provider(Arc::new(MockProvider::new(ProviderName::Gemini)));

    let err = registry.set_default_provider(ProviderName::Openai).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(registry.default_provider().await, ProviderName::Claude);

    registry.set_default_provider(ProviderName::Gemini).await.unwrap();
    assert_eq!(registry.default_provider().await, ProviderName::Gemini);

    let listed = registry.list_providers().await;
    let names: Vec<ProviderName> = listed.iter().map(|p| p.name).collect();
    assert_eq!(names, vec![ProviderName::Claude, ProviderName::Openai, ProviderName::Gemini]);
    assert!(listed.iter().find(|p| p.name == ProviderName::Gemini).unwrap().is_default);
}

#[tokio::test]
async fn claude_speaks_messages_api() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "You are terse.",
            "messages": [{ "role": "user", "content": "Summarize this." }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{ "type": "text", "text": "{\"summary\":\"ok\"}" }],
            "usage": { "input_tokens": 1000, "output_tokens": 500 },
            "model": "claude-3-5-sonnet-20241022"
        })))
        .mount(&server)
        .await;

    let provider = ClaudeProvider::new(reqwest::Client::new(), Some("key".to_string()), Duration::from_secs(5))
        .with_base_url(server.uri());
    let completion = provider.complete(&prompt(), &CompletionOptions::default()).await.unwrap();

    assert_eq!(completion.content, "{\"summary\":\"ok\"}");
    assert_eq!(completion.usage.total(), 1500);
    assert!((completion.cost - 0.0105).abs() < 1e-12);
}

#[tokio::test]
async fn openai_prices_the_requested_model_not_the_snapshot() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer key"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{ "message": { "role": "assistant", "content": "done" } }],
            "usage": { "prompt_tokens": 1_000_000, "completion_tokens": 1_000_000 }
        })))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::openai(reqwest::Client::new(), Some("key".to_string()), Duration::from_secs(5))
        .with_base_url(server.uri());
    let completion = provider.complete(&prompt(), &CompletionOptions::default()).await.unwrap();

    assert_eq!(completion.content, "done");
    assert_eq!(completion.model, "gpt-4o-mini");
    assert!((completion.cost - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn claude_rate_limit_maps_to_fallback_error() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let provider = ClaudeProvider::new(reqwest::Client::new(), Some("key".to_string()), Duration::from_secs(5))
        .with_base_url(server.uri());
    let err = provider.complete(&prompt(), &CompletionOptions::default()).await.unwrap_err();
    assert_eq!(err, LlmError::RateLimited("claude".to_string()));
    assert!(err.triggers_fallback());
}

#[tokio::test]
async fn missing_key_means_unavailable() {
    let provider = ClaudeProvider::new(reqwest::Client::new(), None, Duration::from_secs(5));
    assert!(!provider.is_available());
    let err = provider.complete(&prompt(), &CompletionOptions::default()).await.unwrap_err();
    assert_eq!(err, LlmError::NotConfigured("claude".to_string()));
}

#[tokio::test]
async fn ollama_probe_and_chat() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{ "name": "llama3:8b" }, { "name": "qwen2.5:7b" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3:8b", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3:8b",
            "message": { "role": "assistant", "content": "local reply" },
            "prompt_eval_count": 40,
            "eval_count": 10
        })))
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(
        reqwest::Client::new(),
        server.uri(),
        None,
        Duration::from_secs(5),
        Duration::from_secs(2),
    );
    assert!(!provider.is_available());
    assert!(provider.check_availability().await);
    assert_eq!(provider.list_models().await.unwrap(), vec!["llama3:8b", "qwen2.5:7b"]);

    let completion = provider.complete(&prompt(), &CompletionOptions::default()).await.unwrap();
    assert_eq!(completion.content, "local reply");
    assert_eq!(completion.cost, 0.0);
    assert_eq!(completion.usage.total(), 50);
}
