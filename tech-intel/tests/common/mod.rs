#![allow(dead_code)]

use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Once};
use tech_intel::llm::providers::MockProvider;
use tech_intel::llm::ProviderName;
use tech_intel::{Fetcher, LlmProviderRegistry, MemoryStore, Store, Summarizer};
use tech_intel::types::*;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("tech_intel=debug")
            .with_test_writer()
            .try_init();
    });
}

pub fn memory_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

/// Fetcher without per-host spacing, since every mock lives on localhost.
pub fn test_fetcher() -> Arc<Fetcher> {
    let config = FetchConfig {
        user_agent: "TechIntelTest/1.0".to_string(),
        min_host_interval_ms: 0,
        ..FetchConfig::default()
    };
    Arc::new(Fetcher::new(config).expect("client builds"))
}

pub async fn add_source(store: &Arc<dyn Store>, new: NewSource) -> Source {
    store.create_source(new).await.expect("source created")
}

pub fn raw_item(external_id: &str, title: &str) -> NewRawItem {
    NewRawItem {
        external_id: external_id.to_string(),
        title: title.to_string(),
        content: format!("Body of {}", title),
        url: format!("https://example.com/{}", external_id),
        author: Some("octocat".to_string()),
        published_at: Utc::now(),
        metadata: json!({}),
    }
}

pub fn analysis_reply(summary: &str, categories: &[&str], relevance: f64, urgency: &str) -> String {
    json!({
        "summary": summary,
        "categories": categories,
        "tags": ["test"],
        "relevanceScore": relevance,
        "urgencyLevel": urgency,
    })
    .to_string()
}

/// Registry with a single available mock as `claude`.
pub fn mock_registry(store: &Arc<dyn Store>, mock: Arc<MockProvider>) -> Arc<LlmProviderRegistry> {
    Arc::new(
        LlmProviderRegistry::new(store.clone())
            .with_default(ProviderName::Claude)
            .with_provider(mock),
    )
}

pub fn summarizer(store: &Arc<dyn Store>, mock: Arc<MockProvider>) -> Arc<Summarizer> {
    Arc::new(Summarizer::new(mock_registry(store, mock), store.clone()))
}
