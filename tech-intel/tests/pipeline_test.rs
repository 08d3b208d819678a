mod common;

use chrono::{Duration, NaiveDate, Utc};
use common::*;
use serde_json::json;
use std::sync::Arc;
use tech_intel::llm::providers::MockProvider;
use tech_intel::llm::ProviderName;
use tech_intel::types::*;
use tech_intel::{CollectorDispatcher, CollectorRegistry, DigestGenerator, ProcessingScheduler, Store};
use tech_intel::collectors::GithubCollector;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tomorrow() -> NaiveDate {
    Utc::now().date_naive().succ_opt().unwrap()
}

async fn seed_items(store: &Arc<dyn Store>, count: usize) -> Source {
    let source = add_source(store, NewSource::new("Blog", SourceType::Rss, "https://example.com/feed")).await;
    for i in 0..count {
        let item = raw_item(&format!("item-{}", i), &format!("Item {}", i));
        assert!(store.insert_raw_item(source.id, item, Utc::now()).await.unwrap());
    }
    source
}

#[tokio::test]
async fn processing_analyzes_each_item_once() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 3).await;

    let mock = Arc::new(
        MockProvider::new(ProviderName::Claude)
            .with_reply(analysis_reply("First", &["Release", "release"], 0.9, "HIGH"))
            .with_reply("not json at all")
            .with_reply(format!("Here you go:\n```json\n{}\n```", analysis_reply("Third", &["ai"], 1.7, "low"))),
    );
    let scheduler = ProcessingScheduler::new(summarizer(&store, mock.clone()), 20);

    assert_eq!(scheduler.trigger(None).await.unwrap(), 3);
    assert_eq!(mock.calls(), 3);

    let items = store.list_processed_items(&Default::default()).await.unwrap();
    assert_eq!(items.len(), 3);
    let by_summary = |s: &str| items.iter().find(|v| v.item.summary.starts_with(s)).map(|v| &v.item);

    let first = by_summary("First").unwrap();
    assert_eq!(first.categories, vec!["release".to_string()]);
    assert_eq!(first.urgency_level, UrgencyLevel::High);

    let degraded = by_summary("not json").unwrap();
    assert_eq!(degraded.relevance_score, 0.5);
    assert_eq!(degraded.urgency_level, UrgencyLevel::Normal);
    assert!(degraded.categories.is_empty());

    let third = by_summary("Third").unwrap();
    assert_eq!(third.relevance_score, 1.0);

    // Nothing left to do on a second run.
    assert_eq!(scheduler.trigger(None).await.unwrap(), 0);
    assert_eq!(mock.calls(), 3);
    assert!(store.unprocessed_raw_items(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_items_stay_unprocessed() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 2).await;

    let mock = Arc::new(MockProvider::new(ProviderName::Claude).with_error(LlmError::Upstream {
        provider: "claude".to_string(),
        message: "HTTP 500".to_string(),
    }));
    let scheduler = ProcessingScheduler::new(summarizer(&store, mock), 20);

    assert_eq!(scheduler.trigger(None).await.unwrap(), 1);
    assert_eq!(store.unprocessed_raw_items(10).await.unwrap().len(), 1);
    assert_eq!(scheduler.trigger(None).await.unwrap(), 1);
    assert!(store.unprocessed_raw_items(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_trigger_during_batch_is_rejected() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 1).await;

    let mock = Arc::new(MockProvider::new(ProviderName::Claude).with_delay(std::time::Duration::from_millis(300)));
    let scheduler = Arc::new(ProcessingScheduler::new(summarizer(&store, mock), 20));

    let running = scheduler.clone();
    let batch = tokio::spawn(async move { running.run_cycle().await });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(scheduler.is_running());
    assert!(matches!(scheduler.trigger(None).await, Err(Error::AlreadyProcessing)));
    assert_eq!(scheduler.run_cycle().await, None);

    assert_eq!(batch.await.unwrap(), Some(1));
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.trigger(None).await.unwrap(), 0);
}

async fn processed(store: &Arc<dyn Store>, raw: &RawItem, categories: &[&str], relevance: f64, urgency: UrgencyLevel) -> ProcessedItem {
    let item = ProcessedItem {
        id: uuid::Uuid::new_v4(),
        raw_item_id: raw.id,
        summary: format!("Summary of {}", raw.title),
        categories: categories.iter().map(|c| c.to_string()).collect(),
        tags: vec!["tag".to_string()],
        relevance_score: relevance,
        urgency_level: urgency,
        sentiment: None,
        action_items: Vec::new(),
        llm_model: "mock-model".to_string(),
        llm_tokens_used: 150,
        llm_cost: 0.0,
        moderation_status: ModerationStatus::Pending,
        processed_at: Utc::now(),
    };
    assert!(store.insert_processed_item(item.clone()).await.unwrap());
    item
}

#[tokio::test]
async fn digest_is_skipped_when_nothing_qualifies() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 1).await;
    let raw = store.unprocessed_raw_items(1).await.unwrap().remove(0);
    processed(&store, &raw, &["news"], 0.1, UrgencyLevel::Normal).await;

    let digests = DigestGenerator::new(store.clone());
    assert!(digests.generate_for_date(tomorrow()).await.unwrap().is_none());
    assert!(store.get_digest_by_date(tomorrow()).await.unwrap().is_none());
}

#[tokio::test]
async fn digest_orders_sections_and_excludes_rejected() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 4).await;
    let raws = store.unprocessed_raw_items(10).await.unwrap();

    let security = processed(&store, &raws[0], &["security"], 0.4, UrgencyLevel::Normal).await;
    let release = processed(&store, &raws[1], &["release"], 0.9, UrgencyLevel::High).await;
    let ai = processed(&store, &raws[2], &["ai"], 0.8, UrgencyLevel::Critical).await;
    let rejected = processed(&store, &raws[3], &["news"], 0.9, UrgencyLevel::Normal).await;
    store.set_moderation(rejected.id, ModerationStatus::Rejected).await.unwrap();

    let digests = DigestGenerator::new(store.clone());
    let digest = digests.generate_for_date(tomorrow()).await.unwrap().unwrap();

    assert_eq!(digest.status, DigestStatus::Draft);
    assert_eq!(digest.items.len(), 3);
    let order: Vec<(uuid::Uuid, DigestSection)> = digest.items.iter().map(|i| (i.processed_item_id, i.section)).collect();
    assert_eq!(
        order,
        vec![
            (ai.id, DigestSection::Critical),
            (release.id, DigestSection::Releases),
            (security.id, DigestSection::Critical),
        ]
    );
    assert_eq!(digest.items.iter().map(|i| i.order).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert!(!digest.content.contains(&raws[3].title));
}

#[tokio::test]
async fn regenerating_replaces_draft_items() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 2).await;
    let raws = store.unprocessed_raw_items(10).await.unwrap();
    processed(&store, &raws[0], &["news"], 0.6, UrgencyLevel::Normal).await;

    let digests = DigestGenerator::new(store.clone());
    let first = digests.generate_for_date(tomorrow()).await.unwrap().unwrap();
    assert_eq!(first.items.len(), 1);

    processed(&store, &raws[1], &["news"], 0.7, UrgencyLevel::Normal).await;
    let second = digests.generate_for_date(tomorrow()).await.unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.items.len(), 2);
    assert_eq!(store.list_digests(&DigestFilter::default()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn publish_is_idempotent_and_freezes_the_digest() {
    init_tracing();
    let store = memory_store();
    seed_items(&store, 2).await;
    let raws = store.unprocessed_raw_items(10).await.unwrap();
    processed(&store, &raws[0], &["news"], 0.6, UrgencyLevel::Normal).await;

    let digests = DigestGenerator::new(store.clone());
    let draft = digests.generate_for_date(tomorrow()).await.unwrap().unwrap();

    let published = digests.publish(draft.id).await.unwrap();
    assert_eq!(published.status, DigestStatus::Published);
    let first_published_at = published.published_at.unwrap();

    let again = digests.publish(draft.id).await.unwrap();
    assert_eq!(again.published_at, Some(first_published_at));

    // New material does not alter a published digest.
    processed(&store, &raws[1], &["ai"], 0.9, UrgencyLevel::High).await;
    let regenerated = digests.generate_for_date(tomorrow()).await.unwrap().unwrap();
    assert_eq!(regenerated, again);

    let edit = DigestUpdate { title: Some("Edited".to_string()), content: None };
    assert!(matches!(digests.update(draft.id, edit).await, Err(Error::Conflict(_))));
    assert_eq!(digests.latest().await.unwrap().map(|d| d.id), Some(draft.id));
}

#[tokio::test]
async fn dispatcher_dedups_and_tracks_health() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/vercel/next.js/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 123,
            "tag_name": "v15.0.0",
            "name": "Next.js 15",
            "body": "Big release",
            "html_url": "https://github.com/vercel/next.js/releases/tag/v15.0.0",
            "published_at": "2025-03-01T10:00:00Z"
        }])))
        .mount(&server)
        .await;

    let store = memory_store();
    let mut registry = CollectorRegistry::new();
    registry.register(Arc::new(GithubCollector::new(test_fetcher(), None).with_base_url(server.uri())));
    let dispatcher = CollectorDispatcher::new(registry, store.clone());

    let source = add_source(&store, NewSource::new("Next.js", SourceType::Github, "https://github.com/vercel/next.js")).await;
    let first = dispatcher.trigger_source(source.id).await.unwrap();
    assert_eq!(first.new_items, 1);
    assert_eq!(first.message, "Collected 1 new items from Next.js");

    let second = dispatcher.trigger_source(source.id).await.unwrap();
    assert_eq!(second.new_items, 0);
    assert_eq!(store.raw_item_count(source.id).await.unwrap(), 1);

    let stored = store.get_source(source.id).await.unwrap();
    assert!(stored.last_fetch_at.is_some());
    assert_eq!(stored.error_count, 0);
    assert!(stored.last_error.is_none());
}

#[tokio::test]
async fn dispatcher_counts_failures_per_source() {
    init_tracing();
    let store = memory_store();
    let dispatcher = CollectorDispatcher::new(CollectorRegistry::new(), store.clone());

    let hn = add_source(
        &store,
        NewSource::new("HN", SourceType::Hackernews, "https://news.ycombinator.com").with_frequency(CheckFrequency::Hourly),
    )
    .await;
    let site = add_source(
        &store,
        NewSource::new("Site", SourceType::Website, "https://example.com").with_frequency(CheckFrequency::Hourly),
    )
    .await;
    add_source(
        &store,
        NewSource::new("Paused", SourceType::Website, "https://example.org")
            .with_frequency(CheckFrequency::Hourly)
            .inactive(),
    )
    .await;

    for _ in 0..2 {
        let reports = dispatcher.run_bucket(CheckFrequency::Hourly).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.success && r.error.is_some()));
    }

    for id in [hn.id, site.id] {
        let source = store.get_source(id).await.unwrap();
        assert_eq!(source.error_count, 2);
        assert!(source.last_error.as_deref().unwrap().contains("no collector"));
    }

    let err = dispatcher.trigger_source(hn.id).await.unwrap_err();
    assert!(matches!(err, Error::Collect(CollectError::Config(_))));
    assert_eq!(store.get_source(hn.id).await.unwrap().error_count, 3);
}

async fn mount_next_release(server: &MockServer, delay: std::time::Duration) {
    Mock::given(method("GET"))
        .and(path("/repos/vercel/next.js/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{
                    "id": 321,
                    "tag_name": "v15.1.0",
                    "name": "Next.js 15.1",
                    "body": "Minor release",
                    "html_url": "https://github.com/vercel/next.js/releases/tag/v15.1.0",
                    "published_at": "2025-03-02T10:00:00Z"
                }]))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

fn github_dispatcher(store: &Arc<dyn Store>, server: &MockServer) -> CollectorDispatcher {
    let mut registry = CollectorRegistry::new();
    registry.register(Arc::new(GithubCollector::new(test_fetcher(), None).with_base_url(server.uri())));
    CollectorDispatcher::new(registry, store.clone())
}

#[tokio::test]
async fn concurrent_triggers_of_one_source_run_one_at_a_time() {
    init_tracing();
    let delay = std::time::Duration::from_millis(300);
    let server = MockServer::start().await;
    mount_next_release(&server, delay).await;

    let store = memory_store();
    let dispatcher = github_dispatcher(&store, &server);
    let source = add_source(&store, NewSource::new("Next.js", SourceType::Github, "https://github.com/vercel/next.js")).await;

    let started = std::time::Instant::now();
    let (first, second) = tokio::join!(dispatcher.trigger_source(source.id), dispatcher.trigger_source(source.id));
    let elapsed = started.elapsed();

    assert_eq!(first.unwrap().new_items + second.unwrap().new_items, 1);
    assert_eq!(store.raw_item_count(source.id).await.unwrap(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert!(elapsed >= delay * 2, "collections overlapped: {:?}", elapsed);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_bucket() {
    init_tracing();
    let server = MockServer::start().await;
    mount_next_release(&server, std::time::Duration::ZERO).await;

    let store = memory_store();
    let dispatcher = github_dispatcher(&store, &server);
    let broken = add_source(
        &store,
        NewSource::new("A broken feed", SourceType::Hackernews, "https://news.ycombinator.com")
            .with_frequency(CheckFrequency::Hourly),
    )
    .await;
    let next = add_source(
        &store,
        NewSource::new("B Next.js", SourceType::Github, "https://github.com/vercel/next.js")
            .with_frequency(CheckFrequency::Hourly),
    )
    .await;

    let reports = dispatcher.run_bucket(CheckFrequency::Hourly).await.unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].source_id, broken.id);
    assert!(!reports[0].success);
    assert_eq!(reports[1].source_id, next.id);
    assert!(reports[1].success);
    assert_eq!(reports[1].new_items, 1);

    assert_eq!(store.get_source(broken.id).await.unwrap().error_count, 1);
    let collected = store.get_source(next.id).await.unwrap();
    assert_eq!(collected.error_count, 0);
    assert!(collected.last_fetch_at.is_some());
    assert_eq!(store.raw_item_count(next.id).await.unwrap(), 1);
}

#[tokio::test]
async fn release_flows_from_collection_to_digest() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/nodejs/node/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 123,
            "tag_name": "v22.0.0",
            "name": "Node.js 22",
            "body": "Node.js 22 ships require(esm).",
            "html_url": "https://github.com/nodejs/node/releases/tag/v22.0.0",
            "published_at": "2025-03-01T10:00:00Z",
            "author": { "login": "nodejs-github-bot" }
        }])))
        .mount(&server)
        .await;

    let store = memory_store();
    let mut registry = CollectorRegistry::new();
    registry.register(Arc::new(GithubCollector::new(test_fetcher(), None).with_base_url(server.uri())));
    let dispatcher = CollectorDispatcher::new(registry, store.clone());
    let source = add_source(&store, NewSource::new("Node.js", SourceType::Github, "https://github.com/nodejs/node")).await;

    assert_eq!(dispatcher.trigger_source(source.id).await.unwrap().new_items, 1);
    let raw = store.unprocessed_raw_items(10).await.unwrap().remove(0);
    assert_eq!(raw.external_id, "release-123");

    let mock = Arc::new(MockProvider::new(ProviderName::Claude).with_reply(analysis_reply(
        "Node.js 22 released",
        &["nodejs"],
        0.8,
        "normal",
    )));
    let scheduler = ProcessingScheduler::new(summarizer(&store, mock), 20);
    assert_eq!(scheduler.trigger(None).await.unwrap(), 1);

    let digest = DigestGenerator::new(store.clone())
        .generate_for_date(tomorrow())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(digest.items.len(), 1);
    assert_eq!(digest.items[0].section, DigestSection::News);
    assert_eq!(digest.items[0].order, 0);
    assert!(digest
        .content
        .contains("[node v22.0.0: Node.js 22](https://github.com/nodejs/node/releases/tag/v22.0.0)"));
    assert!(digest.content.contains("*Source: Node.js*"));

    let usage = store.usage_since(Utc::now() - Duration::hours(1)).await.unwrap();
    assert_eq!(usage.len(), 1);
}
