pub mod memory;
pub mod postgres;

use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub sources: i64,
    pub active_sources: i64,
    pub raw_items: i64,
    pub processed_items: i64,
    pub digests: i64,
    pub published_digests: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelCount {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceItemCount {
    pub source_id: Uuid,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedItemQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub category: Option<String>,
}

/// Persistence boundary for every component.
///
/// Uniqueness of `(source_id, external_id)`, `processed_items.raw_item_id` and
/// `digests.date` is enforced here, so callers may treat duplicate writes as no-ops.
#[async_trait]
pub trait Store: Send + Sync {
    // Sources

    /// Sources ordered by priority (high first), then name.
    async fn list_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>>;

    async fn get_source(&self, id: Uuid) -> Result<Source>;

    async fn create_source(&self, source: NewSource) -> Result<Source>;

    async fn update_source(&self, id: Uuid, update: SourceUpdate) -> Result<Source>;

    async fn delete_source(&self, id: Uuid) -> Result<()>;

    /// Active sources in one schedule bucket.
    async fn active_sources(&self, frequency: CheckFrequency) -> Result<Vec<Source>>;

    /// Writes health fields after a collection attempt.
    async fn record_fetch(&self, id: Uuid, outcome: FetchOutcome, at: DateTime<Utc>) -> Result<()>;

    // Raw items

    async fn raw_item_exists(&self, source_id: Uuid, external_id: &str) -> Result<bool>;

    /// Inserts unless the dedup key is taken. Returns whether a row was written.
    async fn insert_raw_item(&self, source_id: Uuid, item: NewRawItem, fetched_at: DateTime<Utc>) -> Result<bool>;

    /// Unprocessed raw items, newest published first.
    async fn unprocessed_raw_items(&self, limit: usize) -> Result<Vec<RawItem>>;

    async fn mark_processed(&self, raw_item_id: Uuid) -> Result<()>;

    async fn get_raw_item(&self, id: Uuid) -> Result<RawItem>;

    async fn raw_item_count(&self, source_id: Uuid) -> Result<i64>;

    // Processed items

    /// Returns false when the raw item already has an analysis.
    async fn insert_processed_item(&self, item: ProcessedItem) -> Result<bool>;

    async fn get_processed_item(&self, id: Uuid) -> Result<ProcessedItemView>;

    /// Newest processed first.
    async fn list_processed_items(&self, query: &ProcessedItemQuery) -> Result<Vec<ProcessedItemView>>;

    async fn set_moderation(&self, id: Uuid, status: ModerationStatus) -> Result<ProcessedItem>;

    /// Items processed in `[from, to)` with relevance at or above `min_relevance`,
    /// excluding rejected ones. Unordered.
    async fn digest_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_relevance: f64,
    ) -> Result<Vec<DigestCandidate>>;

    // Digests

    async fn get_digest(&self, id: Uuid) -> Result<Digest>;

    async fn get_digest_by_date(&self, date: NaiveDate) -> Result<Option<Digest>>;

    /// Newest date first, items included.
    async fn list_digests(&self, filter: &DigestFilter) -> Result<Vec<Digest>>;

    async fn latest_published_digest(&self) -> Result<Option<Digest>>;

    /// Upserts the draft for its date and replaces its item list in one unit.
    /// Fails with `Conflict` if the date is already published.
    async fn save_draft_digest(&self, draft: DraftDigest, at: DateTime<Utc>) -> Result<Digest>;

    /// Fails with `Conflict` on a published digest.
    async fn update_digest(&self, id: Uuid, update: DigestUpdate, at: DateTime<Utc>) -> Result<Digest>;

    /// Publishes once. Later calls return the digest unchanged.
    async fn publish_digest(&self, id: Uuid, at: DateTime<Utc>) -> Result<Digest>;

    // Usage & stats

    async fn record_usage(&self, record: LlmUsageRecord) -> Result<()>;

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<LlmUsageRecord>>;

    async fn counts(&self) -> Result<StoreCounts>;

    /// Raw items fetched since `since`, per source, busiest first.
    async fn collection_counts(&self, since: DateTime<Utc>) -> Result<Vec<SourceItemCount>>;

    /// Category frequency across processed items, most frequent first.
    async fn category_counts(&self) -> Result<Vec<LabelCount>>;

    async fn tag_counts(&self, limit: usize) -> Result<Vec<LabelCount>>;
}

/// Sort order shared by both stores for label rollups.
pub(crate) fn sort_label_counts(counts: &mut [LabelCount]) {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
}

/// Applies the editable fields of a partial update.
pub(crate) fn apply_source_update(source: &mut Source, update: SourceUpdate) {
    if let Some(name) = update.name {
        source.name = name;
    }
    if let Some(source_type) = update.source_type {
        source.source_type = source_type;
    }
    if let Some(url) = update.url {
        source.url = url;
    }
    if let Some(config) = update.config {
        source.config = config;
    }
    if let Some(priority) = update.priority {
        source.priority = priority;
    }
    if let Some(frequency) = update.check_frequency {
        source.check_frequency = frequency;
    }
    if let Some(active) = update.is_active {
        source.is_active = active;
    }
    if let Some(tags) = update.category_tags {
        source.category_tags = tags;
    }
    if update.notes.is_some() {
        source.notes = update.notes;
    }
}
