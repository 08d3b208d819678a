use super::{apply_source_update, sort_label_counts, LabelCount, ProcessedItemQuery, SourceItemCount, Store, StoreCounts};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    sources: HashMap<Uuid, Source>,
    raw_items: Vec<RawItem>,
    dedup_keys: HashSet<(Uuid, String)>,
    processed: Vec<ProcessedItem>,
    digests: HashMap<Uuid, Digest>,
    usage: Vec<LlmUsageRecord>,
}

impl Inner {
    fn source(&self, id: Uuid) -> Result<&Source> {
        self.sources.get(&id).ok_or_else(|| Error::not_found("Source", id))
    }

    fn raw_item(&self, id: Uuid) -> Result<&RawItem> {
        self.raw_items
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::not_found("RawItem", id))
    }

    fn view(&self, item: &ProcessedItem) -> Result<ProcessedItemView> {
        Ok(ProcessedItemView {
            item: item.clone(),
            raw_item: self.raw_item(item.raw_item_id)?.clone(),
        })
    }

    fn digest(&self, id: Uuid) -> Result<&Digest> {
        self.digests.get(&id).ok_or_else(|| Error::not_found("Digest", id))
    }
}

/// In-process store with the same uniqueness rules as the database schema.
/// Used for demos and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn label_counts<'a>(labels: impl Iterator<Item = &'a String>) -> Vec<LabelCount> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    let mut counts: Vec<LabelCount> = counts
        .into_iter()
        .map(|(label, count)| LabelCount { label: label.to_string(), count })
        .collect();
    sort_label_counts(&mut counts);
    counts
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>> {
        let inner = self.inner.read().await;
        let mut sources: Vec<Source> = inner
            .sources
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(sources)
    }

    async fn get_source(&self, id: Uuid) -> Result<Source> {
        self.inner.read().await.source(id).cloned()
    }

    async fn create_source(&self, source: NewSource) -> Result<Source> {
        let created = Source::from_new(source, Utc::now());
        info!("Added new source: {} with ID: {}", created.name, created.id);
        self.inner.write().await.sources.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_source(&self, id: Uuid, update: SourceUpdate) -> Result<Source> {
        let mut inner = self.inner.write().await;
        let source = inner
            .sources
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Source", id))?;
        apply_source_update(source, update);
        source.updated_at = Utc::now();
        Ok(source.clone())
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.sources.remove(&id).is_none() {
            return Err(Error::not_found("Source", id));
        }

        // Cascade like the foreign keys do.
        let removed_raw: HashSet<Uuid> = inner
            .raw_items
            .iter()
            .filter(|r| r.source_id == id)
            .map(|r| r.id)
            .collect();
        inner.raw_items.retain(|r| r.source_id != id);
        inner.dedup_keys.retain(|(source_id, _)| *source_id != id);
        let removed_processed: HashSet<Uuid> = inner
            .processed
            .iter()
            .filter(|p| removed_raw.contains(&p.raw_item_id))
            .map(|p| p.id)
            .collect();
        inner.processed.retain(|p| !removed_processed.contains(&p.id));
        for digest in inner.digests.values_mut() {
            digest.items.retain(|i| !removed_processed.contains(&i.processed_item_id));
        }

        info!("Deleted source: {}", id);
        Ok(())
    }

    async fn active_sources(&self, frequency: CheckFrequency) -> Result<Vec<Source>> {
        let inner = self.inner.read().await;
        let mut sources: Vec<Source> = inner
            .sources
            .values()
            .filter(|s| s.is_active && s.check_frequency == frequency)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sources)
    }

    async fn record_fetch(&self, id: Uuid, outcome: FetchOutcome, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(source) = inner.sources.get_mut(&id) else {
            return Ok(());
        };
        match outcome {
            FetchOutcome::Success => {
                source.last_fetch_at = Some(at);
                source.last_error = None;
                source.error_count = 0;
            }
            FetchOutcome::Failure(message) => {
                source.last_error = Some(message);
                source.error_count += 1;
            }
        }
        source.updated_at = at;
        Ok(())
    }

    async fn raw_item_exists(&self, source_id: Uuid, external_id: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.dedup_keys.contains(&(source_id, external_id.to_string())))
    }

    async fn insert_raw_item(&self, source_id: Uuid, item: NewRawItem, fetched_at: DateTime<Utc>) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.source(source_id)?;

        if !inner.dedup_keys.insert((source_id, item.external_id.clone())) {
            debug!("Skipping duplicate item {} for source {}", item.external_id, source_id);
            return Ok(false);
        }
        inner.raw_items.push(RawItem {
            id: Uuid::new_v4(),
            source_id,
            external_id: item.external_id,
            title: item.title,
            content: item.content,
            url: item.url,
            author: item.author,
            published_at: item.published_at,
            fetched_at,
            metadata: item.metadata,
            is_processed: false,
        });
        Ok(true)
    }

    async fn unprocessed_raw_items(&self, limit: usize) -> Result<Vec<RawItem>> {
        let inner = self.inner.read().await;
        let mut items: Vec<RawItem> = inner
            .raw_items
            .iter()
            .filter(|r| !r.is_processed)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at).then_with(|| a.id.cmp(&b.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn mark_processed(&self, raw_item_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(item) = inner.raw_items.iter_mut().find(|r| r.id == raw_item_id) {
            item.is_processed = true;
        }
        Ok(())
    }

    async fn get_raw_item(&self, id: Uuid) -> Result<RawItem> {
        self.inner.read().await.raw_item(id).cloned()
    }

    async fn raw_item_count(&self, source_id: Uuid) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner.raw_items.iter().filter(|r| r.source_id == source_id).count() as i64)
    }

    async fn insert_processed_item(&self, item: ProcessedItem) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.raw_item(item.raw_item_id)?;
        if inner.processed.iter().any(|p| p.raw_item_id == item.raw_item_id) {
            return Ok(false);
        }
        inner.processed.push(item);
        Ok(true)
    }

    async fn get_processed_item(&self, id: Uuid) -> Result<ProcessedItemView> {
        let inner = self.inner.read().await;
        let item = inner
            .processed
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("ProcessedItem", id))?;
        inner.view(item)
    }

    async fn list_processed_items(&self, query: &ProcessedItemQuery) -> Result<Vec<ProcessedItemView>> {
        let inner = self.inner.read().await;
        let mut items: Vec<&ProcessedItem> = inner
            .processed
            .iter()
            .filter(|p| query.category.as_deref().is_none_or(|c| p.has_category(c)))
            .collect();
        items.sort_by(|a, b| b.processed_at.cmp(&a.processed_at).then_with(|| a.id.cmp(&b.id)));

        let offset = query.offset.unwrap_or(0).max(0) as usize;
        let limit = query.limit.unwrap_or(50).max(0) as usize;
        items
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|p| inner.view(p))
            .collect()
    }

    async fn set_moderation(&self, id: Uuid, status: ModerationStatus) -> Result<ProcessedItem> {
        let mut inner = self.inner.write().await;
        let item = inner
            .processed
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::not_found("ProcessedItem", id))?;
        item.moderation_status = status;
        Ok(item.clone())
    }

    async fn digest_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_relevance: f64,
    ) -> Result<Vec<DigestCandidate>> {
        let inner = self.inner.read().await;
        let mut candidates = Vec::new();
        for item in &inner.processed {
            if item.processed_at < from
                || item.processed_at >= to
                || item.relevance_score < min_relevance
                || item.moderation_status == ModerationStatus::Rejected
            {
                continue;
            }
            let raw = inner.raw_item(item.raw_item_id)?;
            let source = inner.source(raw.source_id)?;
            candidates.push(DigestCandidate {
                item: item.clone(),
                title: raw.title.clone(),
                url: raw.url.clone(),
                source_name: source.name.clone(),
            });
        }
        Ok(candidates)
    }

    async fn get_digest(&self, id: Uuid) -> Result<Digest> {
        self.inner.read().await.digest(id).cloned()
    }

    async fn get_digest_by_date(&self, date: NaiveDate) -> Result<Option<Digest>> {
        let inner = self.inner.read().await;
        Ok(inner.digests.values().find(|d| d.date == date).cloned())
    }

    async fn list_digests(&self, filter: &DigestFilter) -> Result<Vec<Digest>> {
        let inner = self.inner.read().await;
        let mut digests: Vec<Digest> = inner
            .digests
            .values()
            .filter(|d| filter.status.is_none_or(|s| s == d.status))
            .cloned()
            .collect();
        digests.sort_by(|a, b| b.date.cmp(&a.date));
        digests.truncate(filter.limit.unwrap_or(30).max(0) as usize);
        Ok(digests)
    }

    async fn latest_published_digest(&self) -> Result<Option<Digest>> {
        let inner = self.inner.read().await;
        Ok(inner
            .digests
            .values()
            .filter(|d| d.status == DigestStatus::Published)
            .max_by_key(|d| d.date)
            .cloned())
    }

    async fn save_draft_digest(&self, draft: DraftDigest, at: DateTime<Utc>) -> Result<Digest> {
        // The write lock spans the whole replacement, so readers see old or new, never a mix.
        let mut inner = self.inner.write().await;

        for item in &draft.items {
            if !inner.processed.iter().any(|p| p.id == item.processed_item_id) {
                return Err(Error::not_found("ProcessedItem", item.processed_item_id));
            }
        }

        let existing_id = inner.digests.values().find(|d| d.date == draft.date).map(|d| d.id);
        let digest_id = existing_id.unwrap_or_else(Uuid::new_v4);
        let items: Vec<DigestItem> = draft
            .items
            .iter()
            .map(|i| DigestItem {
                id: Uuid::new_v4(),
                digest_id,
                processed_item_id: i.processed_item_id,
                section: i.section,
                order: i.order,
            })
            .collect();

        let digest = match existing_id {
            Some(id) => {
                let digest = inner
                    .digests
                    .get_mut(&id)
                    .ok_or_else(|| Error::not_found("Digest", id))?;
                if digest.status == DigestStatus::Published {
                    return Err(Error::Conflict(format!("digest for {} is already published", draft.date)));
                }
                digest.title = draft.title;
                digest.content = draft.content;
                digest.updated_at = at;
                digest.items = items;
                digest.clone()
            }
            None => {
                let digest = Digest {
                    id: digest_id,
                    date: draft.date,
                    title: draft.title,
                    content: draft.content,
                    status: DigestStatus::Draft,
                    published_at: None,
                    created_at: at,
                    updated_at: at,
                    items,
                };
                inner.digests.insert(digest_id, digest.clone());
                digest
            }
        };

        debug!("Saved draft digest {} with {} items", digest.id, digest.items.len());
        Ok(digest)
    }

    async fn update_digest(&self, id: Uuid, update: DigestUpdate, at: DateTime<Utc>) -> Result<Digest> {
        let mut inner = self.inner.write().await;
        let digest = inner
            .digests
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Digest", id))?;
        if digest.status == DigestStatus::Published {
            return Err(Error::Conflict(format!("digest {} is published", id)));
        }
        if let Some(title) = update.title {
            digest.title = title;
        }
        if let Some(content) = update.content {
            digest.content = content;
        }
        digest.updated_at = at;
        Ok(digest.clone())
    }

    async fn publish_digest(&self, id: Uuid, at: DateTime<Utc>) -> Result<Digest> {
        let mut inner = self.inner.write().await;
        let digest = inner
            .digests
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("Digest", id))?;
        if digest.status != DigestStatus::Published {
            digest.status = DigestStatus::Published;
            digest.published_at = Some(at);
            digest.updated_at = at;
            info!("Published digest: {}", id);
        }
        Ok(digest.clone())
    }

    async fn record_usage(&self, record: LlmUsageRecord) -> Result<()> {
        self.inner.write().await.usage.push(record);
        Ok(())
    }

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<LlmUsageRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.usage.iter().filter(|u| u.created_at >= since).cloned().collect())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.inner.read().await;
        Ok(StoreCounts {
            sources: inner.sources.len() as i64,
            active_sources: inner.sources.values().filter(|s| s.is_active).count() as i64,
            raw_items: inner.raw_items.len() as i64,
            processed_items: inner.processed.len() as i64,
            digests: inner.digests.len() as i64,
            published_digests: inner
                .digests
                .values()
                .filter(|d| d.status == DigestStatus::Published)
                .count() as i64,
        })
    }

    async fn collection_counts(&self, since: DateTime<Utc>) -> Result<Vec<SourceItemCount>> {
        let inner = self.inner.read().await;
        let mut per_source: HashMap<Uuid, i64> = HashMap::new();
        for item in inner.raw_items.iter().filter(|r| r.fetched_at >= since) {
            *per_source.entry(item.source_id).or_insert(0) += 1;
        }
        let mut counts: Vec<SourceItemCount> = per_source
            .into_iter()
            .filter_map(|(source_id, count)| {
                inner.sources.get(&source_id).map(|s| SourceItemCount {
                    source_id,
                    name: s.name.clone(),
                    count,
                })
            })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(counts)
    }

    async fn category_counts(&self) -> Result<Vec<LabelCount>> {
        let inner = self.inner.read().await;
        Ok(label_counts(inner.processed.iter().flat_map(|p| p.categories.iter())))
    }

    async fn tag_counts(&self, limit: usize) -> Result<Vec<LabelCount>> {
        let inner = self.inner.read().await;
        let mut counts = label_counts(inner.processed.iter().flat_map(|p| p.tags.iter()));
        counts.truncate(limit);
        Ok(counts)
    }
}
