use crate::collectors::CollectorRegistry;
use crate::store::Store;
use crate::types::*;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sources collected at once during a multi-source run.
const MAX_CONCURRENT_SOURCES: usize = 4;

/// Runs collectors for sources and keeps their health fields current.
///
/// Collections of the same source are serialized; different sources never
/// wait on each other.
pub struct CollectorDispatcher {
    registry: CollectorRegistry,
    store: Arc<dyn Store>,
    source_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CollectorDispatcher {
    pub fn new(registry: CollectorRegistry, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            source_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn source_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.source_locks.lock().await;
        locks.entry(id).or_default().clone()
    }

    /// One collection attempt with health bookkeeping. Returns the new item count.
    pub async fn collect_source(&self, source: &Source) -> Result<usize> {
        let lock = self.source_lock(source.id).await;
        let _held = lock.lock().await;

        info!("Collecting from {} ({})", source.name, source.source_type);
        let result = match self.registry.get(source.source_type) {
            Some(collector) => collector.collect(source, self.store.as_ref()).await,
            None => Err(Error::Collect(CollectError::Config(format!(
                "no collector for source type {}",
                source.source_type
            )))),
        };

        let outcome = match &result {
            Ok(count) => {
                info!("Collected {} new items from {}", count, source.name);
                FetchOutcome::Success
            }
            Err(e) => {
                error!("Failed to collect from {}: {}", source.name, e);
                FetchOutcome::Failure(e.to_string())
            }
        };
        if let Err(e) = self.store.record_fetch(source.id, outcome, Utc::now()).await {
            warn!("Failed to record fetch health for {}: {}", source.name, e);
        }

        result
    }

    /// Scheduled run over the active sources of one bucket. A failing source
    /// never stops the others.
    pub async fn run_bucket(&self, frequency: CheckFrequency) -> Result<Vec<CollectionReport>> {
        let sources = self.store.active_sources(frequency).await?;
        info!("Found {} sources for {} collection", sources.len(), frequency);

        let reports = self.collect_each(&sources).await;
        let failed = reports.iter().filter(|r| !r.success).count();
        info!(
            "{} collection finished: {} ok, {} failed",
            frequency,
            reports.len() - failed,
            failed
        );
        Ok(reports)
    }

    /// Manual single-source run. The collector's error reaches the caller.
    pub async fn trigger_source(&self, id: Uuid) -> Result<TriggerResult> {
        let source = self.store.get_source(id).await?;
        let new_items = self.collect_source(&source).await?;
        Ok(TriggerResult {
            success: true,
            message: format!("Collected {} new items from {}", new_items, source.name),
            new_items,
        })
    }

    /// Manual run over every active source regardless of bucket.
    pub async fn trigger_all(&self) -> Result<Vec<CollectionReport>> {
        let filter = SourceFilter {
            is_active: Some(true),
            ..Default::default()
        };
        let sources = self.store.list_sources(&filter).await?;
        info!("Triggering collection for {} sources", sources.len());
        Ok(self.collect_each(&sources).await)
    }

    /// Reports come back in source order.
    async fn collect_each(&self, sources: &[Source]) -> Vec<CollectionReport> {
        let pending: Vec<_> = sources.iter().map(|source| self.report(source)).collect();
        stream::iter(pending)
            .buffered(MAX_CONCURRENT_SOURCES)
            .collect()
            .await
    }

    async fn report(&self, source: &Source) -> CollectionReport {
        match self.collect_source(source).await {
            Ok(new_items) => CollectionReport {
                source_id: source.id,
                name: source.name.clone(),
                success: true,
                new_items,
                error: None,
            },
            Err(e) => CollectionReport {
                source_id: source.id,
                name: source.name.clone(),
                success: false,
                new_items: 0,
                error: Some(e.to_string()),
            },
        }
    }
}
