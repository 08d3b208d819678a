use crate::llm::{summarize_usage, UsageSummary};
use crate::store::{LabelCount, SourceItemCount, Store, StoreCounts};
use crate::types::*;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ERROR_THRESHOLD: i32 = 5;
pub const STALE_AFTER_DAYS: i64 = 3;
pub const DEFAULT_USAGE_DAYS: i64 = 30;
pub const DEFAULT_COLLECTION_DAYS: i64 = 7;
pub const DEFAULT_TAG_LIMIT: usize = 30;

pub fn health_status(source: &Source, now: DateTime<Utc>) -> HealthStatus {
    if !source.is_active {
        return HealthStatus::Inactive;
    }
    if source.error_count >= ERROR_THRESHOLD {
        return HealthStatus::Error;
    }
    if source.error_count > 0 {
        return HealthStatus::Warning;
    }
    let stale = source
        .last_fetch_at
        .is_some_and(|at| at < now - Duration::days(STALE_AFTER_DAYS));
    if stale {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    }
}

/// Midnight UTC, `days` days before `now`.
pub fn window_start(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    (now - Duration::days(days)).date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    #[serde(flatten)]
    pub counts: StoreCounts,
    pub llm_usage: UsageSummary,
}

/// Read-only rollups for the dashboard.
pub struct StatsService {
    store: Arc<dyn Store>,
}

impl StatsService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn system_stats(&self) -> Result<SystemStats> {
        Ok(SystemStats {
            counts: self.store.counts().await?,
            llm_usage: self.llm_usage(DEFAULT_USAGE_DAYS).await?,
        })
    }

    pub async fn llm_usage(&self, days: i64) -> Result<UsageSummary> {
        let records = self.store.usage_since(window_start(Utc::now(), days)).await?;
        Ok(summarize_usage(&records, days))
    }

    pub async fn collection_stats(&self, days: i64) -> Result<Vec<SourceItemCount>> {
        self.store.collection_counts(window_start(Utc::now(), days)).await
    }

    pub async fn category_distribution(&self) -> Result<Vec<LabelCount>> {
        self.store.category_counts().await
    }

    pub async fn tag_cloud(&self, limit: usize) -> Result<Vec<LabelCount>> {
        self.store.tag_counts(limit).await
    }

    pub async fn source_health(&self) -> Result<Vec<SourceHealth>> {
        let now = Utc::now();
        let sources = self.store.list_sources(&SourceFilter::default()).await?;

        let mut health = Vec::with_capacity(sources.len());
        for source in sources {
            let item_count = self.store.raw_item_count(source.id).await?;
            health.push(SourceHealth {
                id: source.id,
                name: source.name.clone(),
                source_type: source.source_type,
                last_fetch: source.last_fetch_at,
                error_count: source.error_count,
                last_error: source.last_error.clone(),
                item_count,
                status: health_status(&source, now),
            });
        }
        Ok(health)
    }
}
