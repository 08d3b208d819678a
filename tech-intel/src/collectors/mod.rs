pub mod github;
pub mod reddit;
pub mod rss;

use crate::fetcher::Fetcher;
use crate::store::Store;
use crate::types::{CollectError, NewRawItem, Result, Source, SourceType};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub use github::GithubCollector;
pub use reddit::RedditCollector;
pub use rss::RssCollector;

/// One adapter per upstream protocol.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Fetches upstream entries for `source` mapped to the canonical item shape.
    async fn fetch(&self, source: &Source) -> std::result::Result<Vec<NewRawItem>, CollectError>;

    /// Fetches and stores the items not seen before. Returns how many were new.
    async fn collect(&self, source: &Source, store: &dyn Store) -> Result<usize> {
        let items = self.fetch(source).await?;
        store_new_items(store, source, items).await
    }
}

/// Check-then-insert on the dedup key, one item at a time.
///
/// A store error partway through leaves earlier inserts in place.
pub async fn store_new_items(store: &dyn Store, source: &Source, items: Vec<NewRawItem>) -> Result<usize> {
    let total = items.len();
    let mut stored_count = 0;
    let fetched_at = Utc::now();

    for item in items {
        if store.raw_item_exists(source.id, &item.external_id).await? {
            debug!("Already have {} for source {}", item.external_id, source.name);
            continue;
        }
        if store.insert_raw_item(source.id, item, fetched_at).await? {
            stored_count += 1;
        }
    }

    info!("Source {}: stored {} new items out of {} fetched", source.name, stored_count, total);
    Ok(stored_count)
}

/// Source type to adapter table.
#[derive(Default, Clone)]
pub struct CollectorRegistry {
    collectors: HashMap<SourceType, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the GitHub, RSS and Reddit adapters sharing one fetcher.
    pub fn with_defaults(fetcher: Arc<Fetcher>, github_token: Option<String>, reddit: crate::config::RedditCredentials) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GithubCollector::new(fetcher.clone(), github_token)));
        registry.register(Arc::new(RssCollector::new(fetcher.clone())));
        registry.register(Arc::new(RedditCollector::new(fetcher, reddit)));
        registry
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        let source_type = collector.source_type();
        info!("Registering collector for source type: {}", source_type);
        self.collectors.insert(source_type, collector);
    }

    pub fn get(&self, source_type: SourceType) -> Option<Arc<dyn Collector>> {
        self.collectors.get(&source_type).cloned()
    }

    pub fn supported_types(&self) -> Vec<SourceType> {
        SourceType::ALL
            .iter()
            .copied()
            .filter(|t| self.collectors.contains_key(t))
            .collect()
    }
}
