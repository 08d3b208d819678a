use super::Collector;
use crate::fetcher::Fetcher;
use crate::parser::{FeedParser, ParsedEntry};
use crate::types::{CollectError, NewRawItem, Source, SourceType};
use async_trait::async_trait;
use chrono::Utc;
use regex::{Regex, RegexBuilder};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

const DEFAULT_ITEM_LIMIT: usize = 50;

/// Collects entries of an RSS or Atom feed.
pub struct RssCollector {
    fetcher: Arc<Fetcher>,
}

impl RssCollector {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

/// Stable external ID derived from the entry link. Distinct links never share an ID.
pub fn external_id_for_link(link: &str) -> String {
    let digest = Sha256::digest(link.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("rss-{}", hex)
}

fn title_filter(source: &Source) -> Result<Option<Regex>, CollectError> {
    match source.config_str("titleFilter") {
        Some(pattern) => RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map(Some)
            .map_err(|e| CollectError::Config(format!("invalid titleFilter {:?}: {}", pattern, e))),
        None => Ok(None),
    }
}

/// Configured `itemLimit`; zero or absent means the default.
fn item_limit(source: &Source) -> usize {
    source
        .config_u64("itemLimit")
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_ITEM_LIMIT)
}

fn map_entry(entry: ParsedEntry, feed_title: Option<&str>) -> NewRawItem {
    NewRawItem {
        external_id: external_id_for_link(&entry.link),
        title: entry.title,
        content: entry.content,
        url: entry.link,
        author: entry.author,
        published_at: entry.published_at.unwrap_or_else(Utc::now),
        metadata: json!({
            "feedTitle": feed_title,
            "categories": entry.categories,
        }),
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Rss
    }

    async fn fetch(&self, source: &Source) -> Result<Vec<NewRawItem>, CollectError> {
        let filter = title_filter(source)?;
        let item_limit = item_limit(source);

        let body = self
            .fetcher
            .get_text(&source.url, self.fetcher.config().feed_timeout())
            .await?;
        let feed = FeedParser::parse_feed(&body)?;
        let feed_title = feed.title.clone();

        let items: Vec<NewRawItem> = feed
            .entries
            .into_iter()
            .take(item_limit)
            .filter(|e| filter.as_ref().is_none_or(|re| re.is_match(&e.title)))
            .map(|e| map_entry(e, feed_title.as_deref()))
            .collect();

        info!("RSS {}: {} entries after filtering", source.name, items.len());
        Ok(items)
    }
}
