use crate::types::CollectError;
use crate::utils::text::strip_html;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use tracing::debug;

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<ParsedEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEntry {
    pub link: String,
    pub title: String,
    /// Plain text, HTML stripped.
    pub content: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// RSS/Atom parsing on top of feed-rs.
pub struct FeedParser;

impl FeedParser {
    pub fn parse_feed(content: &str) -> Result<ParsedFeed, CollectError> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| CollectError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let total = feed.entries.len();
        let entries: Vec<ParsedEntry> = feed.entries.into_iter().filter_map(Self::parse_entry).collect();

        if entries.len() < total {
            debug!("Skipped {} entries without a link", total - entries.len());
        }

        Ok(ParsedFeed { title, entries })
    }

    /// `None` when the entry has no link; the link is the dedup basis.
    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let link = entry
            .links
            .iter()
            .map(|l| l.href.trim())
            .find(|href| !href.is_empty())?
            .to_string();

        let title = entry
            .title
            .map(|t| strip_html(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        // Full content (content:encoded, atom content) before the summary/description.
        let raw_content = entry
            .content
            .and_then(|c| c.body)
            .filter(|b| !b.trim().is_empty())
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        let author = entry
            .authors
            .first()
            .map(|a| a.name.trim().to_string())
            .filter(|a| !a.is_empty());

        let published_at = entry.published.or(entry.updated).map(|dt| dt.with_timezone(&Utc));

        let categories = entry
            .categories
            .into_iter()
            .map(|c| c.label.unwrap_or(c.term))
            .collect();

        Some(ParsedEntry {
            link,
            title,
            content: strip_html(&raw_content),
            author,
            published_at,
            categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Node Weekly</title>
    <link>https://nodeweekly.com</link>
    <description>Node news</description>
    <item>
      <title>Node 22 released</title>
      <link>https://nodeweekly.com/issues/1</link>
      <description>Short &lt;b&gt;summary&lt;/b&gt;</description>
      <content:encoded><![CDATA[<p>Full <span>content</span> here</p>]]></content:encoded>
      <category>node</category>
      <pubDate>Tue, 04 Mar 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Dropped</description>
    </item>
    <item>
      <link>https://nodeweekly.com/issues/2</link>
      <description>&lt;p&gt;Only a description&lt;/p&gt;</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_entries_and_prefers_full_content() {
        let feed = FeedParser::parse_feed(FEED).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Node Weekly"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.link, "https://nodeweekly.com/issues/1");
        assert_eq!(first.content, "Full content here");
        assert_eq!(first.categories, vec!["node".to_string()]);
        assert!(first.published_at.is_some());

        let second = &feed.entries[1];
        assert_eq!(second.title, "Untitled");
        assert_eq!(second.content, "Only a description");
        assert!(second.published_at.is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(FeedParser::parse_feed("not a feed"), Err(CollectError::Parse(_))));
    }
}
