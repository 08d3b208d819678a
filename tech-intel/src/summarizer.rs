use crate::llm::{CompletionOptions, LlmProviderRegistry, Message};
use crate::store::Store;
use crate::types::{ModerationStatus, ProcessedItem, RawItem, Result, Sentiment, UrgencyLevel};
use crate::utils::text::{normalize_labels, truncate_chars};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_CONTENT_CHARS: usize = 8000;
const DEGRADED_SUMMARY_CHARS: usize = 500;
const DEFAULT_RELEVANCE: f64 = 0.5;
const EMPTY_SUMMARY: &str = "No summary available";

pub const SYSTEM_PROMPT: &str = r#"You are a technology analyst writing for software engineers who follow JavaScript/TypeScript, Node.js, Next.js, NestJS, Rust, cloud infrastructure and AI/ML.

For the item you are given, produce:
1. summary: 2-3 sentences for news, up to 5 for major releases
2. categories, chosen from: frontend, backend, ai, security, devops, breaking-change, performance, tooling, release, tutorial, deep-dive
3. tags: the specific technologies involved (e.g. nextjs, react, nodejs, typescript, postgres)
4. relevanceScore: a number from 0 to 1, how much a working engineer should care
5. urgencyLevel: one of CRITICAL, HIGH, NORMAL, LOW
6. actionItems: concrete steps if any (e.g. "Upgrade package X to fix CVE-YYYY-NNNN")
7. sentiment: one of POSITIVE, NEGATIVE, NEUTRAL, CONTROVERSIAL

Reply with a single JSON object and nothing else:
{
  "summary": "...",
  "categories": ["..."],
  "tags": ["..."],
  "relevanceScore": 0.8,
  "urgencyLevel": "NORMAL",
  "actionItems": ["..."],
  "sentiment": "NEUTRAL"
}"#;

/// Structured analysis of one item, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub summary: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub relevance_score: f64,
    pub urgency_level: UrgencyLevel,
    pub sentiment: Option<Sentiment>,
    pub action_items: Vec<String>,
}

impl Analysis {
    /// Fallback when the model reply holds no usable JSON.
    pub fn degraded(raw: &str) -> Self {
        Self {
            summary: truncate_chars(raw.trim(), DEGRADED_SUMMARY_CHARS).to_string(),
            categories: Vec::new(),
            tags: Vec::new(),
            relevance_score: DEFAULT_RELEVANCE,
            urgency_level: UrgencyLevel::Normal,
            sentiment: None,
            action_items: Vec::new(),
        }
    }
}

pub fn build_messages(item: &RawItem) -> Vec<Message> {
    let mut prompt = format!(
        "Analyze this tech content:\n\nTitle: {}\n\nContent:\n{}\n\nURL: {}\n",
        item.title,
        truncate_chars(&item.content, MAX_CONTENT_CHARS),
        item.url
    );
    if let Some(author) = &item.author {
        prompt.push_str(&format!("Author: {}\n", author));
    }

    vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)]
}

/// First balanced `{...}` in free-form text. Braces inside JSON strings are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, c) in text[start..].char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + 1]);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Parses a model reply into an `Analysis`. Never fails; malformed replies degrade.
pub fn parse_analysis(reply: &str) -> Analysis {
    let parsed = extract_json_object(reply).and_then(|json| serde_json::from_str::<Value>(json).ok());
    let Some(Value::Object(fields)) = parsed else {
        warn!("LLM reply carried no JSON object, degrading");
        return Analysis::degraded(reply);
    };

    let summary = fields
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(EMPTY_SUMMARY)
        .to_string();

    Analysis {
        summary,
        categories: normalize_labels(string_list(fields.get("categories"))),
        tags: normalize_labels(string_list(fields.get("tags"))),
        relevance_score: relevance(fields.get("relevanceScore")),
        urgency_level: fields
            .get("urgencyLevel")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(UrgencyLevel::Normal),
        sentiment: fields
            .get("sentiment")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok()),
        action_items: string_list(fields.get("actionItems"))
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn relevance(value: Option<&Value>) -> f64 {
    let score = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
        _ => DEFAULT_RELEVANCE,
    }
}

/// Turns unprocessed raw items into processed items through the LLM registry.
pub struct Summarizer {
    llm: Arc<LlmProviderRegistry>,
    store: Arc<dyn Store>,
    options: CompletionOptions,
}

impl Summarizer {
    pub fn new(llm: Arc<LlmProviderRegistry>, store: Arc<dyn Store>) -> Self {
        Self {
            llm,
            store,
            options: CompletionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    /// Analyzes one raw item, stores the result and marks the raw item processed.
    ///
    /// An existing analysis for the same raw item counts as done.
    pub async fn process_item(&self, item: &RawItem) -> Result<ProcessedItem> {
        debug!("Processing item: {}", truncate_chars(&item.title, 50));

        let completion = self.llm.complete(&build_messages(item), &self.options, None).await?;
        let analysis = parse_analysis(&completion.content);

        let processed = ProcessedItem {
            id: Uuid::new_v4(),
            raw_item_id: item.id,
            summary: analysis.summary,
            categories: analysis.categories,
            tags: analysis.tags,
            relevance_score: analysis.relevance_score,
            urgency_level: analysis.urgency_level,
            sentiment: analysis.sentiment,
            action_items: analysis.action_items,
            llm_model: completion.model,
            llm_tokens_used: i32::try_from(completion.usage.total()).unwrap_or(i32::MAX),
            llm_cost: completion.cost,
            moderation_status: ModerationStatus::Pending,
            processed_at: Utc::now(),
        };

        if !self.store.insert_processed_item(processed.clone()).await? {
            debug!("Raw item {} already analyzed", item.id);
        }
        self.store.mark_processed(item.id).await?;
        Ok(processed)
    }

    /// Processes up to `limit` unprocessed items, newest first. Returns how many succeeded.
    pub async fn process_batch(&self, limit: usize) -> Result<usize> {
        let pending = self.store.unprocessed_raw_items(limit).await?;
        if pending.is_empty() {
            info!("No unprocessed items to process");
            return Ok(0);
        }

        info!("Processing batch of {} items", pending.len());
        let mut processed = 0;
        for item in &pending {
            match self.process_item(item).await {
                Ok(_) => processed += 1,
                Err(e) => error!("Failed to process item {}: {}", item.id, e),
            }
        }

        info!("Processed {}/{} items", processed, pending.len());
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_fenced_prose() {
        let reply = "Sure! Here you go:\n```json\n{\"summary\": \"a {brace} inside\", \"tags\": []}\n```\nAnything else?";
        assert_eq!(
            extract_json_object(reply),
            Some("{\"summary\": \"a {brace} inside\", \"tags\": []}")
        );
    }

    #[test]
    fn extracts_nested_objects_whole() {
        let reply = r#"{"a": {"b": 1}, "c": "\"}"} trailing }"#;
        assert_eq!(extract_json_object(reply), Some(r#"{"a": {"b": 1}, "c": "\"}"}"#));
    }

    #[test]
    fn no_object_means_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{ never closed"), None);
    }

    #[test]
    fn clamps_and_validates_fields() {
        let analysis = parse_analysis(
            r#"{"summary":"Big release","categories":["Release"," AI ","release",3],"tags":["NextJS"],
               "relevanceScore":1.4,"urgencyLevel":"high","sentiment":"POSITIVE","actionItems":["Upgrade", " "]}"#,
        );
        assert_eq!(analysis.relevance_score, 1.0);
        assert_eq!(analysis.urgency_level, UrgencyLevel::High);
        assert_eq!(analysis.sentiment, Some(Sentiment::Positive));
        assert_eq!(analysis.categories, vec!["release".to_string(), "ai".to_string()]);
        assert_eq!(analysis.tags, vec!["nextjs".to_string()]);
        assert_eq!(analysis.action_items, vec!["Upgrade".to_string()]);
    }

    #[test]
    fn unknown_enum_values_fall_back() {
        let analysis = parse_analysis(
            r#"{"summary":"x","relevanceScore":"high","urgencyLevel":"asap","sentiment":"meh"}"#,
        );
        assert_eq!(analysis.relevance_score, 0.5);
        assert_eq!(analysis.urgency_level, UrgencyLevel::Normal);
        assert_eq!(analysis.sentiment, None);
        assert!(analysis.categories.is_empty());
    }

    #[test]
    fn zero_relevance_is_kept() {
        let analysis = parse_analysis(r#"{"summary":"x","relevanceScore":0}"#);
        assert_eq!(analysis.relevance_score, 0.0);
    }

    #[test]
    fn garbage_degrades() {
        let long = "not json ".repeat(100);
        let analysis = parse_analysis(&long);
        assert_eq!(analysis.summary.chars().count(), DEGRADED_SUMMARY_CHARS.min(long.trim().chars().count()));
        assert_eq!(analysis.relevance_score, 0.5);
        assert_eq!(analysis.urgency_level, UrgencyLevel::Normal);
        assert!(analysis.tags.is_empty());
        assert!(analysis.sentiment.is_none());
    }

    #[test]
    fn missing_summary_gets_placeholder() {
        assert_eq!(parse_analysis(r#"{"tags":["x"]}"#).summary, EMPTY_SUMMARY);
    }
}
