use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub use interfaces::defs::*;

/// Typed failure of a single collector run.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CollectError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Uniform failure surface of completion backends.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LlmError {
    #[error("Provider {0} is not configured")]
    NotConfigured(String),

    #[error("Provider {0} is rate limited")]
    RateLimited(String),

    #[error("Provider {0} timed out")]
    Timeout(String),

    #[error("Provider {provider} failed: {message}")]
    Upstream { provider: String, message: String },

    #[error("Provider {provider} returned an unusable response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("No LLM providers available")]
    NoProviderAvailable,
}

impl LlmError {
    /// Failures that move a call over to the fallback provider.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            LlmError::NotConfigured(_) | LlmError::RateLimited(_) | LlmError::Timeout(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collection failed: {0}")]
    Collect(#[from] CollectError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Processing already in progress")]
    AlreadyProcessing,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound { entity, id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP client settings shared by collectors and providers.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub feed_timeout_seconds: u64,
    pub cloud_llm_timeout_seconds: u64,
    pub local_llm_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub max_redirects: usize,
    /// Minimum spacing between requests to the same host.
    pub min_host_interval_ms: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_seconds)
    }

    pub fn cloud_llm_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud_llm_timeout_seconds)
    }

    pub fn local_llm_timeout(&self) -> Duration {
        Duration::from_secs(self.local_llm_timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn min_host_interval(&self) -> Duration {
        Duration::from_millis(self.min_host_interval_ms)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "TechIntelligence/1.0".to_string(),
            timeout_seconds: 30,
            feed_timeout_seconds: 10,
            cloud_llm_timeout_seconds: 60,
            local_llm_timeout_seconds: 120,
            probe_timeout_seconds: 2,
            max_redirects: 5,
            min_host_interval_ms: 1000,
        }
    }
}

/// Health fields written after a collection attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success,
    Failure(String),
}

/// Processed item joined with what the digest needs from its raw item and source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestCandidate {
    pub item: ProcessedItem,
    pub title: String,
    pub url: String,
    pub source_name: String,
}

/// Processed item with its raw item, for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedItemView {
    #[serde(flatten)]
    pub item: ProcessedItem,
    pub raw_item: RawItem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestFilter {
    pub status: Option<DigestStatus>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

/// Draft digest about to be written along with its full item list.
#[derive(Debug, Clone)]
pub struct DraftDigest {
    pub date: chrono::NaiveDate,
    pub title: String,
    pub content: String,
    pub items: Vec<DraftDigestItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DraftDigestItem {
    pub processed_item_id: Uuid,
    pub section: DigestSection,
    pub order: i32,
}

/// Per-source result of a manual "collect everything" run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionReport {
    pub source_id: Uuid,
    pub name: String,
    pub success: bool,
    pub new_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResult {
    pub success: bool,
    pub message: String,
    pub new_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub last_fetch: Option<DateTime<Utc>>,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub item_count: i64,
    pub status: HealthStatus,
}
