use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a string does not name a variant of a closed enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// Closed string enums share their wire spelling between serde, the database and FromStr.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            /// Case-insensitive parse of the wire spelling.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let lowered = s.trim().to_ascii_lowercase();
                match lowered.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Kind of upstream a source is polled from.
    SourceType, "source type" {
        Github => "github",
        Rss => "rss",
        Reddit => "reddit",
        Hackernews => "hackernews",
        Website => "website",
    }
);

string_enum!(
    Priority, "priority" {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
);

impl Priority {
    /// Higher rank sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

string_enum!(
    /// Schedule bucket a source is collected in.
    CheckFrequency, "check frequency" {
        Hourly => "hourly",
        Daily => "daily",
        Weekly => "weekly",
    }
);

string_enum!(
    UrgencyLevel, "urgency level" {
        Critical => "critical",
        High => "high",
        Normal => "normal",
        Low => "low",
    }
);

impl UrgencyLevel {
    /// Higher rank is more urgent.
    pub fn rank(&self) -> u8 {
        match self {
            UrgencyLevel::Critical => 4,
            UrgencyLevel::High => 3,
            UrgencyLevel::Normal => 2,
            UrgencyLevel::Low => 1,
        }
    }
}

string_enum!(
    Sentiment, "sentiment" {
        Positive => "positive",
        Negative => "negative",
        Neutral => "neutral",
        Controversial => "controversial",
    }
);

string_enum!(
    /// Human moderation verdict, kept apart from the model's relevance score.
    ModerationStatus, "moderation status" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    DigestStatus, "digest status" {
        Draft => "draft",
        Review => "review",
        Published => "published",
    }
);

string_enum!(
    /// Topical bucket of a digest. Declaration order is render order.
    DigestSection, "digest section" {
        Critical => "critical",
        Releases => "releases",
        News => "news",
        Ai => "ai",
        Reading => "reading",
        Trending => "trending",
    }
);

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: String,
    pub config: Value,
    pub priority: Priority,
    pub check_frequency: CheckFrequency,
    pub is_active: bool,
    pub category_tags: Vec<String>,
    pub notes: Option<String>,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    /// Fresh source record with empty health fields.
    pub fn from_new(new: NewSource, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: new.name,
            source_type: new.source_type,
            url: new.url,
            config: new.config,
            priority: new.priority,
            check_frequency: new.check_frequency,
            is_active: new.is_active,
            category_tags: new.category_tags,
            notes: new.notes,
            last_fetch_at: None,
            last_error: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// String value of a per-type config key, ignoring empty strings.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn config_i64(&self, key: &str) -> Option<i64> {
        self.config.get(key).and_then(Value::as_i64)
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }
}

/// Payload for registering a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSource {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default = "NewSource::default_priority")]
    pub priority: Priority,
    #[serde(default = "NewSource::default_frequency")]
    pub check_frequency: CheckFrequency,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub category_tags: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewSource {
    pub fn new(name: impl Into<String>, source_type: SourceType, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type,
            url: url.into(),
            config: empty_object(),
            priority: Self::default_priority(),
            check_frequency: Self::default_frequency(),
            is_active: true,
            category_tags: Vec::new(),
            notes: None,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_frequency(mut self, frequency: CheckFrequency) -> Self {
        self.check_frequency = frequency;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn default_priority() -> Priority {
        Priority::Medium
    }

    fn default_frequency() -> CheckFrequency {
        CheckFrequency::Daily
    }
}

/// Partial edit of a source. Health fields are not editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub source_type: Option<SourceType>,
    pub url: Option<String>,
    pub config: Option<Value>,
    pub priority: Option<Priority>,
    pub check_frequency: Option<CheckFrequency>,
    pub is_active: Option<bool>,
    pub category_tags: Option<Vec<String>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFilter {
    #[serde(rename = "type")]
    pub source_type: Option<SourceType>,
    pub is_active: Option<bool>,
    pub priority: Option<Priority>,
}

impl SourceFilter {
    pub fn matches(&self, source: &Source) -> bool {
        self.source_type.is_none_or(|t| t == source.source_type)
            && self.is_active.is_none_or(|a| a == source.is_active)
            && self.priority.is_none_or(|p| p == source.priority)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub metadata: Value,
    pub is_processed: bool,
}

/// Canonical item shape produced by a collector, before it is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewRawItem {
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub author: Option<String>,
    pub published_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedItem {
    pub id: Uuid,
    pub raw_item_id: Uuid,
    pub summary: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub relevance_score: f64,
    pub urgency_level: UrgencyLevel,
    pub sentiment: Option<Sentiment>,
    pub action_items: Vec<String>,
    pub llm_model: String,
    pub llm_tokens_used: i32,
    pub llm_cost: f64,
    pub moderation_status: ModerationStatus,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedItem {
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Digest {
    pub id: Uuid,
    pub date: NaiveDate,
    pub title: String,
    pub content: String,
    pub status: DigestStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<DigestItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DigestItem {
    pub id: Uuid,
    pub digest_id: Uuid,
    pub processed_item_id: Uuid,
    pub section: DigestSection,
    pub order: i32,
}

/// Append-only record of one served completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsageRecord {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub tokens_in: i32,
    pub tokens_out: i32,
    pub cost: f64,
    pub operation: String,
    pub created_at: DateTime<Utc>,
}
