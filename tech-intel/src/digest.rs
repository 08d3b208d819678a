use crate::store::Store;
use crate::types::*;
use crate::utils::text::truncate_chars;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Items below this relevance never reach a digest.
pub const MIN_RELEVANCE: f64 = 0.3;
pub const MAX_ITEMS_PER_SECTION: usize = 5;
const SUMMARY_CHARS: usize = 150;
const MAX_TAGS: usize = 3;
const EMPTY_SECTION: &str = "*No items for today*";
const FOOTER: &str = "---\n\n*Generated automatically by Tech Intelligence System*";

/// Section for an item. First matching rule wins.
///
/// `Trending` is never assigned; the section renders empty until trend
/// detection exists.
pub fn assign_section(urgency: UrgencyLevel, categories: &[String]) -> DigestSection {
    let has = |c: &str| categories.iter().any(|x| x == c);

    if urgency == UrgencyLevel::Critical || has("security") || has("breaking-change") {
        DigestSection::Critical
    } else if has("ai") {
        DigestSection::Ai
    } else if has("release") {
        DigestSection::Releases
    } else if has("tutorial") || has("deep-dive") {
        DigestSection::Reading
    } else {
        DigestSection::News
    }
}

pub fn section_heading(section: DigestSection) -> &'static str {
    match section {
        DigestSection::Critical => "🚨 Critical Updates (Security/Breaking Changes)",
        DigestSection::Releases => "🚀 Major Releases",
        DigestSection::News => "📰 Notable News",
        DigestSection::Ai => "🤖 AI/ML Updates",
        DigestSection::Reading => "📚 Worth Reading",
        DigestSection::Trending => "📊 Trending This Week",
    }
}

/// Urgency desc, relevance desc, then processing time and id so equal items keep a fixed order.
pub fn compare_candidates(a: &DigestCandidate, b: &DigestCandidate) -> Ordering {
    b.item
        .urgency_level
        .rank()
        .cmp(&a.item.urgency_level.rank())
        .then_with(|| b.item.relevance_score.total_cmp(&a.item.relevance_score))
        .then_with(|| a.item.processed_at.cmp(&b.item.processed_at))
        .then_with(|| a.item.id.cmp(&b.item.id))
}

/// "Tech Digest - March 4, 2025"
pub fn digest_title(date: NaiveDate) -> String {
    format!("Tech Digest - {}", date.format("%B %-d, %Y"))
}

/// Start and end of the day before `date`, as `[from, to)`.
pub fn selection_window(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let previous = date
        .pred_opt()
        .ok_or_else(|| Error::InvalidInput(format!("no day before {}", date)))?;
    Ok((
        previous.and_time(NaiveTime::MIN).and_utc(),
        date.and_time(NaiveTime::MIN).and_utc(),
    ))
}

fn render_item(candidate: &DigestCandidate) -> String {
    let tags: Vec<String> = candidate
        .item
        .tags
        .iter()
        .take(MAX_TAGS)
        .map(|t| format!("`{}`", t))
        .collect();

    let mut line = format!(
        "- **[{}]({})** - {}...\n  *Source: {}*",
        candidate.title,
        candidate.url,
        truncate_chars(&candidate.item.summary, SUMMARY_CHARS),
        candidate.source_name
    );
    if !tags.is_empty() {
        line.push(' ');
        line.push_str(&tags.join(" "));
    }
    line
}

/// Markdown for a digest. `entries` must already be in digest order.
pub fn render_digest(date: NaiveDate, entries: &[(DigestSection, &DigestCandidate)]) -> String {
    let mut out = format!("# Tech Digest - {}\n\n", date.format("%Y-%m-%d"));

    for section in DigestSection::ALL {
        let items: Vec<String> = entries
            .iter()
            .filter(|(s, _)| s == section)
            .take(MAX_ITEMS_PER_SECTION)
            .map(|(_, candidate)| render_item(candidate))
            .collect();

        out.push_str("## ");
        out.push_str(section_heading(*section));
        out.push('\n');
        if items.is_empty() {
            out.push_str(EMPTY_SECTION);
        } else {
            out.push_str(&items.join("\n\n"));
        }
        out.push_str("\n\n");
    }

    out.push_str(FOOTER);
    out.push('\n');
    out
}

/// Builds, stores and publishes daily digests.
pub struct DigestGenerator {
    store: Arc<dyn Store>,
}

impl DigestGenerator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Draft digest for `date` from items processed the day before.
    ///
    /// A published digest for the date is returned untouched. `None` when no
    /// item qualifies; nothing is written then.
    pub async fn generate_for_date(&self, date: NaiveDate) -> Result<Option<Digest>> {
        if let Some(existing) = self.store.get_digest_by_date(date).await? {
            if existing.status == DigestStatus::Published {
                info!("Digest for {} already published", date);
                return Ok(Some(existing));
            }
        }

        let (from, to) = selection_window(date)?;
        let mut candidates = self.store.digest_candidates(from, to, MIN_RELEVANCE).await?;
        if candidates.is_empty() {
            info!("No items to include in digest for {}", date);
            return Ok(None);
        }
        candidates.sort_by(compare_candidates);

        let entries: Vec<(DigestSection, &DigestCandidate)> = candidates
            .iter()
            .map(|c| (assign_section(c.item.urgency_level, &c.item.categories), c))
            .collect();

        let draft = DraftDigest {
            date,
            title: digest_title(date),
            content: render_digest(date, &entries),
            items: entries
                .iter()
                .enumerate()
                .map(|(order, (section, candidate))| DraftDigestItem {
                    processed_item_id: candidate.item.id,
                    section: *section,
                    order: order as i32,
                })
                .collect(),
        };

        match self.store.save_draft_digest(draft, Utc::now()).await {
            Ok(digest) => {
                info!("Generated digest for {} with {} items", date, digest.items.len());
                Ok(Some(digest))
            }
            Err(Error::Conflict(_)) => {
                warn!("Digest for {} was published during generation", date);
                self.store.get_digest_by_date(date).await
            }
            Err(e) => Err(e),
        }
    }

    /// Digest for the current UTC date.
    pub async fn generate_daily(&self) -> Result<Option<Digest>> {
        self.generate_for_date(Utc::now().date_naive()).await
    }

    /// Publishes once; `published_at` keeps its first value.
    pub async fn publish(&self, id: Uuid) -> Result<Digest> {
        let digest = self.store.publish_digest(id, Utc::now()).await?;
        info!("Digest {} ({}) is published", digest.id, digest.date);
        Ok(digest)
    }

    pub async fn list(&self, filter: &DigestFilter) -> Result<Vec<Digest>> {
        self.store.list_digests(filter).await
    }

    pub async fn latest(&self) -> Result<Option<Digest>> {
        self.store.latest_published_digest().await
    }

    pub async fn get(&self, id: Uuid) -> Result<Digest> {
        self.store.get_digest(id).await
    }

    pub async fn by_date(&self, date: NaiveDate) -> Result<Option<Digest>> {
        self.store.get_digest_by_date(date).await
    }

    pub async fn update(&self, id: Uuid, update: DigestUpdate) -> Result<Digest> {
        self.store.update_digest(id, update, Utc::now()).await
    }
}
