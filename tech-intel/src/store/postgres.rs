use super::{apply_source_update, sort_label_counts, LabelCount, ProcessedItemQuery, SourceItemCount, Store, StoreCounts};
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

const PROCESSED_VIEW_SELECT: &str = r#"
    SELECT p.*,
           r.source_id AS r_source_id, r.external_id AS r_external_id, r.title AS r_title,
           r.content AS r_content, r.url AS r_url, r.author AS r_author,
           r.published_at AS r_published_at, r.fetched_at AS r_fetched_at,
           r.metadata AS r_metadata, r.is_processed AS r_is_processed
    FROM processed_items p
    JOIN raw_items r ON r.id = p.raw_item_id
"#;

/// Postgres-backed store.
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.db).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    async fn attach_items(&self, mut digests: Vec<Digest>) -> Result<Vec<Digest>> {
        if digests.is_empty() {
            return Ok(digests);
        }
        let ids: Vec<Uuid> = digests.iter().map(|d| d.id).collect();
        let rows = sqlx::query(
            "SELECT * FROM digest_items WHERE digest_id = ANY($1) ORDER BY item_order ASC",
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<DigestItem>> = HashMap::new();
        for row in rows {
            let item = digest_item_from_row(&row)?;
            grouped.entry(item.digest_id).or_default().push(item);
        }
        for digest in &mut digests {
            digest.items = grouped.remove(&digest.id).unwrap_or_default();
        }
        Ok(digests)
    }

    async fn attach_one(&self, digest: Digest) -> Result<Digest> {
        let mut digests = self.attach_items(vec![digest]).await?;
        digests
            .pop()
            .ok_or_else(|| Error::Config("digest vanished while loading items".to_string()))
    }
}

fn decode<T>(value: String) -> std::result::Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    value.parse().map_err(|e: UnknownVariant| sqlx::Error::Decode(Box::new(e)))
}

fn source_from_row(row: &PgRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        source_type: decode(row.try_get("type")?)?,
        url: row.try_get("url")?,
        config: row.try_get("config")?,
        priority: decode(row.try_get("priority")?)?,
        check_frequency: decode(row.try_get("check_frequency")?)?,
        is_active: row.try_get("is_active")?,
        category_tags: row.try_get("category_tags")?,
        notes: row.try_get("notes")?,
        last_fetch_at: row.try_get("last_fetch_at")?,
        last_error: row.try_get("last_error")?,
        error_count: row.try_get("error_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn raw_item_from_row(row: &PgRow) -> Result<RawItem> {
    Ok(RawItem {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        url: row.try_get("url")?,
        author: row.try_get("author")?,
        published_at: row.try_get("published_at")?,
        fetched_at: row.try_get("fetched_at")?,
        metadata: row.try_get("metadata")?,
        is_processed: row.try_get("is_processed")?,
    })
}

fn processed_from_row(row: &PgRow) -> Result<ProcessedItem> {
    let sentiment: Option<String> = row.try_get("sentiment")?;
    Ok(ProcessedItem {
        id: row.try_get("id")?,
        raw_item_id: row.try_get("raw_item_id")?,
        summary: row.try_get("summary")?,
        categories: row.try_get("categories")?,
        tags: row.try_get("tags")?,
        relevance_score: row.try_get("relevance_score")?,
        urgency_level: decode(row.try_get("urgency_level")?)?,
        sentiment: sentiment.map(decode::<Sentiment>).transpose()?,
        action_items: row.try_get("action_items")?,
        llm_model: row.try_get("llm_model")?,
        llm_tokens_used: row.try_get("llm_tokens_used")?,
        llm_cost: row.try_get("llm_cost")?,
        moderation_status: decode(row.try_get("moderation_status")?)?,
        processed_at: row.try_get("processed_at")?,
    })
}

fn processed_view_from_row(row: &PgRow) -> Result<ProcessedItemView> {
    let item = processed_from_row(row)?;
    let raw_item = RawItem {
        id: item.raw_item_id,
        source_id: row.try_get("r_source_id")?,
        external_id: row.try_get("r_external_id")?,
        title: row.try_get("r_title")?,
        content: row.try_get("r_content")?,
        url: row.try_get("r_url")?,
        author: row.try_get("r_author")?,
        published_at: row.try_get("r_published_at")?,
        fetched_at: row.try_get("r_fetched_at")?,
        metadata: row.try_get("r_metadata")?,
        is_processed: row.try_get("r_is_processed")?,
    };
    Ok(ProcessedItemView { item, raw_item })
}

fn digest_from_row(row: &PgRow) -> Result<Digest> {
    Ok(Digest {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        status: decode(row.try_get("status")?)?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        items: Vec::new(),
    })
}

fn digest_item_from_row(row: &PgRow) -> Result<DigestItem> {
    Ok(DigestItem {
        id: row.try_get("id")?,
        digest_id: row.try_get("digest_id")?,
        processed_item_id: row.try_get("processed_item_id")?,
        section: decode(row.try_get("section")?)?,
        order: row.try_get("item_order")?,
    })
}

fn usage_from_row(row: &PgRow) -> Result<LlmUsageRecord> {
    Ok(LlmUsageRecord {
        id: row.try_get("id")?,
        provider: row.try_get("provider")?,
        model: row.try_get("model")?,
        tokens_in: row.try_get("tokens_in")?,
        tokens_out: row.try_get("tokens_out")?,
        cost: row.try_get("cost")?,
        operation: row.try_get("operation")?,
        created_at: row.try_get("created_at")?,
    })
}

fn label_counts_from_rows(rows: &[PgRow]) -> Result<Vec<LabelCount>> {
    rows.iter()
        .map(|row| {
            Ok(LabelCount {
                label: row.try_get("label")?,
                count: row.try_get("count")?,
            })
        })
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn list_sources(&self, filter: &SourceFilter) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sources
            WHERE ($1::text IS NULL OR type = $1)
              AND ($2::bool IS NULL OR is_active = $2)
              AND ($3::text IS NULL OR priority = $3)
            ORDER BY
                CASE priority WHEN 'high' THEN 3 WHEN 'medium' THEN 2 ELSE 1 END DESC,
                name ASC
            "#,
        )
        .bind(filter.source_type.map(|t| t.as_str()))
        .bind(filter.is_active)
        .bind(filter.priority.map(|p| p.as_str()))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    async fn get_source(&self, id: Uuid) -> Result<Source> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(Error::not_found("Source", id)),
        }
    }

    async fn create_source(&self, source: NewSource) -> Result<Source> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO sources (id, name, type, url, config, priority, check_frequency, is_active,
                                 category_tags, notes, error_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $11)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&source.name)
        .bind(source.source_type.as_str())
        .bind(&source.url)
        .bind(&source.config)
        .bind(source.priority.as_str())
        .bind(source.check_frequency.as_str())
        .bind(source.is_active)
        .bind(&source.category_tags)
        .bind(&source.notes)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        info!("Added new source: {} with ID: {}", source.name, id);
        source_from_row(&row)
    }

    async fn update_source(&self, id: Uuid, update: SourceUpdate) -> Result<Source> {
        let mut source = self.get_source(id).await?;
        apply_source_update(&mut source, update);

        let row = sqlx::query(
            r#"
            UPDATE sources
            SET name = $1, type = $2, url = $3, config = $4, priority = $5, check_frequency = $6,
                is_active = $7, category_tags = $8, notes = $9, updated_at = $10
            WHERE id = $11
            RETURNING *
            "#,
        )
        .bind(&source.name)
        .bind(source.source_type.as_str())
        .bind(&source.url)
        .bind(&source.config)
        .bind(source.priority.as_str())
        .bind(source.check_frequency.as_str())
        .bind(source.is_active)
        .bind(&source.category_tags)
        .bind(&source.notes)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => source_from_row(&row),
            None => Err(Error::not_found("Source", id)),
        }
    }

    async fn delete_source(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM sources WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("Source", id));
        }
        info!("Deleted source: {}", id);
        Ok(())
    }

    async fn active_sources(&self, frequency: CheckFrequency) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT * FROM sources WHERE is_active = true AND check_frequency = $1 ORDER BY name ASC",
        )
        .bind(frequency.as_str())
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    async fn record_fetch(&self, id: Uuid, outcome: FetchOutcome, at: DateTime<Utc>) -> Result<()> {
        match outcome {
            FetchOutcome::Success => {
                sqlx::query(
                    r#"
                    UPDATE sources
                    SET last_fetch_at = $1, last_error = NULL, error_count = 0, updated_at = $1
                    WHERE id = $2
                    "#,
                )
                .bind(at)
                .bind(id)
                .execute(&self.db)
                .await?;
            }
            FetchOutcome::Failure(message) => {
                sqlx::query(
                    r#"
                    UPDATE sources
                    SET last_error = $1, error_count = error_count + 1, updated_at = $2
                    WHERE id = $3
                    "#,
                )
                .bind(message)
                .bind(at)
                .bind(id)
                .execute(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn raw_item_exists(&self, source_id: Uuid, external_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM raw_items WHERE source_id = $1 AND external_id = $2)",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_one(&self.db)
        .await?;
        Ok(exists)
    }

    async fn insert_raw_item(&self, source_id: Uuid, item: NewRawItem, fetched_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO raw_items (id, source_id, external_id, title, content, url, author,
                                   published_at, fetched_at, metadata, is_processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, false)
            ON CONFLICT (source_id, external_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_id)
        .bind(&item.external_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.url)
        .bind(&item.author)
        .bind(item.published_at)
        .bind(fetched_at)
        .bind(&item.metadata)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn unprocessed_raw_items(&self, limit: usize) -> Result<Vec<RawItem>> {
        let rows = sqlx::query(
            "SELECT * FROM raw_items WHERE is_processed = false ORDER BY published_at DESC, id ASC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(raw_item_from_row).collect()
    }

    async fn mark_processed(&self, raw_item_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE raw_items SET is_processed = true WHERE id = $1")
            .bind(raw_item_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn get_raw_item(&self, id: Uuid) -> Result<RawItem> {
        let row = sqlx::query("SELECT * FROM raw_items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => raw_item_from_row(&row),
            None => Err(Error::not_found("RawItem", id)),
        }
    }

    async fn raw_item_count(&self, source_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM raw_items WHERE source_id = $1")
            .bind(source_id)
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    async fn insert_processed_item(&self, item: ProcessedItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_items (id, raw_item_id, summary, categories, tags, relevance_score,
                                         urgency_level, sentiment, action_items, llm_model,
                                         llm_tokens_used, llm_cost, moderation_status, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (raw_item_id) DO NOTHING
            "#,
        )
        .bind(item.id)
        .bind(item.raw_item_id)
        .bind(&item.summary)
        .bind(&item.categories)
        .bind(&item.tags)
        .bind(item.relevance_score)
        .bind(item.urgency_level.as_str())
        .bind(item.sentiment.map(|s| s.as_str()))
        .bind(&item.action_items)
        .bind(&item.llm_model)
        .bind(item.llm_tokens_used)
        .bind(item.llm_cost)
        .bind(item.moderation_status.as_str())
        .bind(item.processed_at)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_processed_item(&self, id: Uuid) -> Result<ProcessedItemView> {
        let sql = format!("{} WHERE p.id = $1", PROCESSED_VIEW_SELECT);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.db).await?;

        match row {
            Some(row) => processed_view_from_row(&row),
            None => Err(Error::not_found("ProcessedItem", id)),
        }
    }

    async fn list_processed_items(&self, query: &ProcessedItemQuery) -> Result<Vec<ProcessedItemView>> {
        let sql = format!(
            "{} WHERE ($1::text IS NULL OR $1 = ANY(p.categories)) ORDER BY p.processed_at DESC, p.id ASC LIMIT $2 OFFSET $3",
            PROCESSED_VIEW_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(query.category.as_deref())
            .bind(query.limit.unwrap_or(50))
            .bind(query.offset.unwrap_or(0))
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(processed_view_from_row).collect()
    }

    async fn set_moderation(&self, id: Uuid, status: ModerationStatus) -> Result<ProcessedItem> {
        let row = sqlx::query("UPDATE processed_items SET moderation_status = $1 WHERE id = $2 RETURNING *")
            .bind(status.as_str())
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => processed_from_row(&row),
            None => Err(Error::not_found("ProcessedItem", id)),
        }
    }

    async fn digest_candidates(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_relevance: f64,
    ) -> Result<Vec<DigestCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT p.*, r.title AS raw_title, r.url AS raw_url, s.name AS source_name
            FROM processed_items p
            JOIN raw_items r ON r.id = p.raw_item_id
            JOIN sources s ON s.id = r.source_id
            WHERE p.processed_at >= $1
              AND p.processed_at < $2
              AND p.relevance_score >= $3
              AND p.moderation_status <> 'rejected'
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(min_relevance)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DigestCandidate {
                    item: processed_from_row(row)?,
                    title: row.try_get("raw_title")?,
                    url: row.try_get("raw_url")?,
                    source_name: row.try_get("source_name")?,
                })
            })
            .collect()
    }

    async fn get_digest(&self, id: Uuid) -> Result<Digest> {
        let row = sqlx::query("SELECT * FROM digests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => self.attach_one(digest_from_row(&row)?).await,
            None => Err(Error::not_found("Digest", id)),
        }
    }

    async fn get_digest_by_date(&self, date: NaiveDate) -> Result<Option<Digest>> {
        let row = sqlx::query("SELECT * FROM digests WHERE date = $1")
            .bind(date)
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some(self.attach_one(digest_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_digests(&self, filter: &DigestFilter) -> Result<Vec<Digest>> {
        let rows = sqlx::query(
            "SELECT * FROM digests WHERE ($1::text IS NULL OR status = $1) ORDER BY date DESC LIMIT $2",
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.unwrap_or(30))
        .fetch_all(&self.db)
        .await?;

        let digests = rows.iter().map(digest_from_row).collect::<Result<Vec<_>>>()?;
        self.attach_items(digests).await
    }

    async fn latest_published_digest(&self) -> Result<Option<Digest>> {
        let row = sqlx::query("SELECT * FROM digests WHERE status = 'published' ORDER BY date DESC LIMIT 1")
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => Ok(Some(self.attach_one(digest_from_row(&row)?).await?)),
            None => Ok(None),
        }
    }

    async fn save_draft_digest(&self, draft: DraftDigest, at: DateTime<Utc>) -> Result<Digest> {
        let mut tx = self.db.begin().await?;

        let existing = sqlx::query("SELECT id, status FROM digests WHERE date = $1 FOR UPDATE")
            .bind(draft.date)
            .fetch_optional(&mut *tx)
            .await?;

        let digest_id = match existing {
            Some(row) => {
                let status: DigestStatus = decode(row.try_get("status")?)?;
                if status == DigestStatus::Published {
                    return Err(Error::Conflict(format!("digest for {} is already published", draft.date)));
                }
                let id: Uuid = row.try_get("id")?;
                sqlx::query("UPDATE digests SET title = $1, content = $2, updated_at = $3 WHERE id = $4")
                    .bind(&draft.title)
                    .bind(&draft.content)
                    .bind(at)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO digests (id, date, title, content, status, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, 'draft', $5, $5)
                    "#,
                )
                .bind(id)
                .bind(draft.date)
                .bind(&draft.title)
                .bind(&draft.content)
                .bind(at)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        sqlx::query("DELETE FROM digest_items WHERE digest_id = $1")
            .bind(digest_id)
            .execute(&mut *tx)
            .await?;

        for item in &draft.items {
            sqlx::query(
                r#"
                INSERT INTO digest_items (id, digest_id, processed_item_id, section, item_order)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(digest_id)
            .bind(item.processed_item_id)
            .bind(item.section.as_str())
            .bind(item.order)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved draft digest {} with {} items", digest_id, draft.items.len());

        self.get_digest(digest_id).await
    }

    async fn update_digest(&self, id: Uuid, update: DigestUpdate, at: DateTime<Utc>) -> Result<Digest> {
        let current = self.get_digest(id).await?;
        if current.status == DigestStatus::Published {
            return Err(Error::Conflict(format!("digest {} is published", id)));
        }

        sqlx::query(
            r#"
            UPDATE digests
            SET title = COALESCE($1, title), content = COALESCE($2, content), updated_at = $3
            WHERE id = $4 AND status <> 'published'
            "#,
        )
        .bind(update.title)
        .bind(update.content)
        .bind(at)
        .bind(id)
        .execute(&self.db)
        .await?;

        self.get_digest(id).await
    }

    async fn publish_digest(&self, id: Uuid, at: DateTime<Utc>) -> Result<Digest> {
        let result = sqlx::query(
            r#"
            UPDATE digests
            SET status = 'published', published_at = $1, updated_at = $1
            WHERE id = $2 AND status <> 'published'
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() > 0 {
            info!("Published digest: {}", id);
        }
        self.get_digest(id).await
    }

    async fn record_usage(&self, record: LlmUsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_usage (id, provider, model, tokens_in, tokens_out, cost, operation, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.tokens_in)
        .bind(record.tokens_out)
        .bind(record.cost)
        .bind(&record.operation)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<LlmUsageRecord>> {
        let rows = sqlx::query("SELECT * FROM llm_usage WHERE created_at >= $1 ORDER BY created_at ASC")
            .bind(since)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(usage_from_row).collect()
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM sources) AS sources,
                (SELECT COUNT(*) FROM sources WHERE is_active = true) AS active_sources,
                (SELECT COUNT(*) FROM raw_items) AS raw_items,
                (SELECT COUNT(*) FROM processed_items) AS processed_items,
                (SELECT COUNT(*) FROM digests) AS digests,
                (SELECT COUNT(*) FROM digests WHERE status = 'published') AS published_digests
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(StoreCounts {
            sources: row.try_get("sources")?,
            active_sources: row.try_get("active_sources")?,
            raw_items: row.try_get("raw_items")?,
            processed_items: row.try_get("processed_items")?,
            digests: row.try_get("digests")?,
            published_digests: row.try_get("published_digests")?,
        })
    }

    async fn collection_counts(&self, since: DateTime<Utc>) -> Result<Vec<SourceItemCount>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name, COUNT(r.id) AS count
            FROM sources s
            JOIN raw_items r ON r.source_id = s.id AND r.fetched_at >= $1
            GROUP BY s.id, s.name
            ORDER BY count DESC, s.name ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.db)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SourceItemCount {
                    source_id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }

    async fn category_counts(&self) -> Result<Vec<LabelCount>> {
        let rows = sqlx::query(
            r#"
            SELECT category AS label, COUNT(*) AS count
            FROM processed_items, unnest(categories) AS category
            GROUP BY category
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        let mut counts = label_counts_from_rows(&rows)?;
        sort_label_counts(&mut counts);
        Ok(counts)
    }

    async fn tag_counts(&self, limit: usize) -> Result<Vec<LabelCount>> {
        let rows = sqlx::query(
            r#"
            SELECT tag AS label, COUNT(*) AS count
            FROM processed_items, unnest(tags) AS tag
            GROUP BY tag
            ORDER BY count DESC, tag ASC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        label_counts_from_rows(&rows)
    }
}
