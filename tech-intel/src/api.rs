use crate::digest::DigestGenerator;
use crate::dispatcher::CollectorDispatcher;
use crate::llm::{LlmProviderRegistry, ProviderName};
use crate::processing::ProcessingScheduler;
use crate::stats::{StatsService, DEFAULT_COLLECTION_DAYS, DEFAULT_TAG_LIMIT, DEFAULT_USAGE_DAYS};
use crate::store::{ProcessedItemQuery, Store};
use crate::types::*;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 50;

/// Everything the handlers reach, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<CollectorDispatcher>,
    pub processing: Arc<ProcessingScheduler>,
    pub digests: Arc<DigestGenerator>,
    pub llm: Arc<LlmProviderRegistry>,
    pub stats: Arc<StatsService>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::AlreadyProcessing | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Collect(_) | Error::Llm(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = json!({
            "statusCode": status.as_u16(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, Error>;

fn cors(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(origin),
        Some(Err(_)) => {
            warn!("Ignoring invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        }
        None => layer.allow_origin(Any),
    }
}

/// The `/api` router. `cors_origin` is the blog URL allowed to call it.
pub fn router(state: AppState, cors_origin: Option<&str>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources).post(create_source))
        .route("/sources/health", get(source_health))
        .route("/sources/{id}", get(get_source).put(update_source).delete(delete_source))
        .route("/collectors/trigger-all", post(trigger_all))
        .route("/collectors/trigger/{id}", post(trigger_source))
        .route("/processing/trigger", post(trigger_processing))
        .route("/processed-items", get(list_processed_items))
        .route("/processed-items/{id}", get(get_processed_item))
        .route("/processed-items/{id}/approve", post(approve_item))
        .route("/processed-items/{id}/reject", post(reject_item))
        .route("/digests", get(list_digests))
        .route("/digests/generate", post(generate_digest))
        .route("/digests/latest", get(latest_digest))
        .route("/digests/date/{date}", get(digest_by_date))
        .route("/digests/{id}", get(get_digest).put(update_digest))
        .route("/digests/{id}/publish", post(publish_digest))
        .route("/llm/providers", get(list_providers))
        .route("/llm/providers/default", put(set_default_provider))
        .route("/llm/models", get(list_local_models))
        .route("/stats", get(system_stats))
        .route("/stats/llm", get(llm_stats))
        .route("/stats/collection", get(collection_stats))
        .route("/stats/categories", get(category_stats))
        .route("/stats/tags", get(tag_stats));

    Router::new()
        .nest("/api", api)
        .layer(cors(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

// Sources

async fn list_sources(State(state): State<AppState>, Query(filter): Query<SourceFilter>) -> ApiResult<Vec<Source>> {
    Ok(Json(state.store.list_sources(&filter).await?))
}

async fn create_source(
    State(state): State<AppState>,
    Json(source): Json<NewSource>,
) -> std::result::Result<(StatusCode, Json<Source>), Error> {
    if source.name.trim().is_empty() || source.url.trim().is_empty() {
        return Err(Error::InvalidInput("name and url are required".to_string()));
    }
    let created = state.store.create_source(source).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_source(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Source> {
    Ok(Json(state.store.get_source(id).await?))
}

async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<SourceUpdate>,
) -> ApiResult<Source> {
    Ok(Json(state.store.update_source(id, update).await?))
}

async fn delete_source(State(state): State<AppState>, Path(id): Path<Uuid>) -> std::result::Result<StatusCode, Error> {
    state.store.delete_source(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn source_health(State(state): State<AppState>) -> ApiResult<Vec<SourceHealth>> {
    Ok(Json(state.stats.source_health().await?))
}

// Collection & processing

async fn trigger_source(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<TriggerResult> {
    Ok(Json(state.dispatcher.trigger_source(id).await?))
}

async fn trigger_all(State(state): State<AppState>) -> ApiResult<Vec<CollectionReport>> {
    Ok(Json(state.dispatcher.trigger_all().await?))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn trigger_processing(State(state): State<AppState>, Query(params): Query<LimitParams>) -> ApiResult<Value> {
    let processed = state.processing.trigger(params.limit).await?;
    Ok(Json(json!({ "processed": processed })))
}

// Processed items

async fn list_processed_items(
    State(state): State<AppState>,
    Query(mut query): Query<ProcessedItemQuery>,
) -> ApiResult<Vec<ProcessedItemView>> {
    query.limit = Some(query.limit.unwrap_or(DEFAULT_PAGE_SIZE));
    query.offset = Some(query.offset.unwrap_or(0));
    if query.limit.is_some_and(|l| l < 0) || query.offset.is_some_and(|o| o < 0) {
        return Err(Error::InvalidInput("limit and offset must not be negative".to_string()));
    }
    Ok(Json(state.store.list_processed_items(&query).await?))
}

async fn get_processed_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProcessedItemView> {
    Ok(Json(state.store.get_processed_item(id).await?))
}

async fn approve_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProcessedItem> {
    Ok(Json(state.store.set_moderation(id, ModerationStatus::Approved).await?))
}

async fn reject_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<ProcessedItem> {
    Ok(Json(state.store.set_moderation(id, ModerationStatus::Rejected).await?))
}

// Digests

async fn list_digests(State(state): State<AppState>, Query(filter): Query<DigestFilter>) -> ApiResult<Vec<Digest>> {
    Ok(Json(state.digests.list(&filter).await?))
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    date: Option<NaiveDate>,
}

async fn generate_digest(State(state): State<AppState>, Query(params): Query<GenerateParams>) -> ApiResult<Value> {
    let date = params.date.unwrap_or_else(|| Utc::now().date_naive());
    let digest = state.digests.generate_for_date(date).await?;
    Ok(Json(json!({ "success": true, "digest": digest })))
}

async fn latest_digest(State(state): State<AppState>) -> ApiResult<Option<Digest>> {
    Ok(Json(state.digests.latest().await?))
}

async fn digest_by_date(State(state): State<AppState>, Path(date): Path<NaiveDate>) -> ApiResult<Digest> {
    state
        .digests
        .by_date(date)
        .await?
        .map(Json)
        .ok_or_else(|| Error::not_found("Digest", date))
}

async fn get_digest(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Digest> {
    Ok(Json(state.digests.get(id).await?))
}

async fn update_digest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<DigestUpdate>,
) -> ApiResult<Digest> {
    Ok(Json(state.digests.update(id, update).await?))
}

async fn publish_digest(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Value> {
    let digest = state.digests.publish(id).await?;
    Ok(Json(json!({ "success": true, "digest": digest })))
}

// LLM

async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "default": state.llm.default_provider().await,
        "providers": state.llm.list_providers().await,
    }))
}

#[derive(Debug, Deserialize)]
struct DefaultProviderBody {
    provider: String,
}

async fn set_default_provider(
    State(state): State<AppState>,
    Json(body): Json<DefaultProviderBody>,
) -> ApiResult<Value> {
    let name: ProviderName = body
        .provider
        .parse()
        .map_err(|e: crate::llm::UnknownProvider| Error::InvalidInput(e.to_string()))?;
    state.llm.set_default_provider(name).await?;
    Ok(Json(json!({ "success": true, "default": name })))
}

async fn list_local_models(State(state): State<AppState>) -> ApiResult<Value> {
    let models = state.llm.list_local_models().await?;
    Ok(Json(json!({ "models": models })))
}

// Stats

#[derive(Debug, Deserialize)]
struct DaysParams {
    days: Option<i64>,
}

fn days_or(params: &DaysParams, default: i64) -> Result<i64> {
    match params.days {
        Some(days) if days < 0 => Err(Error::InvalidInput("days must not be negative".to_string())),
        Some(days) => Ok(days),
        None => Ok(default),
    }
}

async fn system_stats(State(state): State<AppState>) -> ApiResult<crate::stats::SystemStats> {
    Ok(Json(state.stats.system_stats().await?))
}

async fn llm_stats(State(state): State<AppState>, Query(params): Query<DaysParams>) -> ApiResult<crate::llm::UsageSummary> {
    let days = days_or(&params, DEFAULT_USAGE_DAYS)?;
    Ok(Json(state.stats.llm_usage(days).await?))
}

async fn collection_stats(
    State(state): State<AppState>,
    Query(params): Query<DaysParams>,
) -> ApiResult<Vec<crate::store::SourceItemCount>> {
    let days = days_or(&params, DEFAULT_COLLECTION_DAYS)?;
    Ok(Json(state.stats.collection_stats(days).await?))
}

async fn category_stats(State(state): State<AppState>) -> ApiResult<Vec<crate::store::LabelCount>> {
    Ok(Json(state.stats.category_distribution().await?))
}

async fn tag_stats(State(state): State<AppState>, Query(params): Query<LimitParams>) -> ApiResult<Vec<crate::store::LabelCount>> {
    Ok(Json(state.stats.tag_cloud(params.limit.unwrap_or(DEFAULT_TAG_LIMIT)).await?))
}
