//! HTTP API over the feed engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (version, embedding version, index state) |
//! | `POST` | `/feed/generate` | Rank content for a prompt, one page at a time |
//! | `POST` | `/feed/share` | Freeze a feed result under a share id |
//! | `GET`  | `/feed/{share_id}` | Resolve a share id to its snapshot |
//! | `POST` | `/content/ingest` | Ingest a batch of scraped records |
//! | `GET`  | `/tribes` | Most-followed tribes |
//! | `POST` | `/tribes` | Create a tribe |
//! | `POST` | `/tribes/{id}/follow` | Follow a tribe |
//! | `POST` | `/tribes/{id}/unfollow` | Unfollow a tribe |
//! | `GET`  | `/tribes/{id}/feed` | A tribe's own feed |
//! | `GET`  | `/index/stats` | Index, cache and content counters |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_page_token", "message": "...", "retryable": false } }
//! ```
//!
//! `retryable: true` means the same request may succeed later, e.g. after
//! an index rebuild triggered by an embedding model change (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

use tribed_core::engine::{EngineStats, IngestReport, NewTribe};
use tribed_core::error::{EmbeddingError, IndexError};
use tribed_core::index::IndexState;
use tribed_core::models::{FeedRequest, FeedResult, ShareSnapshot, Tribe, UserContext};
use tribed_core::normalize::RawRecord;
use tribed_core::FeedError;

use crate::app::{self, Engine};
use crate::config::Config;

const DEFAULT_TRIBE_LIMIT: usize = 50;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(app::open_engine(config).await?);
    if config.embedding.is_enabled() {
        match engine.embed_pending().await {
            Ok(report) if report.attempted > 0 => tracing::info!(
                attempted = report.attempted,
                embedded = report.embedded,
                failed = report.failed,
                "embedded pending content"
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "pending embeddings not retried"),
        }
    }
    let compactor = spawn_compactor(engine.clone(), config.index.compact_interval_secs);

    let app = router(engine.clone());
    let bind_addr = config.server.bind.clone();
    println!("tribed listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    compactor.abort();
    engine.shutdown();
    engine.store().pool().close().await;
    tracing::info!("server stopped");
    Ok(())
}

/// Build the router; exposed for embedding the API in another binary.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/feed/generate", post(handle_generate))
        .route("/feed/share", post(handle_share))
        .route("/feed/{share_id}", get(handle_get_share))
        .route("/content/ingest", post(handle_ingest))
        .route("/tribes", get(handle_list_tribes).post(handle_create_tribe))
        .route("/tribes/{id}/follow", post(handle_follow))
        .route("/tribes/{id}/unfollow", post(handle_unfollow))
        .route("/tribes/{id}/feed", get(handle_tribe_feed))
        .route("/index/stats", get(handle_stats))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Periodically compacts the index once tombstones pass the configured
/// ratio.
fn spawn_compactor(engine: Arc<Engine>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match engine.maybe_compact() {
                Ok(Some(removed)) => tracing::info!(removed, "index compacted"),
                Ok(None) => {}
                Err(FeedError::ServiceUnavailable(reason)) => {
                    tracing::debug!(reason = %reason, "compaction skipped")
                }
                Err(e) => tracing::warn!(error = %e, "compaction failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    retryable: bool,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                retryable: self.retryable,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        retryable: false,
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<FeedError> for AppError {
    fn from(err: FeedError) -> Self {
        let status = match &err {
            FeedError::Ingestion(_)
            | FeedError::InvalidPrompt
            | FeedError::InvalidPageToken(_)
            | FeedError::InvalidRequest(_)
            | FeedError::Config(_) => StatusCode::BAD_REQUEST,
            FeedError::ShareNotFound(_)
            | FeedError::TribeNotFound(_)
            | FeedError::ContentNotFound(_) => StatusCode::NOT_FOUND,
            FeedError::ServiceUnavailable(_)
            | FeedError::Index(IndexError::VersionMismatch { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            FeedError::Embedding(EmbeddingError::Disabled) => StatusCode::BAD_REQUEST,
            FeedError::Embedding(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            FeedError::Embedding(EmbeddingError::Exhausted { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            FeedError::Embedding(_) | FeedError::Index(_) | FeedError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %err, "request failed");
        }
        let code = match &err {
            FeedError::Embedding(EmbeddingError::Disabled) => "embeddings_disabled",
            other => other.code(),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    embedding_version: String,
    index: IndexState,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        embedding_version: state.engine.embedding_version(),
        index: state.engine.index_stats().state,
    })
}

// ============ Feeds ============

#[derive(Deserialize)]
struct GenerateBody {
    #[serde(flatten)]
    request: FeedRequest,
    #[serde(default)]
    user_ref: Option<String>,
}

async fn handle_generate(
    State(state): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> Result<Json<FeedResult>, AppError> {
    let Json(body) = body?;
    let user = state.engine.user_context(body.user_ref.as_deref()).await?;
    let feed = state.engine.generate_feed(&body.request, &user).await?;
    Ok(Json(feed))
}

#[derive(Deserialize)]
struct ShareBody {
    feed: FeedResult,
    owner_ref: String,
}

#[derive(Serialize)]
struct ShareResponse {
    share_id: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn handle_share(
    State(state): State<AppState>,
    body: Result<Json<ShareBody>, JsonRejection>,
) -> Result<(StatusCode, Json<ShareResponse>), AppError> {
    let Json(body) = body?;
    if body.owner_ref.trim().is_empty() {
        return Err(bad_request("owner_ref must not be empty"));
    }
    let snapshot = state.engine.create_share(&body.feed, &body.owner_ref).await?;
    Ok((
        StatusCode::CREATED,
        Json(ShareResponse {
            share_id: snapshot.share_id,
            created_at: snapshot.created_at,
        }),
    ))
}

async fn handle_get_share(
    State(state): State<AppState>,
    Path(share_id): Path<String>,
) -> Result<Json<ShareSnapshot>, AppError> {
    Ok(Json(state.engine.get_shared_feed(&share_id).await?))
}

// ============ Ingestion ============

#[derive(Deserialize)]
struct IngestBody {
    records: Vec<RawRecord>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    body: Result<Json<IngestBody>, JsonRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let Json(body) = body?;
    Ok(Json(state.engine.ingest_batch(&body.records).await?))
}

// ============ Tribes ============

#[derive(Deserialize)]
struct ListTribesQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct TribeListResponse {
    tribes: Vec<Tribe>,
}

async fn handle_list_tribes(
    State(state): State<AppState>,
    Query(query): Query<ListTribesQuery>,
) -> Result<Json<TribeListResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_TRIBE_LIMIT);
    let tribes = state.engine.discover_tribes(limit).await?;
    Ok(Json(TribeListResponse { tribes }))
}

async fn handle_create_tribe(
    State(state): State<AppState>,
    body: Result<Json<NewTribe>, JsonRejection>,
) -> Result<(StatusCode, Json<Tribe>), AppError> {
    let Json(new) = body?;
    let tribe = state.engine.create_tribe(new).await?;
    Ok((StatusCode::CREATED, Json(tribe)))
}

#[derive(Deserialize)]
struct FollowBody {
    user_ref: String,
}

async fn handle_follow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FollowBody>, JsonRejection>,
) -> Result<Json<UserContext>, AppError> {
    let Json(body) = body?;
    if body.user_ref.trim().is_empty() {
        return Err(bad_request("user_ref must not be empty"));
    }
    Ok(Json(state.engine.follow_tribe(&body.user_ref, &id).await?))
}

async fn handle_unfollow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FollowBody>, JsonRejection>,
) -> Result<Json<UserContext>, AppError> {
    let Json(body) = body?;
    if body.user_ref.trim().is_empty() {
        return Err(bad_request("user_ref must not be empty"));
    }
    Ok(Json(state.engine.unfollow_tribe(&body.user_ref, &id).await?))
}

#[derive(Deserialize)]
struct TribeFeedQuery {
    user_ref: Option<String>,
    page_size: Option<usize>,
    page_token: Option<String>,
}

async fn handle_tribe_feed(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TribeFeedQuery>,
) -> Result<Json<FeedResult>, AppError> {
    let user = state.engine.user_context(query.user_ref.as_deref()).await?;
    let feed = state
        .engine
        .tribe_feed(&id, &user, query.page_size, query.page_token)
        .await?;
    Ok(Json(feed))
}

// ============ GET /index/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<EngineStats>, AppError> {
    Ok(Json(state.engine.stats().await?))
}
