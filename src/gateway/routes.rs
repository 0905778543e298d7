use crate::gateway::protocol::*;
use crate::gateway::server::GatewayState;
use crate::knowledge::{AccessScope, IndexStats, IngestReport, SearchOutcome};
use crate::routing::CallerContext;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Upper bound on each health probe.
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Build all routes for the gateway.
pub fn build_routes(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin(state.config.gateway.allowed_origins.as_deref()))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_handler))
        // Knowledge
        .route("/knowledge/ingest", post(ingest_handler))
        .route("/knowledge/search", post(search_handler))
        .route("/knowledge/stats", get(stats_handler))
        .route("/knowledge/documents/{id}", delete(delete_document_handler))
        .route("/knowledge/purge", post(purge_handler))
        // Chat
        .route("/chat", post(chat_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn allow_origin(origins: Option<&[String]>) -> AllowOrigin {
    match origins {
        None => AllowOrigin::any(),
        Some(list) => AllowOrigin::list(list.iter().filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })),
    }
}

/// Run an index call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, crate::error::IndexError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(r) => r.map_err(ApiError::from),
        Err(e) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("index task failed: {e}"),
        )),
    }
}

// ============================================================================
// Health
// ============================================================================

async fn health_handler(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let model = Some(state.embedder.model_name());
    let embedding = match tokio::time::timeout(HEALTH_PROBE_TIMEOUT, state.embedder.ping()).await {
        Ok(Ok(())) => ComponentHealth::ok(model),
        Ok(Err(e)) => ComponentHealth::unavailable(model, e),
        Err(_) => ComponentHealth::unavailable(model, "embedding probe timed out"),
    };

    let store = state.store.clone();
    let index = match blocking(move || store.ping()).await {
        Ok(()) => ComponentHealth::ok(None),
        Err(e) => ComponentHealth::unavailable(None, e.message),
    };

    let status = if embedding.is_ok() && index.is_ok() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: state.version.clone(),
        uptime: state.start_time.elapsed().as_secs(),
        embedding,
        index,
    })
}

// ============================================================================
// Knowledge
// ============================================================================

async fn ingest_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<IngestBody>, JsonRejection>,
) -> Result<Json<IngestReport>, ApiError> {
    let Json(body) = payload?;
    let docs = body.into_documents();

    // Dropped on client disconnect, which cancels in-flight embedding calls.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let count = docs.len();
    let report = state.pipeline.ingest(docs, &cancel).await;
    info!(
        submitted = count,
        processed = report.documents_processed,
        chunks = report.chunks_created,
        failed = report.errors.len(),
        "ingest request complete"
    );
    Ok(Json(report))
}

async fn search_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchOutcome>, ApiError> {
    let Json(req) = payload?;
    let scope = caller_scope(&state, &req.caller_context);

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state.engine.search(&req.query, scope, &cancel).await?;
    Ok(Json(outcome))
}

/// Search clearance comes from who is asking, never from the query text.
fn caller_scope(state: &GatewayState, caller: &CallerContext) -> AccessScope {
    state.chat.detector().detect("", caller).mode.access_scope()
}

async fn stats_handler(State(state): State<GatewayState>) -> Result<Json<IndexStats>, ApiError> {
    let store = state.store.clone();
    let stats = blocking(move || store.stats()).await?;
    Ok(Json(stats))
}

async fn delete_document_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let store = state.store.clone();
    let target = id.clone();
    let deleted = blocking(move || store.delete(&target)).await?;
    if !deleted {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no document with id '{id}'"),
        ));
    }
    info!(id = %id, "document deleted");
    Ok(Json(DeleteResponse { deleted }))
}

async fn purge_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<PurgeRequest>, JsonRejection>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let Json(req) = payload?;
    let source = req.source.trim().to_string();
    if source.is_empty() {
        return Err(ApiError::bad_request("source must not be empty"));
    }

    let store = state.store.clone();
    let target = source.clone();
    let removed = blocking(move || store.purge_source(&target)).await?;
    info!(source = %source, removed, "source purged");
    Ok(Json(PurgeResponse { removed }))
}

// ============================================================================
// Chat
// ============================================================================

async fn chat_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let response = state.chat.answer(req, &cancel).await?;
    Ok(Json(response))
}
