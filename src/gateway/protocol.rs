use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{ChatError, IndexError, QueryError};
use crate::knowledge::{IngestDocument, SearchQuery};
use crate::routing::{CallerContext, Complexity, Mode, ProviderTier, TaskType};

// ============================================================================
// Ingestion
// ============================================================================

/// Body of `POST /knowledge/ingest`: a bare array or `{"documents": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum IngestBody {
    List(Vec<IngestDocument>),
    Wrapped { documents: Vec<IngestDocument> },
}

impl IngestBody {
    pub fn into_documents(self) -> Vec<IngestDocument> {
        match self {
            IngestBody::List(docs) | IngestBody::Wrapped { documents: docs } => docs,
        }
    }
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(flatten)]
    pub query: SearchQuery,
    #[serde(default)]
    pub caller_context: CallerContext,
}

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub caller_context: CallerContext,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub complexity: Complexity,
}

/// A knowledge chunk the answer was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSource {
    pub id: String,
    pub title: String,
    pub source_document: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub provider_used: ProviderTier,
    pub model: String,
    pub mode: Mode,
    pub response: String,
    pub escalate: bool,
    pub sources: Vec<ChatSource>,
    /// Grounding search was degraded or unavailable.
    pub degraded: bool,
}

// ============================================================================
// Administration
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime: u64,
    pub embedding: ComponentHealth,
    pub index: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn ok(model: Option<String>) -> Self {
        Self {
            status: "ok".to_string(),
            model,
            error: None,
        }
    }

    pub fn unavailable(model: Option<String>, error: impl ToString) -> Self {
        Self {
            status: "unavailable".to_string(),
            model,
            error: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// ============================================================================
// Errors
// ============================================================================

/// An error returned to HTTP callers as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: &self.message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        if e.is_unavailable() {
            ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        } else {
            error!("knowledge index error: {e}");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "knowledge index error")
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidQuery(_) => ApiError::bad_request(e.to_string()),
            QueryError::Index(inner) => inner.into(),
            QueryError::Cancelled => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let status = match e {
            ChatError::CreditDenied => StatusCode::PAYMENT_REQUIRED,
            ChatError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ChatError::Backend { .. } => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::Confidentiality;

    #[test]
    fn ingest_body_accepts_both_shapes() {
        let doc = r#"{"content":"x","source":"a.md","domainTags":["billing"],"documentType":"faq","confidentiality":"public"}"#;
        let list: IngestBody = serde_json::from_str(&format!("[{doc}]")).unwrap();
        assert_eq!(list.into_documents().len(), 1);
        let wrapped: IngestBody =
            serde_json::from_str(&format!(r#"{{"documents":[{doc},{doc}]}}"#)).unwrap();
        assert_eq!(wrapped.into_documents().len(), 2);
    }

    #[test]
    fn search_request_flattens_query() {
        let req: SearchRequest = serde_json::from_str(
            r#"{"queryText":"refunds","topK":3,"confidentialityFilter":["internal"],
                "callerContext":{"role":"admin"}}"#,
        )
        .unwrap();
        assert_eq!(req.query.query_text, "refunds");
        assert_eq!(req.query.top_k, Some(3));
        assert_eq!(req.query.confidentiality_filter, vec![Confidentiality::Internal]);
        assert_eq!(req.caller_context.role.as_deref(), Some("admin"));
        assert!(req.query.use_semantic_ranking);
    }

    #[test]
    fn chat_request_defaults() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.task_type, TaskType::Chat);
        assert_eq!(req.complexity, Complexity::Moderate);
        assert!(req.caller_context.role.is_none());
    }

    #[test]
    fn chat_errors_map_to_status() {
        assert_eq!(ApiError::from(ChatError::CreditDenied).status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            ApiError::from(ChatError::Backend { tier: "deep" }).status,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(QueryError::InvalidQuery("topK".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IndexError::Unavailable("locked".into())).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn sqlite_text_never_reaches_callers() {
        let locked = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some("database table is locked: documents".into()),
        );
        let api = ApiError::from(IndexError::from(locked));
        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!api.message.contains("documents"));

        let corrupt = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            Some("malformed page 7 in kb.db".into()),
        );
        let api = ApiError::from(IndexError::from(corrupt));
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("kb.db"));
    }
}
