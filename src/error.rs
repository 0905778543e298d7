//! Typed errors for the retrieval core.
//!
//! Library modules return these; the binary and config loader convert to
//! `anyhow::Error` at the boundary. Messages are component-local: provider
//! response bodies are logged at debug level and never embedded here.

use std::time::Duration;

use tracing::warn;

/// Failure while splitting a document into chunks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("document has no content")]
    EmptyContent,

    #[error("document must carry at least one domain tag")]
    MissingDomainTag,

    #[error("document source identifier is empty")]
    MissingSource,
}

/// Failure while producing embeddings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmbeddingError {
    /// Network failure, timeout or 5xx from the provider.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// 429 from the provider. Carries the server's `Retry-After` hint if any.
    #[error("embedding provider rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 4xx other than 429, or a response that cannot be parsed.
    #[error("embedding provider rejected input: {0}")]
    ProviderRejected(String),

    #[error("input of ~{estimated_tokens} tokens exceeds the {limit} token limit")]
    InputTooLarge { estimated_tokens: usize, limit: usize },

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding request cancelled")]
    Cancelled,
}

impl EmbeddingError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::ProviderUnavailable(_) | EmbeddingError::RateLimited { .. }
        )
    }
}

/// Failure inside the search index.
///
/// Messages never carry raw SQLite or pool text; the underlying error is
/// logged where it is converted.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The backing store could not be reached (pool exhausted, file locked,
    /// database unopenable).
    #[error("knowledge index unavailable: {0}")]
    Unavailable(String),

    /// A vector's length differs from the dimension the index was built with.
    #[error(
        "index holds {stored_dims}-dimension embeddings from '{stored_model}', \
         got a {dims}-dimension vector; re-index all documents to switch models"
    )]
    DimensionMismatch {
        stored_model: String,
        stored_dims: usize,
        dims: usize,
    },

    /// The configured embedding model differs from the one that produced the
    /// stored vectors.
    #[error(
        "index was built with embedding model '{stored_model}', configured model is \
         '{model}'; re-index all documents to switch models"
    )]
    ModelChanged { stored_model: String, model: String },

    #[error("knowledge index storage error: {0}")]
    Storage(String),
}

impl IndexError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        warn!("sqlite error: {e}");
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                IndexError::Unavailable("database busy".into())
            }
            Some(ErrorCode::CannotOpen) => IndexError::Unavailable("database cannot be opened".into()),
            Some(ErrorCode::NotADatabase) => {
                IndexError::Unavailable("file is not a knowledge index".into())
            }
            _ => IndexError::Storage("database operation failed".into()),
        }
    }
}

impl From<r2d2::Error> for IndexError {
    fn from(e: r2d2::Error) -> Self {
        warn!("index connection pool error: {e}");
        IndexError::Unavailable("no database connection available".into())
    }
}

/// Failure executing a search request.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Rejected before touching the index.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("search cancelled")]
    Cancelled,
}

/// Failure answering a chat message.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("caller has no remaining credit")]
    CreditDenied,

    #[error("invalid chat request: {0}")]
    InvalidRequest(String),

    /// The generation backend failed. Only the tier is named; provider
    /// details are logged, not returned.
    #[error("{tier} backend failed to produce a response")]
    Backend { tier: &'static str },
}
