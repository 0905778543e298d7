//! Document ingestion and hybrid retrieval.
//!
//! Documents flow through [`chunking`] and [`embeddings`] into the
//! [`index`]; [`query`] serves scoped searches back out of it.

pub mod chunking;
pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod ingest;
pub mod query;
mod schema;
pub mod types;

pub use embeddings::{create_provider, EmbeddingProvider, SharedEmbeddingProvider};
pub use index::{IndexQuery, KnowledgeStore, ScoredDocument, SqliteKnowledgeIndex};
pub use ingest::{IngestOptions, IngestionPipeline};
pub use query::{QueryEngine, SearchOutcome};
pub use types::*;
