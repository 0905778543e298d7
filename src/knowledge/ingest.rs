use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, IndexError};

use super::chunking::{chunk_document, ChunkOptions};
use super::embeddings::{embed_batched, RetryPolicy, SharedEmbeddingProvider};
use super::index::KnowledgeStore;
use super::types::{EmbeddingVector, IngestDocument, IngestFailure, IngestReport, KnowledgeChunk};

/// Tunables for [`IngestionPipeline`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunking: ChunkOptions,
    pub batch_size: usize,
    pub concurrency: usize,
    pub use_cache: bool,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkOptions::default(),
            batch_size: crate::config::EMBEDDING_BATCH_SIZE,
            concurrency: crate::config::EMBEDDING_INDEX_CONCURRENCY,
            use_cache: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a single document failed.
#[derive(Debug, thiserror::Error)]
enum DocumentFailure {
    #[error(transparent)]
    Chunking(#[from] crate::error::ChunkingError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("ingestion cancelled")]
    Cancelled,
}

impl DocumentFailure {
    fn retryable(&self) -> bool {
        match self {
            DocumentFailure::Chunking(_) => false,
            DocumentFailure::Embedding(e) => {
                e.is_retryable() || matches!(e, EmbeddingError::Cancelled)
            }
            DocumentFailure::Index(e) => e.is_unavailable(),
            DocumentFailure::Cancelled => true,
        }
    }
}

/// Chunks, embeds and indexes documents with bounded concurrency.
///
/// Each document is all-or-nothing: its chunks are written in one
/// transaction, and a failure in one document never affects the others.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn KnowledgeStore>,
    embedder: SharedEmbeddingProvider,
    options: IngestOptions,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: SharedEmbeddingProvider,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    /// Ingest a batch, reporting per-document failures instead of aborting.
    pub async fn ingest(&self, docs: Vec<IngestDocument>, cancel: &CancellationToken) -> IngestReport {
        let total = docs.len();
        if total == 0 {
            return IngestReport::default();
        }

        // A model/dimension conflict fails every document identically.
        if let Err(e) = self.register_model().await {
            warn!("ingestion rejected: {e}");
            let retryable = e.is_unavailable();
            return IngestReport {
                documents_processed: 0,
                chunks_created: 0,
                errors: docs
                    .iter()
                    .enumerate()
                    .map(|(index, d)| IngestFailure {
                        index,
                        source: d.source.clone(),
                        message: e.to_string(),
                        retryable,
                    })
                    .collect(),
            };
        }

        let concurrency = self.options.concurrency.max(1);
        let outcomes: Vec<(usize, String, Result<usize, DocumentFailure>)> =
            stream::iter(docs.into_iter().enumerate())
                .map(|(index, doc)| async move {
                    let source = doc.source.clone();
                    let result = if cancel.is_cancelled() {
                        Err(DocumentFailure::Cancelled)
                    } else {
                        self.ingest_one(doc, cancel).await
                    };
                    (index, source, result)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut report = IngestReport::default();
        for (index, source, result) in outcomes {
            match result {
                Ok(chunks) => {
                    report.documents_processed += 1;
                    report.chunks_created += chunks;
                }
                Err(e) => {
                    debug!(index, source = %source, "document failed: {e}");
                    report.errors.push(IngestFailure {
                        index,
                        source,
                        retryable: e.retryable(),
                        message: e.to_string(),
                    });
                }
            }
        }
        report.errors.sort_by_key(|e| e.index);

        info!(
            documents = total,
            processed = report.documents_processed,
            chunks = report.chunks_created,
            failed = report.errors.len(),
            "ingestion batch complete"
        );
        report
    }

    async fn register_model(&self) -> Result<(), IndexError> {
        let store = Arc::clone(&self.store);
        let model = self.embedder.model_name();
        let dims = self.embedder.dimensions();
        tokio::task::spawn_blocking(move || store.ensure_embedding_model(&model, dims))
            .await
            .map_err(|e| IndexError::Storage(format!("index task failed: {e}")))?
    }

    async fn ingest_one(
        &self,
        doc: IngestDocument,
        cancel: &CancellationToken,
    ) -> Result<usize, DocumentFailure> {
        let chunks = chunk_document(&doc, self.options.chunking, Utc::now())?;
        let vectors = self.embed_chunks(&chunks, cancel).await?;

        if cancel.is_cancelled() {
            return Err(DocumentFailure::Cancelled);
        }

        let source = chunks[0].source_document.clone();
        let indexed: Vec<_> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(c, v)| c.into_indexed(v))
            .collect();
        let count = indexed.len();

        // Once started, the write runs to completion even if the caller
        // cancels, so the source is never left half-replaced.
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.replace_source(&source, &indexed))
            .await
            .map_err(|e| IndexError::Storage(format!("index task failed: {e}")))??;
        Ok(count)
    }

    /// Embed chunk texts, serving unchanged content from the cache when
    /// enabled.
    async fn embed_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        cancel: &CancellationToken,
    ) -> Result<Vec<EmbeddingVector>, DocumentFailure> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        if !self.options.use_cache {
            return Ok(embed_batched(
                self.embedder.as_ref(),
                &texts,
                self.options.batch_size,
                &self.options.retry,
                cancel,
            )
            .await?);
        }

        let model = self.embedder.model_name();
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(&model, t)).collect();

        let store = Arc::clone(&self.store);
        let (lookup_model, lookup_hashes) = (model.clone(), hashes.clone());
        let cached: Vec<Option<EmbeddingVector>> = tokio::task::spawn_blocking(move || {
            lookup_hashes
                .iter()
                .map(|h| store.cached_embedding(h, &lookup_model))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| IndexError::Storage(format!("index task failed: {e}")))??;

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| cached[i].is_none()).collect();
        let missing_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
        let fresh = embed_batched(
            self.embedder.as_ref(),
            &missing_texts,
            self.options.batch_size,
            &self.options.retry,
            cancel,
        )
        .await?;
        debug!(
            cached = texts.len() - missing.len(),
            embedded = missing.len(),
            "embedding cache lookup"
        );

        let to_store: Vec<(String, EmbeddingVector)> = missing
            .iter()
            .zip(&fresh)
            .map(|(&i, v)| (hashes[i].clone(), v.clone()))
            .collect();
        if !to_store.is_empty() {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || {
                for (hash, v) in &to_store {
                    store.cache_embedding(hash, &model, v)?;
                }
                Ok::<_, IndexError>(())
            })
            .await
            .map_err(|e| IndexError::Storage(format!("index task failed: {e}")))??;
        }

        let mut fresh = fresh.into_iter();
        let mut out = Vec::with_capacity(texts.len());
        for slot in cached {
            match slot {
                Some(v) => out.push(v),
                None => match fresh.next() {
                    Some(v) => out.push(v),
                    None => {
                        return Err(EmbeddingError::ProviderRejected(
                            "provider returned too few embeddings".into(),
                        )
                        .into())
                    }
                },
            }
        }
        Ok(out)
    }
}

/// Cache key for a chunk's embedding under a given model.
fn content_hash(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::embeddings::{EmbeddingProvider, HashEmbeddingProvider};
    use crate::knowledge::index::{IndexQuery, SqliteKnowledgeIndex};
    use crate::knowledge::query::tests::UnreachableStore;
    use crate::knowledge::types::{Confidentiality, DocumentType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hashing embedder that counts texts and rejects any containing "poison".
    struct Counting {
        inner: HashEmbeddingProvider,
        texts: AtomicUsize,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                inner: HashEmbeddingProvider::new(32, 8191),
                texts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Counting {
        async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(EmbeddingError::ProviderRejected("HTTP 400".into()));
            }
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts).await
        }
        fn model_name(&self) -> String {
            self.inner.model_name()
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    fn doc(source: &str, content: &str) -> IngestDocument {
        IngestDocument {
            content: content.into(),
            source: source.into(),
            domain_tags: vec!["support".into()],
            document_type: DocumentType::Guide,
            confidentiality: Confidentiality::Public,
            title: None,
            tags: vec![],
            priority: None,
        }
    }

    fn pipeline(store: Arc<SqliteKnowledgeIndex>, embedder: Arc<Counting>, cache: bool) -> IngestionPipeline {
        IngestionPipeline::new(
            store,
            embedder,
            IngestOptions {
                chunking: ChunkOptions {
                    max_tokens: 4,
                    overlap: 0,
                },
                use_cache: cache,
                ..IngestOptions::default()
            },
        )
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let p = pipeline(store.clone(), Arc::new(Counting::new()), false);
        let report = p
            .ingest(
                vec![
                    doc("a.md", "alpha bravo charlie"),
                    doc("b.md", "   "),
                    doc("c.md", "poison pill"),
                    doc("d.md", "delta echo foxtrot golf hotel"),
                ],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.documents_processed, 2);
        assert_eq!(report.chunks_created, 3);
        let failed: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(failed, vec![1, 2]);
        assert!(report.errors.iter().all(|e| !e.retryable));

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_sources, 2);
        assert_eq!(stats.total_documents, 3);
    }

    #[tokio::test]
    async fn reingestion_replaces_previous_chunks() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let p = pipeline(store.clone(), Arc::new(Counting::new()), false);
        let cancel = CancellationToken::new();
        p.ingest(vec![doc("a.md", "one two three four five six seven eight nine")], &cancel)
            .await;
        assert_eq!(store.stats().unwrap().total_documents, 3);

        let report = p.ingest(vec![doc("a.md", "one two three")], &cancel).await;
        assert!(report.errors.is_empty());
        assert_eq!(store.stats().unwrap().total_documents, 1);
        let hits = store
            .query(&IndexQuery::new("nine", vec![Confidentiality::Public]))
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn cache_skips_unchanged_chunks() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let embedder = Arc::new(Counting::new());
        let p = pipeline(store.clone(), embedder.clone(), true);
        let cancel = CancellationToken::new();
        p.ingest(vec![doc("a.md", "one two three four five six")], &cancel).await;
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 2);

        p.ingest(vec![doc("a.md", "one two three four seven")], &cancel).await;
        // First chunk unchanged, second chunk new.
        assert_eq!(embedder.texts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_batch_is_retryable() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let p = pipeline(store.clone(), Arc::new(Counting::new()), false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = p.ingest(vec![doc("a.md", "alpha"), doc("b.md", "beta")], &cancel).await;
        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().all(|e| e.retryable));
        assert_eq!(store.stats().unwrap().total_documents, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_batch_into_file_index_loses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteKnowledgeIndex::open(&dir.path().join("kb.db"), 8, std::time::Duration::from_secs(5))
                .unwrap(),
        );
        let p = IngestionPipeline::new(
            store.clone(),
            Arc::new(HashEmbeddingProvider::new(32, 8191)),
            IngestOptions {
                concurrency: 8,
                ..IngestOptions::default()
            },
        );
        let docs: Vec<_> = (0..20)
            .map(|i| doc(&format!("guide-{i}.md"), &format!("setup step {i} for the billing portal")))
            .collect();

        let report = p.ingest(docs, &CancellationToken::new()).await;
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.documents_processed, 20);
        assert_eq!(store.stats().unwrap().total_sources, 20);
    }

    #[tokio::test]
    async fn unreachable_index_reports_retryable_failures() {
        let p = IngestionPipeline::new(
            Arc::new(UnreachableStore),
            Arc::new(Counting::new()),
            IngestOptions::default(),
        );
        let report = p
            .ingest(vec![doc("a.md", "alpha"), doc("b.md", "beta")], &CancellationToken::new())
            .await;
        assert_eq!(report.documents_processed, 0);
        assert_eq!(report.errors.len(), 2);
        for failure in &report.errors {
            assert!(failure.retryable);
            assert_eq!(failure.message, "knowledge index unavailable: database busy");
        }
    }

    #[tokio::test]
    async fn model_conflict_fails_whole_batch() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        let p = pipeline(store.clone(), Arc::new(Counting::new()), false);
        let cancel = CancellationToken::new();
        p.ingest(vec![doc("a.md", "alpha")], &cancel).await;

        let other = IngestionPipeline::new(
            store.clone(),
            Arc::new(HashEmbeddingProvider::new(16, 8191)),
            IngestOptions::default(),
        );
        let report = other.ingest(vec![doc("b.md", "beta")], &cancel).await;
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].message.contains("re-index"));
        assert!(!report.errors[0].retryable);
    }
}
