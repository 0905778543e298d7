use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::error::{IndexError, QueryError};

use super::embeddings::{embed_with_retry, RetryPolicy, SharedEmbeddingProvider};
use super::hybrid::FusionParams;
use super::index::{query_terms, IndexQuery, KnowledgeStore, ScoredDocument};
use super::types::{AccessScope, SearchQuery, SearchResult};

/// Longest highlight snippet, in characters.
const MAX_HIGHLIGHT_CHARS: usize = 240;

/// Outcome of a search request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    pub execution_time_ms: u64,
    /// Set when ranking fell back to keywords only or the index was
    /// unreachable.
    pub degraded: bool,
}

impl SearchOutcome {
    fn empty(started: Instant, degraded: bool) -> Self {
        Self {
            results: Vec::new(),
            total_count: 0,
            execution_time_ms: started.elapsed().as_millis() as u64,
            degraded,
        }
    }
}

/// Validates search requests, scopes them to the caller and runs them
/// against the index.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn KnowledgeStore>,
    embedder: SharedEmbeddingProvider,
    config: SearchConfig,
    retry: RetryPolicy,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        embedder: SharedEmbeddingProvider,
        config: SearchConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            retry,
        }
    }

    /// Run `query` on behalf of a caller whose clearance is `scope`.
    ///
    /// The caller's `confidentialityFilter` can narrow the scope but never
    /// widen it. An unreachable index yields an empty, degraded outcome
    /// rather than an error.
    pub async fn search(
        &self,
        query: &SearchQuery,
        scope: AccessScope,
        cancel: &CancellationToken,
    ) -> Result<SearchOutcome, QueryError> {
        let started = Instant::now();

        let text = query.query_text.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidQuery("queryText must not be empty".into()));
        }
        let top_k = match query.top_k {
            None => self.config.default_top_k as usize,
            Some(k) if k <= 0 => {
                return Err(QueryError::InvalidQuery("topK must be positive".into()));
            }
            Some(k) => (k as usize).min(self.config.max_top_k as usize),
        };

        let allowed = scope.restrict(&query.confidentiality_filter);
        if allowed.is_empty() {
            debug!("requested confidentiality is outside the caller's scope");
            return Ok(SearchOutcome::empty(started, false));
        }

        let mut degraded = false;
        let mut index_query = IndexQuery::new(text, allowed)
            .with_domains(&query.domain_filter)
            .with_tags(&query.tag_filter)
            .with_limit(top_k);
        index_query.min_score = self.config.min_score;
        index_query.fusion = FusionParams {
            strategy: self.config.fusion,
            vector_weight: self.config.vector_weight,
            keyword_weight: self.config.keyword_weight,
        };

        if query.use_semantic_ranking {
            match embed_with_retry(
                self.embedder.as_ref(),
                &[text.to_string()],
                &self.retry,
                cancel,
            )
            .await
            {
                Ok(mut vectors) if !vectors.is_empty() => {
                    index_query = index_query.with_embedding(vectors.swap_remove(0));
                }
                Ok(_) => degraded = true,
                Err(crate::error::EmbeddingError::Cancelled) => return Err(QueryError::Cancelled),
                Err(e) => {
                    warn!("query embedding failed, falling back to keyword ranking: {e}");
                    degraded = true;
                }
            }
        }

        let scored = match self.run_index(index_query.clone(), cancel).await {
            Ok(scored) => scored,
            Err(QueryError::Index(e)) if e.is_unavailable() => {
                warn!("knowledge index unavailable, returning no results: {e}");
                return Ok(SearchOutcome::empty(started, true));
            }
            Err(QueryError::Index(e @ IndexError::DimensionMismatch { .. }))
                if index_query.embedding().is_some() =>
            {
                warn!("query vector does not fit the index, ranking by keywords only: {e}");
                degraded = true;
                match self.run_index(index_query.without_embedding(), cancel).await {
                    Ok(scored) => scored,
                    Err(QueryError::Index(e)) if e.is_unavailable() => {
                        return Ok(SearchOutcome::empty(started, true));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        };

        let terms = query_terms(text);
        let results: Vec<SearchResult> = scored
            .into_iter()
            .map(|ScoredDocument { document, score }| {
                let highlights = highlight(&document.content, &terms, self.config.highlight_count);
                SearchResult {
                    document,
                    score,
                    highlights,
                }
            })
            .collect();

        let outcome = SearchOutcome {
            total_count: results.len(),
            results,
            execution_time_ms: started.elapsed().as_millis() as u64,
            degraded,
        };
        debug!(
            results = outcome.total_count,
            ms = outcome.execution_time_ms,
            degraded = outcome.degraded,
            "search complete"
        );
        Ok(outcome)
    }

    async fn run_index(
        &self,
        index_query: IndexQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredDocument>, QueryError> {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || store.query(&index_query));
        tokio::select! {
            _ = cancel.cancelled() => Err(QueryError::Cancelled),
            r = task => match r {
                Ok(result) => result.map_err(QueryError::from),
                Err(join) => Err(IndexError::Storage(format!("search task failed: {join}")).into()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Highlights
// ---------------------------------------------------------------------------

/// Sentences of `content` containing query terms, with matches wrapped in
/// `<em>` tags. Sentences with more distinct matches come first.
pub fn highlight(content: &str, terms: &[String], max: usize) -> Vec<String> {
    if terms.is_empty() || max == 0 {
        return Vec::new();
    }
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let Ok(re) = Regex::new(&format!(r"(?i)\b(?:{alternation})\w*")) else {
        return Vec::new();
    };

    let mut scored: Vec<(usize, usize, String)> = Vec::new();
    for (pos, sentence) in split_sentences(content).into_iter().enumerate() {
        let mut distinct: Vec<String> = re
            .find_iter(sentence)
            .map(|m| m.as_str().to_lowercase())
            .collect();
        if distinct.is_empty() {
            continue;
        }
        distinct.sort();
        distinct.dedup();

        let snippet = truncate_chars(sentence, MAX_HIGHLIGHT_CHARS);
        let marked = re.replace_all(&snippet, "<em>$0</em>").into_owned();
        scored.push((distinct.len(), pos, marked));
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(max).map(|(_, _, s)| s).collect()
}

fn split_sentences(content: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in content.char_indices() {
        if matches!(c, '.' | '!' | '?' | '\n') {
            let end = i + c.len_utf8();
            let s = content[start..end].trim();
            if !s.is_empty() {
                out.push(s);
            }
            start = end;
        }
    }
    let tail = content[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::EmbeddingError;
    use crate::knowledge::chunking::{chunk_document, ChunkOptions};
    use crate::knowledge::embeddings::{EmbeddingProvider, HashEmbeddingProvider};
    use crate::knowledge::index::SqliteKnowledgeIndex;
    use crate::knowledge::types::{
        Confidentiality, DocumentType, EmbeddingVector, IndexStats, IndexedDocument, IngestDocument,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct Down;

    #[async_trait]
    impl EmbeddingProvider for Down {
        async fn embed(&self, _: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
            Err(EmbeddingError::ProviderRejected("HTTP 401".into()))
        }
        fn model_name(&self) -> String {
            "down".into()
        }
        fn dimensions(&self) -> usize {
            64
        }
    }

    /// Store whose every call fails as if the database were locked.
    pub(crate) struct UnreachableStore;

    impl UnreachableStore {
        fn fail<T>() -> Result<T, IndexError> {
            Err(IndexError::Unavailable("database busy".into()))
        }
    }

    impl KnowledgeStore for UnreachableStore {
        fn ensure_embedding_model(&self, _: &str, _: usize) -> Result<(), IndexError> {
            Self::fail()
        }
        fn upsert(&self, _: &IndexedDocument) -> Result<(), IndexError> {
            Self::fail()
        }
        fn replace_source(&self, _: &str, _: &[IndexedDocument]) -> Result<(), IndexError> {
            Self::fail()
        }
        fn get(&self, _: &str) -> Result<Option<IndexedDocument>, IndexError> {
            Self::fail()
        }
        fn query(&self, _: &IndexQuery) -> Result<Vec<ScoredDocument>, IndexError> {
            Self::fail()
        }
        fn delete(&self, _: &str) -> Result<bool, IndexError> {
            Self::fail()
        }
        fn purge_source(&self, _: &str) -> Result<usize, IndexError> {
            Self::fail()
        }
        fn stats(&self) -> Result<IndexStats, IndexError> {
            Self::fail()
        }
        fn ping(&self) -> Result<(), IndexError> {
            Self::fail()
        }
        fn cached_embedding(&self, _: &str, _: &str) -> Result<Option<EmbeddingVector>, IndexError> {
            Self::fail()
        }
        fn cache_embedding(&self, _: &str, _: &str, _: &[f32]) -> Result<(), IndexError> {
            Self::fail()
        }
    }

    fn seeded_engine(embedder: SharedEmbeddingProvider) -> QueryEngine {
        let store = SqliteKnowledgeIndex::in_memory().unwrap();
        let hasher = HashEmbeddingProvider::new(64, 8191);
        for (source, content, conf) in [
            ("refunds.md", "Refunds are processed within 5 business days.", Confidentiality::Public),
            ("escalation.md", "Escalate refund disputes to the finance lead.", Confidentiality::Internal),
        ] {
            let doc = IngestDocument {
                content: content.into(),
                source: source.into(),
                domain_tags: vec!["support".into()],
                document_type: DocumentType::Policy,
                confidentiality: conf,
                title: None,
                tags: vec![],
                priority: None,
            };
            let chunks = chunk_document(&doc, ChunkOptions::default(), Utc::now()).unwrap();
            let indexed: Vec<_> = chunks
                .into_iter()
                .map(|c| {
                    let v = hasher.embed_one(&c.content);
                    c.into_indexed(v)
                })
                .collect();
            store.replace_source(source, &indexed).unwrap();
        }
        QueryEngine::new(
            Arc::new(store),
            embedder,
            SearchConfig::default(),
            RetryPolicy::default(),
        )
    }

    fn hashing() -> SharedEmbeddingProvider {
        Arc::new(HashEmbeddingProvider::new(64, 8191))
    }

    #[tokio::test]
    async fn rejects_invalid_queries() {
        let engine = seeded_engine(hashing());
        let cancel = CancellationToken::new();
        let err = engine
            .search(&SearchQuery::new("refund").with_top_k(0), AccessScope::PublicOnly, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
        let err = engine
            .search(&SearchQuery::new("  "), AccessScope::PublicOnly, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn scope_limits_results() {
        let engine = seeded_engine(hashing());
        let cancel = CancellationToken::new();
        let public = engine
            .search(&SearchQuery::new("refund"), AccessScope::PublicOnly, &cancel)
            .await
            .unwrap();
        assert_eq!(public.total_count, 1);
        assert_eq!(public.results[0].document.source_document, "refunds.md");
        assert!(!public.degraded);

        let internal = engine
            .search(&SearchQuery::new("refund"), AccessScope::IncludeInternal, &cancel)
            .await
            .unwrap();
        assert_eq!(internal.total_count, 2);

        // Asking for internal documents from a public scope yields nothing.
        let mut q = SearchQuery::new("refund");
        q.confidentiality_filter = vec![Confidentiality::Internal];
        let none = engine.search(&q, AccessScope::PublicOnly, &cancel).await.unwrap();
        assert!(none.results.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_keywords() {
        let engine = seeded_engine(Arc::new(Down));
        let outcome = engine
            .search(
                &SearchQuery::new("refunds processed"),
                AccessScope::PublicOnly,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.total_count, 1);
    }

    #[tokio::test]
    async fn unreachable_index_degrades_to_empty() {
        let engine = QueryEngine::new(
            Arc::new(UnreachableStore),
            hashing(),
            SearchConfig::default(),
            RetryPolicy::default(),
        );
        let outcome = engine
            .search(&SearchQuery::new("refund"), AccessScope::PublicOnly, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total_count, 0);
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn foreign_query_dimensions_fall_back_to_keywords() {
        let engine = seeded_engine(Arc::new(HashEmbeddingProvider::new(128, 8191)));
        let outcome = engine
            .search(
                &SearchQuery::new("refunds processed"),
                AccessScope::PublicOnly,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.total_count, 1);
        assert_eq!(outcome.results[0].document.source_document, "refunds.md");
    }

    #[tokio::test]
    async fn purged_index_searches_cleanly_after_model_change() {
        let store = Arc::new(SqliteKnowledgeIndex::in_memory().unwrap());
        store.ensure_embedding_model("local-hash-v1", 64).unwrap();
        let hasher = HashEmbeddingProvider::new(64, 8191);
        let doc = IngestDocument {
            content: "Refunds are processed within 5 business days.".into(),
            source: "refunds.md".into(),
            domain_tags: vec!["support".into()],
            document_type: DocumentType::Policy,
            confidentiality: Confidentiality::Public,
            title: None,
            tags: vec![],
            priority: None,
        };
        let indexed: Vec<_> = chunk_document(&doc, ChunkOptions::default(), Utc::now())
            .unwrap()
            .into_iter()
            .map(|c| {
                let v = hasher.embed_one(&c.content);
                c.into_indexed(v)
            })
            .collect();
        store.replace_source("refunds.md", &indexed).unwrap();
        assert_eq!(store.purge_source("refunds.md").unwrap(), 1);

        let engine = QueryEngine::new(
            store,
            Arc::new(HashEmbeddingProvider::new(128, 8191)),
            SearchConfig::default(),
            RetryPolicy::default(),
        );
        let outcome = engine
            .search(&SearchQuery::new("refund"), AccessScope::PublicOnly, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn results_carry_highlights() {
        let engine = seeded_engine(hashing());
        let outcome = engine
            .search(
                &SearchQuery::new("how long do refunds take"),
                AccessScope::PublicOnly,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.results[0].highlights.len(), 1);
        assert!(outcome.results[0].highlights[0].contains("<em>Refunds</em>"));
    }

    #[test]
    fn highlight_ranks_sentences_by_matches() {
        let content = "Nothing here. Refund window is short! The refund takes five days per refund policy.";
        let terms = vec!["refund".to_string(), "days".to_string()];
        let h = highlight(content, &terms, 2);
        assert_eq!(h.len(), 2);
        assert!(h[0].starts_with("The <em>refund</em> takes five <em>days</em>"));
        assert_eq!(h[1], "<em>Refund</em> window is short!");
    }

    #[test]
    fn highlight_without_terms_is_empty() {
        assert!(highlight("Some text.", &[], 3).is_empty());
        assert!(highlight("Some text.", &["absent".to_string()], 3).is_empty());
    }
}
