use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, error, info};

use crate::error::IndexError;

use super::embeddings::cosine_similarity;
use super::hybrid::{self, FusionParams};
use super::schema::{self, bytes_to_floats, floats_to_bytes};
use super::types::{Confidentiality, DocumentType, EmbeddingVector, IndexStats, IndexedDocument};

/// Lower bound on the vector candidate list, regardless of `limit`.
const MIN_VECTOR_CANDIDATES: usize = 32;

/// Lower bound on the keyword candidate list, regardless of `limit`.
const MIN_KEYWORD_CANDIDATES: usize = 200;

/// Title matches weigh double in BM25.
const BM25_TITLE_WEIGHT: f64 = 2.0;
const BM25_CONTENT_WEIGHT: f64 = 1.0;

const DOC_COLUMNS: &str = "id, title, content, source_document, document_type, domain_tags, \
     freeform_tags, priority, confidentiality, chunk_index, total_chunks, ingested_at, embedding";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "the", "to", "was", "what", "when",
    "where", "which", "who", "why", "with", "you", "your",
];

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A fully resolved index query.
///
/// The allowed confidentiality set is fixed at construction and cannot be
/// cleared afterwards, so every query reaching the store is scoped.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    text: String,
    confidentiality: Vec<Confidentiality>,
    embedding: Option<EmbeddingVector>,
    pub domain_filter: Vec<String>,
    pub tag_filter: Vec<String>,
    pub limit: usize,
    pub min_score: f64,
    pub fusion: FusionParams,
}

impl IndexQuery {
    pub fn new(text: impl Into<String>, confidentiality: Vec<Confidentiality>) -> Self {
        Self {
            text: text.into(),
            confidentiality,
            embedding: None,
            domain_filter: Vec::new(),
            tag_filter: Vec::new(),
            limit: crate::config::DEFAULT_TOP_K as usize,
            min_score: 0.0,
            fusion: FusionParams::default(),
        }
    }

    /// Rank semantically against this query vector. Without one, ranking
    /// is keyword-only.
    pub fn with_embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// The same query ranked by keywords only.
    pub fn without_embedding(mut self) -> Self {
        self.embedding = None;
        self
    }

    pub fn with_domains(mut self, domains: &[String]) -> Self {
        self.domain_filter = super::chunking::normalize_labels(domains);
        self
    }

    pub fn with_tags(mut self, tags: &[String]) -> Self {
        self.tag_filter = super::chunking::normalize_labels(tags);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn confidentiality(&self) -> &[Confidentiality] {
        &self.confidentiality
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

/// A document with its fused relevance score.
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: IndexedDocument,
    pub score: f64,
}

/// Significant lowercase terms of a free-text query.
///
/// Stopwords are dropped unless nothing else remains.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut all: Vec<String> = Vec::new();
    for t in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
    {
        if !all.contains(&t) {
            all.push(t);
        }
    }
    let significant: Vec<String> = all
        .iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .cloned()
        .collect();
    if significant.is_empty() {
        all
    } else {
        significant
    }
}

/// Build an FTS5 MATCH expression that ORs quoted terms, so user input can
/// never inject FTS syntax.
fn fts_match_expression(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistent store of indexed chunks.
///
/// Methods block; async callers run them on the blocking pool.
pub trait KnowledgeStore: Send + Sync {
    /// Record the embedding model on first use and reject a different one
    /// while the index holds documents.
    fn ensure_embedding_model(&self, model: &str, dimensions: usize) -> Result<(), IndexError>;

    /// Insert or replace one document by `id`.
    fn upsert(&self, doc: &IndexedDocument) -> Result<(), IndexError>;

    /// Atomically write all chunks of `source` and delete any chunk of that
    /// source beyond the new chunk count.
    fn replace_source(&self, source: &str, docs: &[IndexedDocument]) -> Result<(), IndexError>;

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>, IndexError>;

    /// Hybrid search. Results are sorted by score, then most recent
    /// `ingested_at`, then `id`.
    fn query(&self, query: &IndexQuery) -> Result<Vec<ScoredDocument>, IndexError>;

    /// Returns whether a document was removed.
    fn delete(&self, id: &str) -> Result<bool, IndexError>;

    /// Returns the number of chunks removed.
    fn purge_source(&self, source: &str) -> Result<usize, IndexError>;

    fn stats(&self) -> Result<IndexStats, IndexError>;

    fn ping(&self) -> Result<(), IndexError>;

    fn cached_embedding(&self, hash: &str, model: &str)
        -> Result<Option<EmbeddingVector>, IndexError>;

    fn cache_embedding(
        &self,
        hash: &str,
        model: &str,
        embedding: &[f32],
    ) -> Result<(), IndexError>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed knowledge index with FTS5 keyword search and brute-force
/// cosine similarity over stored embeddings.
pub struct SqliteKnowledgeIndex {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteKnowledgeIndex {
    /// Open (or create) the index at `path` and apply migrations.
    pub fn open(path: &Path, pool_size: u32, connect_timeout: Duration) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    IndexError::Unavailable(format!(
                        "cannot create index directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(connect_timeout)
            .build(manager)?;

        schema::run_migrations(&*pool.get()?)?;
        info!(path = %path.display(), pool_size, "knowledge index opened");
        Ok(Self { pool })
    }

    /// A private in-memory index.
    ///
    /// Each SQLite memory connection is its own database, so the pool holds
    /// exactly one connection that never expires.
    pub fn in_memory() -> Result<Self, IndexError> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        schema::run_migrations(&*pool.get()?)?;
        Ok(Self { pool })
    }

    fn vector_candidates(
        conn: &Connection,
        query: &IndexQuery,
        embedding: &[f32],
        filter: &SqlFilter,
    ) -> Result<Vec<(i64, f64)>, IndexError> {
        let sql = format!(
            "SELECT d.seq, d.embedding FROM documents d WHERE {}",
            filter.clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.params.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (seq, blob) = row?;
            let sim = cosine_similarity(embedding, &bytes_to_floats(&blob));
            if sim > 0.0 {
                scored.push((seq, sim));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate((query.limit * 4).max(MIN_VECTOR_CANDIDATES));
        Ok(scored)
    }

    fn keyword_candidates(
        conn: &Connection,
        query: &IndexQuery,
        filter: &SqlFilter,
    ) -> Result<Vec<(i64, f64)>, IndexError> {
        let Some(expr) = fts_match_expression(&query.text) else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT d.seq, bm25(documents_fts, {BM25_TITLE_WEIGHT}, {BM25_CONTENT_WEIGHT}) AS rank
             FROM documents_fts
             JOIN documents d ON d.seq = documents_fts.rowid
             WHERE documents_fts MATCH ? AND {}
             ORDER BY rank
             LIMIT ?",
            filter.clause
        );

        let mut params: Vec<Value> = Vec::with_capacity(filter.params.len() + 2);
        params.push(Value::Text(expr));
        params.extend(filter.params.iter().cloned());
        params.push(Value::Integer(
            (query.limit * 4).max(MIN_KEYWORD_CANDIDATES) as i64,
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            // bm25() is negative; more negative is a better match.
            Ok((row.get::<_, i64>(0)?, -row.get::<_, f64>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_by_seq(
        conn: &Connection,
        seqs: &[i64],
    ) -> Result<HashMap<i64, IndexedDocument>, IndexError> {
        if seqs.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; seqs.len()].join(", ");
        let sql = format!("SELECT seq, {DOC_COLUMNS} FROM documents WHERE seq IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(seqs.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, read_raw(row, 1)?))
        })?;

        let mut out = HashMap::with_capacity(seqs.len());
        for row in rows {
            let (seq, raw) = row?;
            out.insert(seq, raw.into_document()?);
        }
        Ok(out)
    }
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(schema::CONNECTION_PRAGMAS)
}

/// Check a vector length against the dimension the index was built with,
/// recording it if the index has none yet.
fn check_dimensions(conn: &Connection, dims: usize) -> Result<(), IndexError> {
    match schema::get_meta(conn, "embedding_dimensions")? {
        Some(stored) => {
            let stored_dims: usize = stored.parse().unwrap_or(0);
            if stored_dims != dims {
                return Err(IndexError::DimensionMismatch {
                    stored_model: schema::get_meta(conn, "embedding_model")?.unwrap_or_default(),
                    stored_dims,
                    dims,
                });
            }
            Ok(())
        }
        None => schema::set_meta(conn, "embedding_dimensions", &dims.to_string()),
    }
}

fn upsert_row(conn: &Connection, doc: &IndexedDocument) -> Result<(), IndexError> {
    check_dimensions(conn, doc.embedding.len())?;
    let domain_tags = to_json(&doc.domain_tags)?;
    let freeform_tags = to_json(&doc.freeform_tags)?;
    conn.execute(
        "INSERT INTO documents (id, title, content, source_document, document_type, domain_tags,
            freeform_tags, priority, confidentiality, chunk_index, total_chunks, ingested_at, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            content = excluded.content,
            source_document = excluded.source_document,
            document_type = excluded.document_type,
            domain_tags = excluded.domain_tags,
            freeform_tags = excluded.freeform_tags,
            priority = excluded.priority,
            confidentiality = excluded.confidentiality,
            chunk_index = excluded.chunk_index,
            total_chunks = excluded.total_chunks,
            ingested_at = excluded.ingested_at,
            embedding = excluded.embedding",
        params![
            doc.id,
            doc.title,
            doc.content,
            doc.source_document,
            doc.document_type.as_str(),
            domain_tags,
            freeform_tags,
            doc.priority,
            doc.confidentiality.as_str(),
            doc.chunk_index,
            doc.total_chunks,
            doc.ingested_at.timestamp_millis(),
            floats_to_bytes(&doc.embedding),
        ],
    )?;
    Ok(())
}

fn to_json(labels: &[String]) -> Result<String, IndexError> {
    serde_json::to_string(labels).map_err(|e| IndexError::Storage(e.to_string()))
}

fn count_documents(conn: &Connection) -> Result<u64, IndexError> {
    let n: i64 = conn.query_row("SELECT count(*) FROM documents", [], |r| r.get(0))?;
    Ok(n as u64)
}

fn count_grouped(conn: &Connection, sql: &str) -> Result<BTreeMap<String, u64>, IndexError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = BTreeMap::new();
    for row in rows {
        let (key, n) = row?;
        out.insert(key, n as u64);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// SQL predicate over `documents d` plus its positional parameters.
struct SqlFilter {
    clause: String,
    params: Vec<Value>,
}

impl SqlFilter {
    fn from_query(query: &IndexQuery) -> Self {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        let placeholders = in_list(
            &mut params,
            query.confidentiality.iter().map(|c| c.as_str().to_string()),
        );
        clauses.push(format!("d.confidentiality IN ({placeholders})"));

        if !query.domain_filter.is_empty() {
            let placeholders = in_list(&mut params, query.domain_filter.iter().cloned());
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(d.domain_tags) WHERE json_each.value IN ({placeholders}))"
            ));
        }

        if !query.tag_filter.is_empty() {
            let placeholders = in_list(&mut params, query.tag_filter.iter().cloned());
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(d.freeform_tags) WHERE json_each.value IN ({placeholders}))"
            ));
        }

        Self {
            clause: clauses.join(" AND "),
            params,
        }
    }
}

fn in_list(params: &mut Vec<Value>, values: impl Iterator<Item = String>) -> String {
    let mut n = 0;
    for v in values {
        params.push(Value::Text(v));
        n += 1;
    }
    vec!["?"; n].join(", ")
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct RawDocument {
    id: String,
    title: String,
    content: String,
    source_document: String,
    document_type: String,
    domain_tags: String,
    freeform_tags: String,
    priority: i32,
    confidentiality: String,
    chunk_index: u32,
    total_chunks: u32,
    ingested_at: i64,
    embedding: Vec<u8>,
}

fn read_raw(row: &Row<'_>, offset: usize) -> rusqlite::Result<RawDocument> {
    Ok(RawDocument {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        content: row.get(offset + 2)?,
        source_document: row.get(offset + 3)?,
        document_type: row.get(offset + 4)?,
        domain_tags: row.get(offset + 5)?,
        freeform_tags: row.get(offset + 6)?,
        priority: row.get(offset + 7)?,
        confidentiality: row.get(offset + 8)?,
        chunk_index: row.get(offset + 9)?,
        total_chunks: row.get(offset + 10)?,
        ingested_at: row.get(offset + 11)?,
        embedding: row.get(offset + 12)?,
    })
}

impl RawDocument {
    fn into_document(self) -> Result<IndexedDocument, IndexError> {
        let storage = |e: String| IndexError::Storage(format!("document {}: {e}", self.id));
        let ingested_at = DateTime::<Utc>::from_timestamp_millis(self.ingested_at)
            .ok_or_else(|| storage(format!("bad timestamp {}", self.ingested_at)))?;
        Ok(IndexedDocument {
            document_type: self.document_type.parse::<DocumentType>().map_err(storage)?,
            confidentiality: self.confidentiality.parse::<Confidentiality>().map_err(storage)?,
            domain_tags: serde_json::from_str(&self.domain_tags)
                .map_err(|e| storage(e.to_string()))?,
            freeform_tags: serde_json::from_str(&self.freeform_tags)
                .map_err(|e| storage(e.to_string()))?,
            embedding: bytes_to_floats(&self.embedding),
            ingested_at,
            id: self.id,
            title: self.title,
            content: self.content,
            source_document: self.source_document,
            priority: self.priority,
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
        })
    }
}

// ---------------------------------------------------------------------------
// KnowledgeStore impl
// ---------------------------------------------------------------------------

impl KnowledgeStore for SqliteKnowledgeIndex {
    fn ensure_embedding_model(&self, model: &str, dimensions: usize) -> Result<(), IndexError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored_model = schema::get_meta(&tx, "embedding_model")?;
        let stored_dims = schema::get_meta(&tx, "embedding_dimensions")?
            .and_then(|d| d.parse::<usize>().ok());

        let same_dims = stored_dims.map_or(true, |d| d == dimensions);
        let same_model = stored_model.as_deref().map_or(true, |m| m == model);

        if !(same_dims && same_model) && count_documents(&tx)? > 0 {
            let stored_model = stored_model.unwrap_or_default();
            return Err(if same_dims {
                IndexError::ModelChanged {
                    stored_model,
                    model: model.to_string(),
                }
            } else {
                IndexError::DimensionMismatch {
                    stored_model,
                    stored_dims: stored_dims.unwrap_or(0),
                    dims: dimensions,
                }
            });
        }

        schema::set_meta(&tx, "embedding_model", model)?;
        schema::set_meta(&tx, "embedding_dimensions", &dimensions.to_string())?;
        tx.commit()?;
        Ok(())
    }

    fn upsert(&self, doc: &IndexedDocument) -> Result<(), IndexError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        upsert_row(&tx, doc)?;
        tx.commit()?;
        Ok(())
    }

    fn replace_source(&self, source: &str, docs: &[IndexedDocument]) -> Result<(), IndexError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        for doc in docs {
            if doc.source_document != source {
                return Err(IndexError::Storage(format!(
                    "document {} belongs to '{}', not '{source}'",
                    doc.id, doc.source_document
                )));
            }
            upsert_row(&tx, doc)?;
        }
        let pruned = tx.execute(
            "DELETE FROM documents WHERE source_document = ?1 AND chunk_index >= ?2",
            params![source, docs.len() as i64],
        )?;
        tx.commit()?;
        debug!(source, chunks = docs.len(), pruned, "source written");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<IndexedDocument>, IndexError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?1");
        let raw = conn
            .query_row(&sql, [id], |row| read_raw(row, 0))
            .optional()?;
        raw.map(RawDocument::into_document).transpose()
    }

    fn query(&self, query: &IndexQuery) -> Result<Vec<ScoredDocument>, IndexError> {
        if query.confidentiality.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.pool.get()?;
        let filter = SqlFilter::from_query(query);

        if count_documents(&conn)? == 0 {
            return Ok(Vec::new());
        }

        let keyword = Self::keyword_candidates(&conn, query, &filter)?;
        let fused = match query.embedding() {
            Some(embedding) => {
                if let Some(stored) = schema::get_meta(&conn, "embedding_dimensions")? {
                    let stored_dims: usize = stored.parse().unwrap_or(0);
                    if stored_dims != embedding.len() {
                        return Err(IndexError::DimensionMismatch {
                            stored_model: schema::get_meta(&conn, "embedding_model")?
                                .unwrap_or_default(),
                            stored_dims,
                            dims: embedding.len(),
                        });
                    }
                }
                let vector = Self::vector_candidates(&conn, query, embedding, &filter)?;
                hybrid::fuse(&keyword, &vector, &query.fusion)
            }
            None => hybrid::keyword_only(&keyword),
        };

        let survivors: Vec<(i64, f64)> = fused
            .into_iter()
            .filter(|(_, score)| *score > query.min_score)
            .collect();
        let seqs: Vec<i64> = survivors.iter().map(|(seq, _)| *seq).collect();
        let mut loaded = Self::load_by_seq(&conn, &seqs)?;

        let mut results = Vec::with_capacity(survivors.len());
        for (seq, score) in survivors {
            let Some(document) = loaded.remove(&seq) else {
                continue;
            };
            let in_scope = query.confidentiality.contains(&document.confidentiality);
            debug_assert!(
                in_scope,
                "document {} is {} but the query allows {:?}",
                document.id,
                document.confidentiality.as_str(),
                query.confidentiality
            );
            if !in_scope {
                error!(
                    id = %document.id,
                    confidentiality = document.confidentiality.as_str(),
                    "index returned a document outside the query's confidentiality scope; dropping it"
                );
                continue;
            }
            results.push(ScoredDocument { document, score });
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.document.ingested_at.cmp(&a.document.ingested_at))
                .then(a.document.id.cmp(&b.document.id))
        });
        results.truncate(query.limit);
        Ok(results)
    }

    fn delete(&self, id: &str) -> Result<bool, IndexError> {
        let conn = self.pool.get()?;
        let n = conn.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    fn purge_source(&self, source: &str) -> Result<usize, IndexError> {
        let conn = self.pool.get()?;
        let n = conn.execute("DELETE FROM documents WHERE source_document = ?1", [source])?;
        info!(source, removed = n, "source purged");
        Ok(n)
    }

    fn stats(&self) -> Result<IndexStats, IndexError> {
        let conn = self.pool.get()?;
        let total_sources: i64 = conn.query_row(
            "SELECT count(DISTINCT source_document) FROM documents",
            [],
            |r| r.get(0),
        )?;
        Ok(IndexStats {
            total_documents: count_documents(&conn)?,
            total_sources: total_sources as u64,
            by_domain: count_grouped(
                &conn,
                "SELECT j.value, count(*) FROM documents d, json_each(d.domain_tags) j GROUP BY j.value",
            )?,
            by_type: count_grouped(
                &conn,
                "SELECT document_type, count(*) FROM documents GROUP BY document_type",
            )?,
            by_confidentiality: count_grouped(
                &conn,
                "SELECT confidentiality, count(*) FROM documents GROUP BY confidentiality",
            )?,
            embedding_model: schema::get_meta(&conn, "embedding_model")?,
            embedding_dimensions: schema::get_meta(&conn, "embedding_dimensions")?
                .and_then(|d| d.parse().ok()),
        })
    }

    fn ping(&self) -> Result<(), IndexError> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }

    fn cached_embedding(
        &self,
        hash: &str,
        model: &str,
    ) -> Result<Option<EmbeddingVector>, IndexError> {
        let conn = self.pool.get()?;
        let blob = conn
            .query_row(
                "SELECT embedding FROM embedding_cache WHERE hash = ?1 AND model = ?2",
                [hash, model],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(blob.map(|b| bytes_to_floats(&b)))
    }

    fn cache_embedding(
        &self,
        hash: &str,
        model: &str,
        embedding: &[f32],
    ) -> Result<(), IndexError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO embedding_cache (hash, model, dimensions, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                hash,
                model,
                embedding.len() as i64,
                floats_to_bytes(embedding),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}
