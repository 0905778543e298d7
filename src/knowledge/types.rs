use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Who may retrieve a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    Public,
    Internal,
}

impl Confidentiality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidentiality::Public => "public",
            Confidentiality::Internal => "internal",
        }
    }
}

impl std::str::FromStr for Confidentiality {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "internal" => Ok(Self::Internal),
            other => Err(format!("invalid confidentiality: {other}")),
        }
    }
}

/// Kind of source document a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    Guide,
    Sop,
    SalesScript,
    Technical,
    Faq,
    Policy,
    #[default]
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Guide => "guide",
            DocumentType::Sop => "sop",
            DocumentType::SalesScript => "sales-script",
            DocumentType::Technical => "technical",
            DocumentType::Faq => "faq",
            DocumentType::Policy => "policy",
            DocumentType::Other => "other",
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "guide" => Ok(Self::Guide),
            "sop" => Ok(Self::Sop),
            "sales-script" => Ok(Self::SalesScript),
            "technical" => Ok(Self::Technical),
            "faq" => Ok(Self::Faq),
            "policy" => Ok(Self::Policy),
            "other" => Ok(Self::Other),
            other => Err(format!("invalid document type: {other}")),
        }
    }
}

/// The confidentiality levels a caller is cleared to read.
///
/// Every index query carries one of these; there is no unscoped query path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// Customer-facing callers: public documents only.
    PublicOnly,
    /// Internal operators: public and internal documents.
    IncludeInternal,
}

impl AccessScope {
    pub fn allowed(&self) -> &'static [Confidentiality] {
        match self {
            AccessScope::PublicOnly => &[Confidentiality::Public],
            AccessScope::IncludeInternal => &[Confidentiality::Public, Confidentiality::Internal],
        }
    }

    /// Intersect a caller-requested filter with what this scope permits.
    ///
    /// An empty request means "everything I am allowed to see".
    pub fn restrict(&self, requested: &[Confidentiality]) -> Vec<Confidentiality> {
        let allowed = self.allowed();
        if requested.is_empty() {
            return allowed.to_vec();
        }
        let mut out: Vec<Confidentiality> = requested
            .iter()
            .copied()
            .filter(|c| allowed.contains(c))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Fixed-length embedding. The dimension is constant for the life of an index.
pub type EmbeddingVector = Vec<f32>;

/// A document submitted for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocument {
    pub content: String,
    /// Filename, URL or other identifier of the source document.
    #[serde(alias = "sourceDocument")]
    pub source: String,
    #[serde(default)]
    pub domain_tags: Vec<String>,
    #[serde(default)]
    pub document_type: DocumentType,
    /// Unlabelled documents are treated as internal.
    #[serde(default = "default_confidentiality")]
    pub confidentiality: Confidentiality,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "freeformTags")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_confidentiality() -> Confidentiality {
    Confidentiality::Internal
}

/// A unit of ingested content, produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeChunk {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_document: String,
    pub domain_tags: Vec<String>,
    pub freeform_tags: Vec<String>,
    pub document_type: DocumentType,
    pub confidentiality: Confidentiality,
    pub priority: i32,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub ingested_at: DateTime<Utc>,
}

impl KnowledgeChunk {
    /// Attach an embedding, producing the persisted form.
    pub fn into_indexed(self, embedding: EmbeddingVector) -> IndexedDocument {
        IndexedDocument {
            id: self.id,
            title: self.title,
            content: self.content,
            source_document: self.source_document,
            document_type: self.document_type,
            domain_tags: self.domain_tags,
            freeform_tags: self.freeform_tags,
            priority: self.priority,
            confidentiality: self.confidentiality,
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            ingested_at: self.ingested_at,
            embedding,
        }
    }
}

/// The persisted unit in the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub source_document: String,
    pub document_type: DocumentType,
    pub domain_tags: Vec<String>,
    pub freeform_tags: Vec<String>,
    pub priority: i32,
    pub confidentiality: Confidentiality,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub ingested_at: DateTime<Utc>,
    /// Never sent to API callers.
    #[serde(default, skip_serializing)]
    pub embedding: EmbeddingVector,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// A search request. Filters AND across categories and OR within one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub query_text: String,
    #[serde(default)]
    pub domain_filter: Vec<String>,
    #[serde(default)]
    pub tag_filter: Vec<String>,
    #[serde(default)]
    pub confidentiality_filter: Vec<Confidentiality>,
    /// `None` uses the configured default. Must be positive when present.
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default = "default_true")]
    pub use_semantic_ranking: bool,
}

fn default_true() -> bool {
    true
}

impl SearchQuery {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            domain_filter: Vec::new(),
            tag_filter: Vec::new(),
            confidentiality_filter: Vec::new(),
            top_k: None,
            use_semantic_ranking: true,
        }
    }

    pub fn with_top_k(mut self, top_k: i64) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain_filter = domains.into_iter().map(Into::into).collect();
        self
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub document: IndexedDocument,
    pub score: f64,
    pub highlights: Vec<String>,
}

// ---------------------------------------------------------------------------
// Ingestion report
// ---------------------------------------------------------------------------

/// One failed document in an ingestion batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFailure {
    /// Position of the document in the submitted batch.
    pub index: usize,
    pub source: String,
    pub message: String,
    /// Whether resubmitting this document unchanged may succeed.
    pub retryable: bool,
}

/// Outcome of an ingestion batch. Failures are data, not errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub documents_processed: usize,
    pub chunks_created: usize,
    pub errors: Vec<IngestFailure>,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_documents: u64,
    pub total_sources: u64,
    pub by_domain: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_confidentiality: BTreeMap<String, u64>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_scope_never_admits_internal() {
        let scope = AccessScope::PublicOnly;
        assert_eq!(scope.restrict(&[]), vec![Confidentiality::Public]);
        assert_eq!(
            scope.restrict(&[Confidentiality::Internal]),
            Vec::<Confidentiality>::new()
        );
        assert_eq!(
            scope.restrict(&[Confidentiality::Internal, Confidentiality::Public]),
            vec![Confidentiality::Public]
        );
    }

    #[test]
    fn internal_scope_honours_requested_filter() {
        let scope = AccessScope::IncludeInternal;
        assert_eq!(scope.restrict(&[]).len(), 2);
        assert_eq!(
            scope.restrict(&[Confidentiality::Internal]),
            vec![Confidentiality::Internal]
        );
    }

    #[test]
    fn ingest_document_defaults() {
        let doc: IngestDocument = serde_json::from_str(
            r#"{"content":"x","source":"a.md","domainTags":["support"]}"#,
        )
        .unwrap();
        assert_eq!(doc.confidentiality, Confidentiality::Internal);
        assert_eq!(doc.document_type, DocumentType::Other);
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn document_type_wire_names() {
        let t: DocumentType = serde_json::from_str("\"sales-script\"").unwrap();
        assert_eq!(t, DocumentType::SalesScript);
        assert_eq!("sales_script".parse::<DocumentType>().unwrap(), t);
        assert_eq!(t.as_str(), "sales-script");
    }

    #[test]
    fn embedding_is_not_serialized() {
        let doc = IndexedDocument {
            id: "1".into(),
            title: "t".into(),
            content: "c".into(),
            source_document: "s".into(),
            document_type: DocumentType::Guide,
            domain_tags: vec!["support".into()],
            freeform_tags: vec![],
            priority: 0,
            confidentiality: Confidentiality::Public,
            chunk_index: 0,
            total_chunks: 1,
            ingested_at: Utc::now(),
            embedding: vec![0.5; 4],
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["sourceDocument"], "s");
    }
}
