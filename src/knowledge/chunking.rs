use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::ChunkingError;

use super::types::{IngestDocument, KnowledgeChunk};

/// Window parameters for [`chunk_document`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Approximate chunk size in whitespace-delimited tokens.
    pub max_tokens: u32,
    /// Tokens carried over from the end of one chunk into the next.
    pub overlap: u32,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: crate::config::DEFAULT_CHUNK_TOKENS,
            overlap: crate::config::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// A contiguous window of text, before metadata is attached.
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    /// Approximate token count (whitespace-split heuristic).
    pub token_count: u32,
}

/// Split `content` into windows of approximately `max_tokens` tokens with
/// `overlap` tokens shared between consecutive windows.
///
/// Tokenisation is a whitespace split. Whitespace-only input yields nothing.
pub fn chunk_text(content: &str, max_tokens: u32, overlap: u32) -> Vec<TextChunk> {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let max_tokens = max_tokens.max(1) as usize;
    let overlap = (overlap as usize).min(max_tokens.saturating_sub(1));
    let step = max_tokens - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + max_tokens).min(words.len());
        chunks.push(TextChunk {
            text: words[start..end].join(" "),
            token_count: (end - start) as u32,
        });
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Deterministic chunk identifier.
///
/// Derived from the source and position only, so re-ingesting a source
/// overwrites its previous chunks instead of duplicating them.
pub fn chunk_id(source: &str, chunk_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_index.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// Lowercase, trim and de-duplicate labels, keeping first-seen order.
pub fn normalize_labels(labels: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let l = label.trim().to_lowercase();
        if !l.is_empty() && !out.contains(&l) {
            out.push(l);
        }
    }
    out
}

/// Split one source document into [`KnowledgeChunk`]s.
///
/// Metadata is copied from the request as given; the chunker does no
/// classification of its own.
pub fn chunk_document(
    doc: &IngestDocument,
    opts: ChunkOptions,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<KnowledgeChunk>, ChunkingError> {
    let source = doc.source.trim();
    if source.is_empty() {
        return Err(ChunkingError::MissingSource);
    }

    let domain_tags = normalize_labels(&doc.domain_tags);
    if domain_tags.is_empty() {
        return Err(ChunkingError::MissingDomainTag);
    }

    let windows = chunk_text(&doc.content, opts.max_tokens, opts.overlap);
    if windows.is_empty() {
        return Err(ChunkingError::EmptyContent);
    }

    let freeform_tags = normalize_labels(&doc.tags);
    let base_title = doc
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(source);
    let total = windows.len() as u32;

    Ok(windows
        .into_iter()
        .enumerate()
        .map(|(i, w)| {
            let chunk_index = i as u32;
            let title = if total > 1 {
                format!("{base_title} ({}/{total})", chunk_index + 1)
            } else {
                base_title.to_string()
            };
            KnowledgeChunk {
                id: chunk_id(source, chunk_index),
                title,
                content: w.text,
                source_document: source.to_string(),
                domain_tags: domain_tags.clone(),
                freeform_tags: freeform_tags.clone(),
                document_type: doc.document_type,
                confidentiality: doc.confidentiality,
                priority: doc.priority.unwrap_or(0),
                chunk_index,
                total_chunks: total,
                ingested_at,
            }
        })
        .collect())
}
