use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind, RetryConfig, DEFAULT_OPENAI_BASE_URL};
use crate::error::EmbeddingError;

use super::types::EmbeddingVector;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A provider that turns text into dense vector embeddings.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute embeddings for a batch of texts.
    ///
    /// Returns one vector per input text, each of length [`Self::dimensions`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError>;

    /// The model identifier used by this provider (e.g. `text-embedding-3-small`).
    fn model_name(&self) -> String;

    /// Dimensionality of the vectors produced by [`Self::embed`].
    fn dimensions(&self) -> usize;

    /// Connectivity probe used by the health endpoint.
    async fn ping(&self) -> Result<(), EmbeddingError> {
        self.embed(&["ping".to_string()]).await.map(|_| ())
    }
}

pub type SharedEmbeddingProvider = Arc<dyn EmbeddingProvider>;

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create an embedding provider from configuration.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<SharedEmbeddingProvider> {
    match config.provider {
        EmbeddingProviderKind::Openai => Ok(Arc::new(OpenAiEmbeddingProvider::new(config)?)),
        EmbeddingProviderKind::Local => Ok(Arc::new(HashEmbeddingProvider::new(
            config.resolved_dimensions(),
            config.max_input_tokens,
        ))),
    }
}

/// Rough token estimate: the larger of the word count and chars / 4.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let chars = text.chars().count();
    words.max(chars.div_ceil(4))
}

/// Reject any input whose estimated size exceeds the provider limit.
///
/// Inputs are never truncated; the caller must split them.
pub fn check_input_limits(texts: &[String], limit: usize) -> Result<(), EmbeddingError> {
    for text in texts {
        let estimated_tokens = estimate_tokens(text);
        if estimated_tokens > limit {
            return Err(EmbeddingError::InputTooLarge {
                estimated_tokens,
                limit,
            });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// Calls an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddingProvider {
    api_key: Option<String>,
    base_url: String,
    model: String,
    dimensions: usize,
    /// Sent to the API only when explicitly configured.
    requested_dimensions: Option<usize>,
    max_input_tokens: usize,
    client: reqwest::Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dimensions: config.resolved_dimensions(),
            requested_dimensions: config.dimensions,
            max_input_tokens: config.max_input_tokens,
            client,
        })
    }
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> EmbeddingError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        EmbeddingError::RateLimited { retry_after }
    } else if status.is_server_error() {
        EmbeddingError::ProviderUnavailable(format!("HTTP {}", status.as_u16()))
    } else {
        EmbeddingError::ProviderRejected(format!("HTTP {}", status.as_u16()))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_input_limits(texts, self.max_input_tokens)?;

        let body = OpenAiEmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.requested_dimensions,
        };

        let mut req = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            debug!("embedding request error: {e}");
            if e.is_timeout() {
                EmbeddingError::ProviderUnavailable("request timed out".into())
            } else {
                EmbeddingError::ProviderUnavailable("connection failed".into())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), body = %text, "embedding provider error response");
            return Err(classify_status(status, retry_after));
        }

        let parsed: OpenAiEmbeddingResponse = resp.json().await.map_err(|e| {
            debug!("embedding response parse error: {e}");
            EmbeddingError::ProviderRejected("malformed response".into())
        })?;

        let mut data = parsed.data;
        if data.len() != texts.len() {
            return Err(EmbeddingError::ProviderRejected(format!(
                "returned {} embeddings for {} inputs",
                data.len(),
                texts.len()
            )));
        }
        data.sort_by_key(|d| d.index.unwrap_or(0));

        let mut out = Vec::with_capacity(data.len());
        for d in data {
            if d.embedding.len() != self.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: d.embedding.len(),
                });
            }
            out.push(d.embedding);
        }
        Ok(out)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ---------------------------------------------------------------------------
// Local
// ---------------------------------------------------------------------------

/// Deterministic on-device embedder based on signed feature hashing.
///
/// Each lowercase alphanumeric token (and a crude singular form of it) is
/// hashed into a bucket; the vector is L2-normalised. Texts sharing words get
/// positive cosine similarity, which is enough for offline use and tests.
pub struct HashEmbeddingProvider {
    dimensions: usize,
    max_input_tokens: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize, max_input_tokens: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_input_tokens,
        }
    }

    pub fn embed_one(&self, text: &str) -> EmbeddingVector {
        let mut v = vec![0f32; self.dimensions];
        for token in tokenize(text) {
            let stem = token.strip_suffix('s').filter(|s| s.len() >= 3);
            for t in std::iter::once(token.as_str()).chain(stem) {
                let h = fnv1a(t.as_bytes());
                let bucket = (h % self.dimensions as u64) as usize;
                let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
                v[bucket] += sign;
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        v
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        check_input_limits(texts, self.max_input_tokens)?;
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> String {
        "local-hash-v1".to_string()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn ping(&self) -> Result<(), EmbeddingError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Exponential backoff schedule for transient provider failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        (&RetryConfig::default()).into()
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_attempts: c.max_attempts.max(1),
            initial_delay: Duration::from_millis(c.initial_delay_ms),
            max_delay: Duration::from_millis(c.max_delay_ms),
            factor: c.factor.max(1.0),
        }
    }
}

/// Embed `texts`, retrying transient failures with exponential backoff.
///
/// Non-retryable errors return immediately. Cancellation abandons the
/// in-flight request.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
            r = provider.embed(texts) => r,
        };

        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let mut delay = policy.delay_for(attempt);
                if let EmbeddingError::RateLimited {
                    retry_after: Some(hint),
                } = &e
                {
                    delay = delay.max(*hint).min(policy.max_delay.max(*hint));
                }
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "embedding failed, retrying: {e}"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Embed in provider-sized batches, each with its own retry budget.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        out.extend(embed_with_retry(provider, batch, policy, cancel).await?);
    }
    Ok(out)
}

/// Cosine similarity between two vectors; 0.0 for mismatched or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0f64;
    let mut na = 0f64;
    let mut nb = 0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
