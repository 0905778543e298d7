use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::defaults::*;

// ============================================================================
// Gateway Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayBindMode {
    #[default]
    Loopback,
    Lan,
    Custom,
}

impl std::str::FromStr for GatewayBindMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(Self::Loopback),
            "lan" => Ok(Self::Lan),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("invalid bind mode: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: GatewayBindMode,
    pub custom_bind_host: Option<String>,
    /// Origins allowed by CORS. `None` allows any origin.
    pub allowed_origins: Option<Vec<String>>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_GATEWAY_PORT,
            bind: GatewayBindMode::Loopback,
            custom_bind_host: None,
            allowed_origins: None,
        }
    }
}

// ============================================================================
// Embedding Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Any OpenAI-compatible `/embeddings` endpoint.
    #[default]
    Openai,
    /// Deterministic on-device feature hashing.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: EMBEDDING_RETRY_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_MS,
            factor: DEFAULT_RETRY_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Vector dimension. Defaults per provider when unset.
    pub dimensions: Option<usize>,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Cache vectors by content hash inside the index database.
    #[serde(default)]
    pub cache: bool,
}

impl EmbeddingConfig {
    pub fn resolved_dimensions(&self) -> usize {
        self.dimensions.unwrap_or(match self.provider {
            EmbeddingProviderKind::Openai => DEFAULT_EMBEDDING_DIMENSIONS,
            EmbeddingProviderKind::Local => DEFAULT_LOCAL_EMBEDDING_DIMENSIONS,
        })
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            base_url: None,
            api_key: None,
            dimensions: None,
            max_input_tokens: DEFAULT_EMBEDDING_MAX_INPUT_TOKENS,
            batch_size: EMBEDDING_BATCH_SIZE,
            timeout_ms: EMBEDDING_REQUEST_TIMEOUT_MS,
            retry: RetryConfig::default(),
            cache: false,
        }
    }
}

// ============================================================================
// Index / Ingestion / Search Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// SQLite file. Defaults to `<stateDir>/knowledge.db`.
    pub path: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: DEFAULT_INDEX_POOL_SIZE,
            connect_timeout_ms: DEFAULT_INDEX_CONNECT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: u32,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,
    /// Documents processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: DEFAULT_CHUNK_TOKENS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            concurrency: EMBEDDING_INDEX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    /// Weighted sum of cosine similarity and max-normalised BM25.
    #[default]
    Weighted,
    /// Reciprocal rank fusion.
    Rrf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: u32,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: u32,
    #[serde(default)]
    pub fusion: FusionStrategy,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    /// Results must score strictly above this.
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_highlight_count")]
    pub highlight_count: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            max_top_k: MAX_TOP_K,
            fusion: FusionStrategy::default(),
            vector_weight: 0.6,
            keyword_weight: 0.4,
            min_score: 0.0,
            highlight_count: DEFAULT_HIGHLIGHT_COUNT,
        }
    }
}

// ============================================================================
// Routing Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    pub model: String,
    #[serde(default = "default_backend_max_tokens")]
    pub max_tokens: u64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default = "default_internal_roles")]
    pub internal_roles: Vec<String>,
    #[serde(default = "default_companion_keywords")]
    pub companion_keywords: Vec<String>,
    #[serde(default = "default_escalation_keywords")]
    pub escalation_keywords: Vec<String>,
    #[serde(default = "default_fast_backend")]
    pub fast: BackendConfig,
    #[serde(default = "default_deep_backend")]
    pub deep: BackendConfig,
    #[serde(default = "default_grounding_top_k")]
    pub grounding_top_k: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            internal_roles: default_internal_roles(),
            companion_keywords: default_companion_keywords(),
            escalation_keywords: default_escalation_keywords(),
            fast: default_fast_backend(),
            deep: default_deep_backend(),
            grounding_top_k: DEFAULT_GROUNDING_TOP_K,
        }
    }
}

// ============================================================================
// Model Providers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModelsConfig {
    #[serde(default)]
    pub providers: HashMap<String, ModelProviderConfig>,
}

impl ModelsConfig {
    pub fn apply_anthropic_key(&mut self, key: &str) {
        self.providers
            .entry("anthropic".to_string())
            .or_insert_with(|| ModelProviderConfig {
                base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
                api_key: None,
                headers: None,
            })
            .api_key = Some(key.to_string());
    }

    pub fn apply_openai_key(&mut self, key: &str) {
        self.providers
            .entry("openai".to_string())
            .or_insert_with(|| ModelProviderConfig {
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                api_key: None,
                headers: None,
            })
            .api_key = Some(key.to_string());
    }
}

// ============================================================================
// Credits Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreditsConfig {
    /// Caller ids refused generation capacity. Empty means unmetered.
    #[serde(default)]
    pub denied: Vec<String>,
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoggingLevel::Error => "error",
            LoggingLevel::Warn => "warn",
            LoggingLevel::Info => "info",
            LoggingLevel::Debug => "debug",
            LoggingLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LoggingLevel,
    #[serde(default)]
    pub format: LoggingFormat,
}

// ============================================================================
// Serde default helpers
// ============================================================================

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}
fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_max_input_tokens() -> usize {
    DEFAULT_EMBEDDING_MAX_INPUT_TOKENS
}
fn default_batch_size() -> usize {
    EMBEDDING_BATCH_SIZE
}
fn default_embedding_timeout_ms() -> u64 {
    EMBEDDING_REQUEST_TIMEOUT_MS
}
fn default_retry_attempts() -> u32 {
    EMBEDDING_RETRY_MAX_ATTEMPTS
}
fn default_retry_initial_ms() -> u64 {
    DEFAULT_RETRY_INITIAL_MS
}
fn default_retry_max_ms() -> u64 {
    DEFAULT_RETRY_MAX_MS
}
fn default_retry_factor() -> f64 {
    DEFAULT_RETRY_FACTOR
}
fn default_pool_size() -> u32 {
    DEFAULT_INDEX_POOL_SIZE
}
fn default_connect_timeout_ms() -> u64 {
    DEFAULT_INDEX_CONNECT_TIMEOUT_MS
}
fn default_chunk_tokens() -> u32 {
    DEFAULT_CHUNK_TOKENS
}
fn default_chunk_overlap() -> u32 {
    DEFAULT_CHUNK_OVERLAP
}
fn default_concurrency() -> usize {
    EMBEDDING_INDEX_CONCURRENCY
}
fn default_top_k() -> u32 {
    DEFAULT_TOP_K
}
fn default_max_top_k() -> u32 {
    MAX_TOP_K
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_keyword_weight() -> f64 {
    0.4
}
fn default_highlight_count() -> usize {
    DEFAULT_HIGHLIGHT_COUNT
}
fn default_backend_max_tokens() -> u64 {
    1024
}
fn default_grounding_top_k() -> u32 {
    DEFAULT_GROUNDING_TOP_K
}
fn default_internal_roles() -> Vec<String> {
    DEFAULT_INTERNAL_ROLES.iter().map(|s| s.to_string()).collect()
}
fn default_companion_keywords() -> Vec<String> {
    DEFAULT_COMPANION_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_escalation_keywords() -> Vec<String> {
    DEFAULT_ESCALATION_KEYWORDS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_fast_backend() -> BackendConfig {
    BackendConfig {
        model: DEFAULT_FAST_MODEL.to_string(),
        max_tokens: 512,
        temperature: Some(0.3),
    }
}
fn default_deep_backend() -> BackendConfig {
    BackendConfig {
        model: DEFAULT_DEEP_MODEL.to_string(),
        max_tokens: 2048,
        temperature: None,
    }
}
