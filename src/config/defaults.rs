/// Default configuration constants used across the system.

/// Default gateway port.
pub const DEFAULT_GATEWAY_PORT: u16 = 18790;

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Dimension of `text-embedding-3-small`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Dimension used by the local hashing embedder.
pub const DEFAULT_LOCAL_EMBEDDING_DIMENSIONS: usize = 384;

/// Default OpenAI-compatible API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Anthropic API base URL.
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Provider input limit for the default embedding model.
pub const DEFAULT_EMBEDDING_MAX_INPUT_TOKENS: usize = 8191;

/// Default embedding chunk size in tokens.
pub const DEFAULT_CHUNK_TOKENS: u32 = 256;

/// Default embedding chunk overlap.
pub const DEFAULT_CHUNK_OVERLAP: u32 = 32;

/// Texts sent per embedding request.
pub const EMBEDDING_BATCH_SIZE: usize = 64;

/// Default embedding index concurrency.
pub const EMBEDDING_INDEX_CONCURRENCY: usize = 4;

/// Default embedding retry max attempts.
pub const EMBEDDING_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default remote embedding request timeout.
pub const EMBEDDING_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default retry backoff initial delay.
pub const DEFAULT_RETRY_INITIAL_MS: u64 = 500;

/// Default retry backoff max delay.
pub const DEFAULT_RETRY_MAX_MS: u64 = 10_000;

/// Default retry backoff factor.
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;

/// Default SQLite connection pool size.
pub const DEFAULT_INDEX_POOL_SIZE: u32 = 8;

/// How long to wait for a pooled connection before reporting the index unavailable.
pub const DEFAULT_INDEX_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default number of search results.
pub const DEFAULT_TOP_K: u32 = 5;

/// Upper bound on `topK`.
pub const MAX_TOP_K: u32 = 50;

/// Number of chunks used to ground a chat response.
pub const DEFAULT_GROUNDING_TOP_K: u32 = 4;

/// Highlights attached to each search result.
pub const DEFAULT_HIGHLIGHT_COUNT: usize = 3;

/// Default fast-tier model.
pub const DEFAULT_FAST_MODEL: &str = "gpt-4o-mini";

/// Default deep-tier model.
pub const DEFAULT_DEEP_MODEL: &str = "claude-sonnet-4-6";

/// Roles that always mark a caller as internal.
pub const DEFAULT_INTERNAL_ROLES: &[&str] = &["admin", "owner", "staff", "internal", "operator"];

/// Message keywords that indicate internal operations.
pub const DEFAULT_COMPANION_KEYWORDS: &[&str] = &[
    "sop",
    "sops",
    "standard operating procedure",
    "escalation",
    "escalate",
    "webhook",
    "webhooks",
    "integration",
    "integrations",
    "api key",
    "internal",
    "playbook",
    "runbook",
    "zapier",
    "pipeline stage",
];

/// Message keywords that flag a request as urgent or high value.
pub const DEFAULT_ESCALATION_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "emergency",
    "lawsuit",
    "legal action",
    "chargeback",
    "cancel my account",
    "speak to a human",
    "talk to a human",
    "manager",
    "enterprise plan",
];
