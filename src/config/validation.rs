use super::{Config, EmbeddingProviderKind, GatewayBindMode};
use anyhow::Result;
use tracing::warn;

/// Validation errors for configuration.
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn err(path: &str, message: &str) -> ConfigValidationError {
    ConfigValidationError {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Validate a configuration object, collecting every problem.
pub fn validate_config(config: &Config) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();

    if config.gateway.port == 0 {
        errors.push(err("gateway.port", "Port must be greater than 0"));
    }

    if config.gateway.bind == GatewayBindMode::Custom && config.gateway.custom_bind_host.is_none()
    {
        errors.push(err(
            "gateway.customBindHost",
            "Custom bind mode requires a host",
        ));
    }

    let embedding = &config.embedding;
    if embedding.resolved_dimensions() == 0 {
        errors.push(err("embedding.dimensions", "Dimensions must be greater than 0"));
    }
    if embedding.batch_size == 0 {
        errors.push(err("embedding.batchSize", "Batch size must be greater than 0"));
    }
    if embedding.max_input_tokens == 0 {
        errors.push(err(
            "embedding.maxInputTokens",
            "Input token limit must be greater than 0",
        ));
    }
    if embedding.retry.max_attempts == 0 {
        errors.push(err("embedding.retry.maxAttempts", "At least one attempt is required"));
    }
    if embedding.retry.factor < 1.0 {
        errors.push(err("embedding.retry.factor", "Backoff factor must be >= 1.0"));
    }
    if embedding.provider == EmbeddingProviderKind::Openai && embedding.api_key.is_none() {
        warn!("Embedding provider is 'openai' but no API key is configured");
    }

    if config.ingestion.chunk_tokens == 0 {
        errors.push(err("ingestion.chunkTokens", "Chunk size must be greater than 0"));
    }
    if config.ingestion.chunk_overlap >= config.ingestion.chunk_tokens {
        errors.push(err(
            "ingestion.chunkOverlap",
            "Overlap must be smaller than the chunk size",
        ));
    }
    if config.ingestion.concurrency == 0 {
        errors.push(err("ingestion.concurrency", "Concurrency must be greater than 0"));
    }

    if config.index.pool_size == 0 {
        errors.push(err("index.poolSize", "Pool size must be greater than 0"));
    }

    let search = &config.search;
    if search.default_top_k == 0 || search.default_top_k > search.max_top_k {
        errors.push(err(
            "search.defaultTopK",
            "Default topK must be between 1 and maxTopK",
        ));
    }
    if search.vector_weight < 0.0 || search.keyword_weight < 0.0 {
        errors.push(err("search", "Fusion weights must not be negative"));
    }

    for (tier, backend) in [("fast", &config.routing.fast), ("deep", &config.routing.deep)] {
        if backend.model.trim().is_empty() {
            errors.push(err(
                &format!("routing.{tier}.model"),
                "Backend model is required",
            ));
        }
    }

    for (name, provider) in &config.models.providers {
        if provider.base_url.is_empty() {
            errors.push(err(
                &format!("models.providers.{name}.baseUrl"),
                "Provider base URL is required",
            ));
        }
    }

    errors
}

/// Validate configuration and return Result.
pub fn validate_config_object(config: &Config) -> Result<()> {
    let errors = validate_config(config);
    if errors.is_empty() {
        Ok(())
    } else {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!("Configuration validation failed:\n{}", messages.join("\n"));
    }
}
