mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ModelsConfig, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_OPENAI_BASE_URL};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Upper bound on a single generation request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Provider Types
// ============================================================================

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: String,
    pub content: String,
}

impl ProviderMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A request to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<ProviderMessage>,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// A response from a model provider.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub stop_reason: Option<String>,
    pub usage: TokenUsage,
}

// ============================================================================
// Provider Trait
// ============================================================================

/// A text-generation backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ProviderRequest) -> Result<ProviderResponse>;
    fn name(&self) -> &str;
}

// ============================================================================
// Provider Resolution
// ============================================================================

/// Build the provider serving `model`, using credentials from `models`
/// and falling back to the conventional environment variables.
pub fn resolve_provider(models: &ModelsConfig, model: &str) -> Result<Arc<dyn ModelProvider>> {
    let provider_name = detect_provider(model);
    let configured = models.providers.get(provider_name);

    match provider_name {
        "anthropic" => {
            let api_key = configured
                .and_then(|p| p.api_key.clone())
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .ok_or_else(|| anyhow::anyhow!("No Anthropic API key configured"))?;

            let base_url = configured
                .map(|p| p.base_url.clone())
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string());

            Ok(Arc::new(AnthropicProvider::new(
                api_key,
                base_url,
                configured.and_then(|p| p.headers.clone()).unwrap_or_default(),
            )?))
        }
        _ => {
            // OpenAI-compatible servers (vLLM, llama.cpp, proxies) may not
            // require a key when a base URL is configured.
            let api_key = configured
                .and_then(|p| p.api_key.clone())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            if api_key.is_none() && configured.is_none() {
                anyhow::bail!("No OpenAI API key configured");
            }

            let base_url = configured
                .map(|p| p.base_url.clone())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

            Ok(Arc::new(OpenAiProvider::new(
                api_key,
                base_url,
                configured.and_then(|p| p.headers.clone()).unwrap_or_default(),
            )?))
        }
    }
}

fn detect_provider(model: &str) -> &'static str {
    let lower = model.to_lowercase();

    if lower.contains("claude") || lower.starts_with("anthropic") {
        return "anthropic";
    }

    "openai"
}

fn build_client(headers: &std::collections::HashMap<String, String>) -> Result<reqwest::Client> {
    let mut map = reqwest::header::HeaderMap::new();
    for (k, v) in headers {
        map.insert(
            reqwest::header::HeaderName::from_bytes(k.as_bytes())?,
            reqwest::header::HeaderValue::from_str(v)?,
        );
    }
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .default_headers(map)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelProviderConfig;

    #[test]
    fn claude_models_route_to_anthropic() {
        assert_eq!(detect_provider("claude-sonnet-4-6"), "anthropic");
        assert_eq!(detect_provider("gpt-4o-mini"), "openai");
        assert_eq!(detect_provider("llama3.3:latest"), "openai");
    }

    #[test]
    fn configured_provider_is_used() {
        let mut models = ModelsConfig::default();
        models.providers.insert(
            "openai".into(),
            ModelProviderConfig {
                base_url: "http://127.0.0.1:9999/v1".into(),
                api_key: None,
                headers: None,
            },
        );
        let p = resolve_provider(&models, "gpt-4o-mini").unwrap();
        assert_eq!(p.name(), "openai");
    }
}
