mod defaults;
mod types;
mod validation;

pub use defaults::*;
pub use types::*;
pub use validation::*;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level kbgate configuration.
///
/// Built once at startup and handed to each component's constructor; nothing
/// reads configuration from global state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub credits: CreditsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    /// State directory for persistent data.
    #[serde(skip)]
    pub state_dir: PathBuf,
}

impl Config {
    /// Load configuration from file, environment, and defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(PathBuf::from)
            .or_else(find_config_file)
            .unwrap_or_else(|| PathBuf::from("kbgate.json"));

        let mut config = if config_path.exists() {
            info!("Loading config from {}", config_path.display());
            load_config_file(&config_path)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.state_dir = resolve_state_dir();

        Ok(config)
    }

    /// Write default configuration to a file.
    pub fn write_default(path: &str) -> Result<()> {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {path}"))?;
        Ok(())
    }

    /// Path of the SQLite knowledge index.
    pub fn index_path(&self) -> PathBuf {
        match &self.index.path {
            Some(p) => PathBuf::from(p),
            None => self.state_dir.join("knowledge.db"),
        }
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("KBGATE_PORT") {
            if let Ok(port) = port.parse() {
                self.gateway.port = port;
            }
        }

        if let Ok(bind) = std::env::var("KBGATE_BIND") {
            if let Ok(mode) = bind.parse() {
                self.gateway.bind = mode;
            }
        }

        if let Ok(path) = std::env::var("KBGATE_INDEX_PATH") {
            self.index.path = Some(path);
        }

        if let Ok(key) = std::env::var("KBGATE_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.models.apply_anthropic_key(&key);
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.models.apply_openai_key(&key);
            if self.embedding.api_key.is_none() {
                self.embedding.api_key = Some(key);
            }
        }
    }
}

/// Find the configuration file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    let candidates = [
        PathBuf::from("kbgate.json"),
        PathBuf::from("kbgate.json5"),
        PathBuf::from("kbgate.yaml"),
        PathBuf::from("kbgate.yml"),
        PathBuf::from("kbgate.toml"),
    ];

    for path in &candidates {
        if path.exists() {
            return Some(path.clone());
        }
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".kbgate").join("config.json");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Resolve the state directory for persistent data.
fn resolve_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KBGATE_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::home_dir()
        .map(|h| h.join(".kbgate"))
        .unwrap_or_else(|| PathBuf::from(".kbgate"))
}

/// Load configuration from a file path.
fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    parse_config(&content, path.extension().and_then(|e| e.to_str()))
        .with_context(|| format!("failed to parse config file '{}'", path.display()))
}

/// Parse configuration text according to its file extension.
///
/// Unknown or missing extensions are treated as JSON5, which also accepts
/// plain JSON.
pub fn parse_config(content: &str, extension: Option<&str>) -> Result<Config> {
    let config = match extension {
        Some("yaml") | Some("yml") => serde_yaml::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => json5::from_str(content)?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json5_with_comments() {
        let cfg = parse_config(
            r#"{
                // local embeddings for development
                embedding: { provider: "local", dimensions: 64 },
                search: { fusion: "rrf" },
            }"#,
            Some("json5"),
        )
        .unwrap();
        assert_eq!(cfg.embedding.provider, EmbeddingProviderKind::Local);
        assert_eq!(cfg.embedding.resolved_dimensions(), 64);
        assert_eq!(cfg.search.fusion, FusionStrategy::Rrf);
        // Untouched sections fall back to defaults.
        assert_eq!(cfg.gateway.port, DEFAULT_GATEWAY_PORT);
        assert_eq!(cfg.ingestion.concurrency, EMBEDDING_INDEX_CONCURRENCY);
    }

    #[test]
    fn parses_yaml_and_toml() {
        let yaml = parse_config(
            "routing:\n  groundingTopK: 2\n  fast:\n    model: gpt-4o-mini\n",
            Some("yaml"),
        )
        .unwrap();
        assert_eq!(yaml.routing.grounding_top_k, 2);
        assert_eq!(yaml.routing.fast.max_tokens, 1024);

        let toml = parse_config("[index]\npoolSize = 2\n", Some("toml")).unwrap();
        assert_eq!(toml.index.pool_size, 2);
    }

    #[test]
    fn default_round_trips_through_json() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        let back = parse_config(&json, Some("json")).unwrap();
        assert_eq!(back.routing.companion_keywords.len(), DEFAULT_COMPANION_KEYWORDS.len());
        assert_eq!(back.embedding.model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn index_path_defaults_under_state_dir() {
        let mut cfg = Config::default();
        cfg.state_dir = PathBuf::from("/tmp/kb");
        assert_eq!(cfg.index_path(), PathBuf::from("/tmp/kb/knowledge.db"));
        cfg.index.path = Some("/data/kb.db".into());
        assert_eq!(cfg.index_path(), PathBuf::from("/data/kb.db"));
    }
}
