use crate::config::{LoggingConfig, LoggingFormat};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive(config)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LoggingFormat::Pretty => builder.try_init(),
        LoggingFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

fn default_directive(config: &LoggingConfig) -> String {
    format!("kbgate={}", config.level.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoggingLevel;

    #[test]
    fn directive_follows_level() {
        let config = LoggingConfig {
            level: LoggingLevel::Debug,
            format: LoggingFormat::Json,
        };
        assert_eq!(default_directive(&config), "kbgate=debug");
        assert!(EnvFilter::try_new(default_directive(&LoggingConfig::default())).is_ok());
    }
}
