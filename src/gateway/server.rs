use crate::config::{validate_config_object, Config, GatewayBindMode};
use crate::credits::{self, CreditGate};
use crate::gateway::chat::ChatService;
use crate::gateway::routes;
use crate::knowledge::chunking::ChunkOptions;
use crate::knowledge::embeddings::RetryPolicy;
use crate::knowledge::{
    create_provider, IngestOptions, IngestionPipeline, KnowledgeStore, QueryEngine,
    SharedEmbeddingProvider, SqliteKnowledgeIndex,
};

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub store: Arc<dyn KnowledgeStore>,
    pub embedder: SharedEmbeddingProvider,
    pub pipeline: IngestionPipeline,
    pub engine: QueryEngine,
    pub chat: ChatService,
    pub shutdown_tx: broadcast::Sender<()>,
    pub start_time: std::time::Instant,
    pub version: String,
}

impl GatewayState {
    /// Open the index and build every component from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        validate_config_object(&config)?;

        let index_path = config.index_path();
        info!("Opening knowledge index at {}", index_path.display());
        let store = SqliteKnowledgeIndex::open(
            &index_path,
            config.index.pool_size,
            Duration::from_millis(config.index.connect_timeout_ms),
        )
        .with_context(|| format!("failed to open knowledge index '{}'", index_path.display()))?;

        let embedder = create_provider(&config.embedding)?;
        info!(
            model = %embedder.model_name(),
            dimensions = embedder.dimensions(),
            "Embedding provider ready"
        );

        let credits = credits::from_config(&config.credits);
        Self::with_components(config, Arc::new(store), embedder, credits)
    }

    /// Build state around an existing store, embedder and credit gate.
    pub fn with_components(
        config: Config,
        store: Arc<dyn KnowledgeStore>,
        embedder: SharedEmbeddingProvider,
        credits: Arc<dyn CreditGate>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from(&config.embedding.retry);
        let pipeline = IngestionPipeline::new(
            store.clone(),
            embedder.clone(),
            IngestOptions {
                chunking: ChunkOptions {
                    max_tokens: config.ingestion.chunk_tokens,
                    overlap: config.ingestion.chunk_overlap,
                },
                batch_size: config.embedding.batch_size,
                concurrency: config.ingestion.concurrency,
                use_cache: config.embedding.cache,
                retry: retry.clone(),
            },
        );
        let engine = QueryEngine::new(store.clone(), embedder.clone(), config.search.clone(), retry);
        let chat = ChatService::from_config(&config, engine.clone(), credits)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            store,
            embedder,
            pipeline,
            engine,
            chat,
            shutdown_tx,
            start_time: std::time::Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }
}

/// The gateway server.
pub struct GatewayServer {
    state: GatewayState,
    listener: TcpListener,
    addr: SocketAddr,
}

impl GatewayServer {
    /// Bind the listener. `port` and `bind` override the configured values.
    pub async fn start(state: GatewayState, port: Option<u16>, bind: Option<&str>) -> Result<Self> {
        let port = port.unwrap_or(state.config.gateway.port);
        let bind_addr = resolve_bind_address(&state.config, bind, port)?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        let addr = listener.local_addr()?;
        info!("Gateway server bound to {}", addr);

        Ok(Self {
            state,
            listener,
            addr,
        })
    }

    /// Run the server until a shutdown signal is received.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let app = build_router(self.state.clone());
        print_startup_banner(&self.state, &self.addr);

        let shutdown_rx = self.state.shutdown_tx.subscribe();
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown_signal(self.state.shutdown_tx.clone(), shutdown_rx))
            .await?;

        info!("Gateway server shut down gracefully");
        Ok(())
    }

    /// Get the bound server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle that triggers graceful shutdown when sent to.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.state.shutdown_tx.clone()
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: GatewayState) -> Router {
    routes::build_routes(state)
}

/// Wait for Ctrl+C, SIGTERM or an explicit shutdown request.
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>, mut shutdown_rx: broadcast::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested");
            return;
        }
    }

    let _ = shutdown_tx.send(());
}

/// Resolve the bind address from configuration.
fn resolve_bind_address(config: &Config, bind_override: Option<&str>, port: u16) -> Result<SocketAddr> {
    let bind = match bind_override {
        Some(b) => b.parse::<GatewayBindMode>().map_err(anyhow::Error::msg)?,
        None => config.gateway.bind,
    };

    let host = match bind {
        GatewayBindMode::Loopback => "127.0.0.1",
        GatewayBindMode::Lan => "0.0.0.0",
        GatewayBindMode::Custom => config
            .gateway
            .custom_bind_host
            .as_deref()
            .unwrap_or("0.0.0.0"),
    };

    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))
}

fn print_startup_banner(state: &GatewayState, addr: &SocketAddr) {
    info!("-------------------------------------------");
    info!("  kbgate v{}", state.version);
    info!("  Listening on: http://{}", addr);
    info!("  Embeddings: {}", state.embedder.model_name());
    info!("  Fast backend: {}", state.config.routing.fast.model);
    info!("  Deep backend: {}", state.config.routing.deep.model);
    info!("  Health: http://{}/health", addr);
    info!("-------------------------------------------");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_modes_resolve() {
        let mut config = Config::default();
        assert_eq!(
            resolve_bind_address(&config, None, 8080).unwrap(),
            "127.0.0.1:8080".parse().unwrap()
        );
        assert_eq!(
            resolve_bind_address(&config, Some("lan"), 8080).unwrap().ip().to_string(),
            "0.0.0.0"
        );

        config.gateway.bind = GatewayBindMode::Custom;
        config.gateway.custom_bind_host = Some("10.1.2.3".into());
        assert_eq!(
            resolve_bind_address(&config, None, 1).unwrap(),
            "10.1.2.3:1".parse().unwrap()
        );
        assert!(resolve_bind_address(&config, Some("tailnet"), 1).is_err());
    }
}
