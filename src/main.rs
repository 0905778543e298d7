use clap::Parser;
use kbgate::cli::{self, Cli, Commands, ConfigAction};
use kbgate::config::{validate_config, Config};
use kbgate::gateway::{GatewayServer, GatewayState};
use kbgate::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Serve(opts) => {
            info!("Starting kbgate gateway server");
            let state = GatewayState::from_config(config)?;
            let server = GatewayServer::start(state, opts.port, opts.bind.as_deref()).await?;
            server.run_until_shutdown().await?;
        }
        Commands::Ingest(opts) => {
            let state = GatewayState::from_config(config)?;
            cli::run_ingest(&state, &opts).await?;
        }
        Commands::Search(opts) => {
            let state = GatewayState::from_config(config)?;
            cli::run_search(&state, &opts).await?;
        }
        Commands::Config(opts) => match opts.action {
            ConfigAction::Show => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => {
                let errors = validate_config(&config);
                if errors.is_empty() {
                    info!("Configuration is valid");
                } else {
                    for e in &errors {
                        error!("{e}");
                    }
                    anyhow::bail!("configuration has {} problem(s)", errors.len());
                }
            }
            ConfigAction::Init => {
                let path = cli.config.as_deref().unwrap_or("kbgate.json");
                Config::write_default(path)?;
                info!("Configuration file created at {path}");
            }
        },
        Commands::Version => {
            println!("kbgate {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
