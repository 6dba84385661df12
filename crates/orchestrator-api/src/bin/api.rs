use anyhow::Result;
use clap::Parser;
use orchestrator_dispatcher::Dispatcher;
use orchestrator_types::OrchestratorConfig;
use std::sync::Arc;
use storage::{SledStorage, StorageBackend};
use tracing::info;

#[derive(Parser)]
#[command(name = "orchestrator-api")]
#[command(about = "HTTP API Facade every component mutates orchestrator entities through")]
struct Cli {
    /// Base name of the config file (loaded as `{config}.json`).
    #[arg(long, default_value = "api")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(&cli.config)?;
    let bind_addr = config.bind_addr.clone();

    let store: Arc<dyn StorageBackend> = Arc::new(SledStorage::new(&config.kv.path)?);
    let dispatcher = Dispatcher::new(store, config);
    let app = orchestrator_api::router(dispatcher);

    info!(%bind_addr, "starting api facade");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
