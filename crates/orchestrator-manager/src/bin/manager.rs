use anyhow::Result;
use clap::Parser;
use orchestrator_manager::Manager;
use orchestrator_types::OrchestratorConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "orchestrator-manager")]
#[command(about = "Watches Deployment/Kernel/StoragePolicy submissions and materializes Assignments/Bundles via the ROT oracle")]
struct Cli {
    /// Base name of the config file (loaded as `{config}.json`).
    #[arg(long, default_value = "manager")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(&cli.config)?;

    info!("starting manager");

    let store = orchestrator_manager::open_store(&config)?;
    let broker_uri = format!(
        "amqp://{}:{}@{}/{}",
        config.broker.username, config.broker.password, config.broker.address, config.broker.vhost
    );
    let broker = std::sync::Arc::new(broker::LapinBroker::connect(&broker_uri).await?);

    let manager = Manager::new(store, broker, config).await?;
    manager.run().await;

    Ok(())
}
