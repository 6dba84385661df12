use anyhow::Result;
use clap::Parser;
use orchestrator_notify::ApiForwarder;
use orchestrator_types::OrchestratorConfig;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "orchestrator-notify")]
#[command(about = "Notification Engine: forwards broker anomaly events to the API Facade")]
struct Cli {
    /// Base name of the config file (loaded as `{config}.json`).
    #[arg(long, default_value = "notify")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(&cli.config)?;

    let broker_uri = format!(
        "amqp://{}:{}@{}/{}",
        config.broker.username, config.broker.password, config.broker.address, config.broker.vhost
    );
    let broker = Arc::new(broker::LapinBroker::connect(&broker_uri).await?);
    let api = ApiForwarder::new(config.api_base_url.clone());

    info!(topic = %config.anomaly_topic, "starting notification engine");
    orchestrator_notify::run(broker, config.anomaly_topic.clone(), api).await?;
    Ok(())
}
