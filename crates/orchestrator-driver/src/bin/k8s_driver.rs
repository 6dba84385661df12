use anyhow::Result;
use clap::Parser;
use orchestrator_driver::api_client::ApiClient;
use orchestrator_driver::backend::ReqwestContainerScheduler;
use orchestrator_driver::k8s::K8sDriver;
use orchestrator_types::OrchestratorConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "orchestrator-driver-k8s")]
#[command(about = "Cluster Driver agent for a container-scheduler backed cluster")]
struct Cli {
    /// Base name of the config file (loaded as `{config}.json`).
    #[arg(long, default_value = "driver")]
    config: String,

    /// Cluster this Driver instance is responsible for.
    #[arg(long)]
    cluster_uuid: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = OrchestratorConfig::load(&cli.config)?;

    info!(cluster_uuid = %cli.cluster_uuid, "starting k8s cluster driver");

    let cluster = orchestrator_driver::fetch_cluster(&config.api_base_url, &cli.cluster_uuid).await?;
    let backend_endpoint = cluster.info.get("endpoint").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let store = orchestrator_driver::open_store(&config)?;
    let api = ApiClient::new(config.api_base_url.clone());
    let backend = Arc::new(ReqwestContainerScheduler::new());
    let broker_uri = format!(
        "amqp://{}:{}@{}/{}",
        config.broker.username, config.broker.password, config.broker.address, config.broker.vhost
    );
    let broker = Arc::new(broker::LapinBroker::connect(&broker_uri).await?);

    let heartbeat = tokio::spawn(orchestrator_driver::run_heartbeat_loop(
        config.api_base_url.clone(),
        cli.cluster_uuid.clone(),
        Duration::from_secs(config.heartbeat_secs),
    ));

    let driver = K8sDriver::new(store, api, backend, broker, config, cli.cluster_uuid, backend_endpoint);
    driver.run().await;

    heartbeat.abort();
    Ok(())
}
