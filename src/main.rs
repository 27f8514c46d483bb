//! nodelet entry point.
//!
//! Thin bootstrap: initialize tracing, load the env-driven configuration,
//! build the REST cluster client, and run the agent until ctrl-c. Fatal
//! agent errors exit non-zero so an external supervisor can restart us.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nodelet::{Agent, Config, RestClusterClient};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    info!(
        node = %config.node_name,
        cluster_url = %config.cluster_url,
        lease_duration_seconds = config.lease_duration_seconds,
        "Configuration loaded"
    );

    let client = Arc::new(RestClusterClient::new(&config.cluster_url));
    let agent = Agent::new(client, config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    agent.run(shutdown_rx).await
}
