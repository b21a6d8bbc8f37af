//! Dynatrace Alertmanager Receiver - Main Entry Point

use anyhow::Context;
use api::{init_logging, run_server, ReceiverConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ReceiverConfig::load().context("loading configuration")?;
    let _log_guard = init_logging(&config.logging)?;

    info!("=== Dynatrace Alertmanager Receiver v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Forwarding to {} as group {}",
        config.dynatrace.api_url, config.dynatrace.group_name
    );

    run_server(config).await?;

    Ok(())
}
