//! `shardhub` binary: loads configuration, starts the hub, and runs until
//! SIGINT or SIGTERM.

mod cli;
mod config;
mod logging;
mod signals;

use shardhub::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::cli::CliArgs;
use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    args.apply(&mut config);
    config.validate()?;

    logging::init(&config.logging)?;
    info!(config = %args.config_path.display(), "starting shardhub");

    let auth = config.to_auth_config()?;
    if auth.is_empty() {
        warn!("no shared secrets configured, every shard and console will be accepted");
    }

    let server = HubServer::builder()
        .config(config.to_hub_config())
        .build(auth.into_authenticator())
        .await?;
    let hub = server.handle();

    let events = hub.subscribe().await?;
    tokio::spawn(log_registry_events(events));

    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        signal = signals::wait_for_shutdown() => {
            signal?;
            info!("shutting down");
            hub.shutdown().await?;
            server_task.await??;
        }
        result = &mut server_task => {
            // The accept loop only returns on its own if the coordinator died.
            error!("hub stopped unexpectedly");
            result??;
        }
    }

    info!("shardhub stopped");
    Ok(())
}

/// Surfaces shard arrivals and departures in the operator log.
async fn log_registry_events(mut events: tokio::sync::broadcast::Receiver<RegistryEvent>) {
    loop {
        match events.recv().await {
            Ok(RegistryEvent::ShardAdded { shard_id, name }) => {
                info!(%shard_id, %name, "shard online");
            }
            Ok(RegistryEvent::ShardRemoved { shard_id, name }) => {
                warn!(%shard_id, %name, "shard offline");
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "registry event log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
