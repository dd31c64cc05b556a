//! Server entry point: configuration, logging, peer units, listener.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use world_protocol::config::Config;
use world_protocol::error::Result;
use world_protocol::service::{Directory, ScriptingEngine, WorldService};
use world_protocol::transport::{start_server, Peers};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate_strict()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.filter.clone())),
        )
        .init();

    let config = Arc::new(config);
    info!(address = %config.server.bind_address, world = %config.game.main_world, "starting server");

    let directory = Directory::spawn();
    let scripting = ScriptingEngine::spawn(config.scripting.idle_timeout());
    directory.add_world(WorldService::spawn(
        config.game.main_world.clone(),
        directory.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("received CTRL+C, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let peers = Peers {
        directory,
        scripting,
    };
    if let Err(e) = start_server(config, peers, shutdown_rx).await {
        error!(error = %e, "server stopped with error");
        return Err(e);
    }
    Ok(())
}
