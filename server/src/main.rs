#![warn(clippy::nursery, clippy::pedantic)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use stashpad_server::config::Opts;
use stashpad_server::{routes, PasteManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let opts = Opts::parse();
    let storage = opts.storage_config().connect().await?;
    let manager = Arc::new(PasteManager::new(storage, opts.engine_config())?);
    info!("Engine configured with {:?}", manager.config());

    let signals = Signals::new(&[SIGINT, SIGTERM])?;
    let signals_handle = signals.handle();

    info!("Listening on {}", opts.listen);
    let served = axum::Server::bind(&opts.listen)
        .serve(routes::router(Arc::clone(&manager)).into_make_service())
        .with_graceful_shutdown(shutdown(signals))
        .await;

    signals_handle.close();
    // Release the backend even if the server died on us.
    if let Err(e) = manager.close().await {
        error!("Failed to close storage: {}", e);
    }
    served?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!("Received signal {}, shutting down", signal);
    }
}
