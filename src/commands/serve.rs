//! Serve command implementation
//!
//! Runs one broker session: attaches the shared store, creates the command
//! queue, connects to the gateway and dispatches until disconnect or
//! Ctrl+C.

use anyhow::{Context, Result};
use tracing::{error, info};

use order_book::{BrokerSession, CommandQueue, Config, SharedOrderStore, SharedSegment, TwsClient};

pub fn run(
    mut config: Config,
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<i32>,
    attempts: Option<u32>,
) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(client_id) = client_id {
        config.gateway.client_id = client_id;
    }
    if let Some(attempts) = attempts {
        config.gateway.connect_attempts = attempts;
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config))
}

async fn run_async(config: Config) -> Result<()> {
    let segment = SharedSegment::attach_in(config.segment_dir(), &config.store.name)?;
    let store = SharedOrderStore::with_backing(&config.store.name, segment);
    info!(
        "Order store '{}' holds {} records",
        store.name(),
        store.len()?
    );

    let queue = if config.queue.purge_on_start {
        CommandQueue::create_in(config.queue_dir(), &config.queue.name)?
    } else {
        CommandQueue::open_in(config.queue_dir(), &config.queue.name)?
    };
    info!("Command queue '{}' at {}", queue.name(), queue.path().display());

    let session = BrokerSession::new(TwsClient::with_config(config.tws()), queue, store)
        .with_config(config.session());

    let gateway = &config.gateway;
    let handle = session
        .connect(&gateway.host, gateway.port, gateway.client_id)
        .await?;

    let disconnector = handle.disconnector();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, disconnecting...");
                disconnector.disconnect();
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });

    let session = handle.run().await?;
    let stats = session.stats();
    info!("Session ended: {}", stats);
    info!(
        "Order store '{}' holds {} records",
        session.store().name(),
        session.store().len()?
    );
    Ok(())
}
