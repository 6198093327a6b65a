//! Banner Rotator: adaptive banner selection per page, slot and audience.
//!
//! Main entry point that wires the store, queue, decision engine, ingestion
//! pipeline and HTTP API, and shuts them down in order on Ctrl-C.

use clap::Parser;
use rotator_aggregator::Aggregator;
use rotator_api::ApiServer;
use rotator_core::config::AppConfig;
use rotator_core::event_bus::shutdown_channel;
use rotator_engine::engine_for;
use rotator_orchestrator::{BannerRotator, EventEmitter};
use rotator_store::MemoryStore;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "banner-rotator")]
#[command(about = "Adaptive banner rotation with per-segment UCB1 bandits")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "ROTATOR__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "ROTATOR__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Event queue backend: memory or nats (overrides config)
    #[arg(long, env = "ROTATOR__QUEUE__BACKEND")]
    queue: Option<String>,

    /// Decision algorithm: ucb1 or random (overrides config)
    #[arg(long, env = "ROTATOR__ENGINE__ALGORITHM")]
    algorithm: Option<String>,

    /// Serve only; leave event ingestion to a separate aggregator process
    #[arg(long, default_value_t = false)]
    no_ingest: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "banner_rotator=info,rotator_orchestrator=info,rotator_aggregator=info,tower_http=info"
                    .into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Banner Rotator starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(queue) = cli.queue {
        config.queue.backend = queue;
    }
    if let Some(algorithm) = cli.algorithm {
        config.engine.algorithm = algorithm;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        queue = %config.queue.backend,
        algorithm = %config.engine.algorithm,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let queue = rotator_queue::connect(&config).await?;
    let engine = engine_for(&config.engine.algorithm)?;
    let emitter = EventEmitter::spawn(queue.publisher.clone(), config.emitter.capacity);

    let rotator = Arc::new(BannerRotator::new(store.repositories(), engine, emitter));
    rotator.init().await?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    // Ingestion stops only after the emitter has flushed into the queue.
    let (ingest_tx, ingest_rx) = shutdown_channel();

    // Start the ingestion pipeline (unless serve-only mode)
    let ingest = if cli.no_ingest {
        info!("Running in serve-only mode (no event ingestion)");
        None
    } else {
        let aggregator = Aggregator::new(
            store.clone(),
            store.clone(),
            queue.subscriber.clone(),
            &config.ingest,
        );
        Some(tokio::spawn(async move { aggregator.run(ingest_rx).await }))
    };

    let api_server = ApiServer::new(config.clone(), rotator.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    info!("Banner Rotator is ready to serve traffic");

    // Serve until shutdown, then drain in dependency order.
    let served = api_server.start_http(shutdown_rx).await;

    rotator.shutdown().await;
    let _ = ingest_tx.send(true);
    if let Some(ingest) = ingest {
        match ingest.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Aggregator stopped with an error"),
            Err(e) => error!(error = %e, "Aggregator task panicked"),
        }
    }

    info!("Banner Rotator stopped");
    served
}
