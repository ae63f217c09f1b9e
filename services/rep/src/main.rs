//! Cell rep
//!
//! Runs on each cell. Accepts placements from the scheduler, reserves
//! containers on the local executor, and reconciles the BBS against the
//! containers actually present.
//!
//! ## Architecture
//!
//! - **HTTP API**: state, work and evacuation endpoints for the scheduler
//! - **Bulker**: periodic full reconciliation pass
//! - **Event Consumer**: reconciles containers as executor events arrive
//! - **Operation Queue**: runs operations with at most one in flight per guid

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cell_models::executor::Container;
use cell_models::Lifecycle;
use cell_rep::api::{self, AppState};
use cell_rep::client::{
    HttpBbsClient, HttpExecutorClient, LrpProcessor, TaskProcessor, UuidGenerator,
};
use cell_rep::config::Config;
use cell_rep::harmonizer::{Bulker, EventConsumer};
use cell_rep::{evacuation_context, AuctionCellClient, Generator, Operation};
use cell_reconcile::{Queue, SlidingQueue};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Records container observations. Lifecycle processing is owned by the
/// executor-side processors this rep is deployed with.
struct ObservingProcessor;

#[async_trait]
impl LrpProcessor for ObservingProcessor {
    async fn process(&self, container: Container) {
        info!(
            container_guid = %container.guid,
            state = ?container.state,
            lifecycle = %Lifecycle::of(&container),
            "Observed LRP container"
        );
    }
}

#[async_trait]
impl TaskProcessor for ObservingProcessor {
    async fn process(&self, container: Container) {
        info!(
            container_guid = %container.guid,
            state = ?container.state,
            lifecycle = %Lifecycle::of(&container),
            "Observed task container"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        cell_id = %config.cell_id,
        executor_url = %config.executor_url,
        bbs_url = %config.bbs_url,
        listen_addr = %config.listen_addr,
        "Starting cell rep"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let executor = Arc::new(
        HttpExecutorClient::new(&config.executor_url).context("failed to build executor client")?,
    );
    let bbs = Arc::new(HttpBbsClient::new(&config.bbs_url).context("failed to build BBS client")?);
    let (evacuatable, reporter, notifier) = evacuation_context();

    let auction = Arc::new(AuctionCellClient::new(
        config.auction_cell_config(),
        executor.clone(),
        Arc::new(UuidGenerator),
        reporter,
    ));

    let processor = Arc::new(ObservingProcessor);
    let generator = Arc::new(Generator::new(
        config.cell_id.clone(),
        executor,
        bbs,
        processor.clone(),
        processor,
    ));
    let queue: Arc<dyn Queue<Operation>> = Arc::new(SlidingQueue::<Operation>::new());

    // Start the bulk reconciliation loop
    let bulker = Bulker::new(
        Arc::clone(&generator),
        Arc::clone(&queue),
        notifier,
        config.harmonizer_config(),
    );
    let bulker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { bulker.run(shutdown_rx).await }
    });

    // Start the event consumer
    let consumer = EventConsumer::new(generator, queue, config.harmonizer_config());
    let consumer_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { consumer.run(shutdown_rx).await }
    });

    // Start the HTTP API
    let router = api::create_router(AppState {
        auction,
        evacuatable,
    });
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited normally"),
                Ok(Err(e)) => error!(error = %e, "HTTP server error"),
                Err(e) => error!(error = %e, "HTTP server task panicked"),
            }
        }
        _ = bulker_handle => {
            info!("Bulker exited");
        }
        _ = consumer_handle => {
            info!("Event consumer exited");
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // Give workers time to shut down gracefully
    info!("Waiting for workers to shut down...");
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    info!("Cell rep shutdown complete");
    Ok(())
}
