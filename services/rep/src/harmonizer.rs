//! Harmonizer loops feeding the operation queue.
//!
//! - **Bulker**: periodically diffs the BBS against the executor and pushes
//!   the whole batch; switches to a faster cadence once evacuation begins
//! - **Event consumer**: pushes a container operation for every executor
//!   lifecycle event, resubscribing whenever the stream ends
//!
//! Both producers may push operations for the same guid; the queue keeps at
//! most one in flight per key.

use std::sync::Arc;
use std::time::Duration;

use cell_reconcile::Queue;
use tokio::sync::watch;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, warn};

use crate::evacuation::EvacuationNotifier;
use crate::generator::Generator;
use crate::operation::Operation;

/// Harmonizer loop configuration.
#[derive(Debug, Clone)]
pub struct HarmonizerConfig {
    /// Interval between bulk syncs.
    pub poll_interval: Duration,

    /// Interval between bulk syncs while evacuating.
    pub evacuation_poll_interval: Duration,

    /// Delay before resubscribing to executor events.
    pub stream_retry_interval: Duration,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            evacuation_poll_interval: Duration::from_secs(10),
            stream_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Periodic full reconciliation.
pub struct Bulker {
    generator: Arc<Generator>,
    queue: Arc<dyn Queue<Operation>>,
    notifier: EvacuationNotifier,
    config: HarmonizerConfig,
}

impl Bulker {
    pub fn new(
        generator: Arc<Generator>,
        queue: Arc<dyn Queue<Operation>>,
        notifier: EvacuationNotifier,
        config: HarmonizerConfig,
    ) -> Self {
        Self {
            generator,
            queue,
            notifier,
            config,
        }
    }

    /// Run until shutdown. The first sync happens one poll interval in.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            evacuation_poll_interval_secs = self.config.evacuation_poll_interval.as_secs(),
            "Starting bulker"
        );

        let mut interval = delayed_interval(self.config.poll_interval);
        let evacuation = self.notifier.wait_for_evacuation();
        tokio::pin!(evacuation);
        let mut evacuating = false;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sync().await;
                }
                _ = &mut evacuation, if !evacuating => {
                    evacuating = true;
                    info!("Evacuation started, syncing at evacuation interval");
                    self.sync().await;
                    interval = delayed_interval(self.config.evacuation_poll_interval);
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Bulker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Push one full batch onto the queue.
    pub async fn sync(&self) {
        let started = Instant::now();

        match self.generator.batch_operations().await {
            Ok(batch) => {
                let count = batch.len();
                for operation in batch.into_values() {
                    self.queue.push(operation);
                }
                info!(
                    operations = count,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Bulk sync complete"
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to generate operations");
            }
        }
    }
}

/// Streams executor lifecycle events into the queue.
pub struct EventConsumer {
    generator: Arc<Generator>,
    queue: Arc<dyn Queue<Operation>>,
    config: HarmonizerConfig,
}

impl EventConsumer {
    pub fn new(
        generator: Arc<Generator>,
        queue: Arc<dyn Queue<Operation>>,
        config: HarmonizerConfig,
    ) -> Self {
        Self {
            generator,
            queue,
            config,
        }
    }

    /// Run until shutdown, resubscribing after every stream end.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting event consumer");

        loop {
            match self.generator.operation_stream().await {
                Ok(mut stream) => loop {
                    tokio::select! {
                        operation = stream.recv() => match operation {
                            Some(operation) => {
                                debug!(key = %operation.kind().key(), "Queueing streamed operation");
                                self.queue.push(operation);
                            }
                            None => {
                                warn!("Operation stream closed, resubscribing");
                                break;
                            }
                        },
                        result = shutdown.changed() => {
                            if result.is_err() || *shutdown.borrow() {
                                info!("Event consumer shutting down");
                                return;
                            }
                        }
                    }
                },
                Err(e) => {
                    error!(error = %e, "Failed to subscribe to operation stream");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.stream_retry_interval) => {}
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Event consumer shutting down");
                        return;
                    }
                }
            }
        }
    }
}

fn delayed_interval(period: Duration) -> Interval {
    tokio::time::interval_at(Instant::now() + period, period)
}
