//! Operation generator.
//!
//! Compares the executor's containers, the cell's ground truth, with what the
//! BBS believes runs here:
//! - every container is driven forward by a container operation
//! - every BBS record without a container becomes a residual operation
//!
//! It also turns live executor lifecycle events into container operations.

use std::collections::HashMap;
use std::sync::Arc;

use cell_models::bbs::ActualLrpFilter;
use cell_models::tags::lrp_container_guid;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::client::{BbsClient, EventSource, ExecutorClient, LrpProcessor, TaskProcessor};
use crate::error::RepError;
use crate::operation::{Operation, OperationContext, OperationKind};

/// Buffer between the event reader and the stream consumer.
const STREAM_BUFFER: usize = 256;

/// Builds reconciliation operations for one cell.
pub struct Generator {
    cell_id: String,
    executor: Arc<dyn ExecutorClient>,
    bbs: Arc<dyn BbsClient>,
    ctx: Arc<OperationContext>,
}

impl Generator {
    pub fn new(
        cell_id: impl Into<String>,
        executor: Arc<dyn ExecutorClient>,
        bbs: Arc<dyn BbsClient>,
        lrp_processor: Arc<dyn LrpProcessor>,
        task_processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        let ctx = Arc::new(OperationContext::new(
            Arc::clone(&bbs),
            Arc::clone(&executor),
            lrp_processor,
            task_processor,
        ));

        Self {
            cell_id: cell_id.into(),
            executor,
            bbs,
            ctx,
        }
    }

    fn operation(&self, kind: OperationKind) -> Operation {
        Operation::new(kind, Arc::clone(&self.ctx))
    }

    /// One operation per distinct container guid known to either side.
    ///
    /// All three sources are fetched concurrently; if any fails, the pass is
    /// abandoned and the first failure (containers, then LRPs, then tasks) is
    /// returned.
    #[instrument(skip(self), fields(cell_id = %self.cell_id))]
    pub async fn batch_operations(&self) -> Result<HashMap<String, Operation>, RepError> {
        debug!("Building batch operations");

        let filter = ActualLrpFilter::for_cell(self.cell_id.clone());
        let (containers, groups, tasks) = tokio::join!(
            self.executor.list_containers(),
            self.bbs.actual_lrp_groups(&filter),
            self.bbs.tasks_by_cell_id(&self.cell_id),
        );

        let containers = containers.map_err(|e| {
            warn!(error = %e, "Failed to list containers");
            e
        })?;
        let groups = groups.map_err(|e| {
            warn!(error = %e, "Failed to fetch actual LRP groups");
            e
        })?;
        let tasks = tasks.map_err(|e| {
            warn!(error = %e, "Failed to fetch tasks");
            e
        })?;

        let mut batch = HashMap::new();

        for container in containers {
            let guid = container.guid;
            batch.insert(
                guid.clone(),
                self.operation(OperationKind::Container { guid }),
            );
        }

        // Instance copies first, so an evacuating copy of the same container
        // joins the residual instance operation instead of replacing it.
        let mut evacuating = HashMap::new();
        for group in &groups {
            if let Some(lrp) = &group.evacuating {
                let guid = lrp_container_guid(&lrp.key.process_guid, &lrp.instance_key.instance_guid);
                evacuating.insert(guid, lrp);
            }
        }

        for group in &groups {
            let Some(lrp) = &group.instance else { continue };
            let guid = lrp_container_guid(&lrp.key.process_guid, &lrp.instance_key.instance_guid);
            if batch.contains_key(&guid) {
                continue;
            }

            let kind = if evacuating.remove(&guid).is_some() {
                OperationKind::ResidualJointLrp {
                    lrp_key: lrp.key.clone(),
                    instance_key: lrp.instance_key.clone(),
                }
            } else {
                OperationKind::ResidualInstanceLrp {
                    lrp_key: lrp.key.clone(),
                    instance_key: lrp.instance_key.clone(),
                }
            };
            batch.insert(guid, self.operation(kind));
        }

        for (guid, lrp) in evacuating {
            if batch.contains_key(&guid) {
                continue;
            }
            let kind = OperationKind::ResidualEvacuatingLrp {
                lrp_key: lrp.key.clone(),
                instance_key: lrp.instance_key.clone(),
            };
            batch.insert(guid, self.operation(kind));
        }

        for task in tasks {
            if batch.contains_key(&task.task_guid) {
                continue;
            }
            let task_guid = task.task_guid;
            batch.insert(
                task_guid.clone(),
                self.operation(OperationKind::ResidualTask { task_guid }),
            );
        }

        info!(operations = batch.len(), "Built batch operations");
        Ok(batch)
    }

    /// Container operations for every executor lifecycle event.
    ///
    /// The returned channel closes once the event source fails or is closed;
    /// nothing is sent after that.
    pub async fn operation_stream(&self) -> Result<mpsc::Receiver<Operation>, RepError> {
        let source = self.executor.subscribe_to_events().await.map_err(|e| {
            warn!(error = %e, "Failed to subscribe to executor events");
            e
        })?;
        info!(cell_id = %self.cell_id, "Subscribed to executor events");

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(forward_events(source, tx, Arc::clone(&self.ctx)));

        Ok(rx)
    }
}

async fn forward_events(
    mut source: Box<dyn EventSource>,
    tx: mpsc::Sender<Operation>,
    ctx: Arc<OperationContext>,
) {
    loop {
        let event = match source.next().await {
            Ok(event) => event,
            Err(e) => {
                info!(error = %e, "Executor event stream ended");
                break;
            }
        };

        let Some(container) = event.lifecycle_container() else {
            debug!(event_type = event.event_type(), "Ignoring non-lifecycle event");
            continue;
        };

        let kind = OperationKind::Container {
            guid: container.guid.clone(),
        };
        if tx.send(Operation::new(kind, Arc::clone(&ctx))).await.is_err() {
            debug!("Operation stream receiver dropped");
            break;
        }
    }

    source.close();
}
