//! Reconciliation operations.
//!
//! Each operation carries only the keys needed to find its container again.
//! Execution always re-reads live state first:
//!
//! - **Container**: drive an existing container through its processor
//! - **Residual instance / evacuating / joint LRP**: the BBS still records an
//!   LRP placement on this cell but its container is gone; remove the record
//! - **Residual task**: the BBS still records a task on this cell but its
//!   container is gone; fail the task
//!
//! Execution never returns an error. Failures are logged and left for the
//! next reconciliation pass.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cell_models::bbs::{ActualLrpInstanceKey, ActualLrpKey, TASK_COMPLETION_REASON_MISSING_CONTAINER};
use cell_models::executor::Container;
use cell_models::tags::{lrp_container_guid, Lifecycle, LIFECYCLE_TAG};
use tracing::{debug, error, info, info_span, Instrument};

use crate::client::{
    BbsClient, BbsError, ExecutorClient, ExecutorError, LrpProcessor, TaskProcessor,
};

/// What an operation reconciles, identified by keys only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Container {
        guid: String,
    },
    ResidualInstanceLrp {
        lrp_key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
    },
    ResidualEvacuatingLrp {
        lrp_key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
    },
    ResidualJointLrp {
        lrp_key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
    },
    ResidualTask {
        task_guid: String,
    },
}

impl OperationKind {
    /// The container guid this operation reconciles.
    pub fn key(&self) -> String {
        match self {
            Self::Container { guid } => guid.clone(),
            Self::ResidualInstanceLrp {
                lrp_key,
                instance_key,
            }
            | Self::ResidualEvacuatingLrp {
                lrp_key,
                instance_key,
            }
            | Self::ResidualJointLrp {
                lrp_key,
                instance_key,
            } => lrp_container_guid(&lrp_key.process_guid, &instance_key.instance_guid),
            Self::ResidualTask { task_guid } => task_guid.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Container { .. } => "container",
            Self::ResidualInstanceLrp { .. } => "residual_instance_lrp",
            Self::ResidualEvacuatingLrp { .. } => "residual_evacuating_lrp",
            Self::ResidualJointLrp { .. } => "residual_joint_lrp",
            Self::ResidualTask { .. } => "residual_task",
        }
    }
}

/// Looks up containers, folding "not found" into `None`.
pub struct ContainerDelegate {
    executor: Arc<dyn ExecutorClient>,
}

impl ContainerDelegate {
    pub fn new(executor: Arc<dyn ExecutorClient>) -> Self {
        Self { executor }
    }

    pub async fn get_container(&self, guid: &str) -> Result<Option<Container>, ExecutorError> {
        match self.executor.get_container(guid).await {
            Ok(container) => Ok(Some(container)),
            Err(ExecutorError::ContainerNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Collaborators shared by every operation.
pub struct OperationContext {
    bbs: Arc<dyn BbsClient>,
    containers: ContainerDelegate,
    lrp_processor: Arc<dyn LrpProcessor>,
    task_processor: Arc<dyn TaskProcessor>,
}

impl OperationContext {
    pub fn new(
        bbs: Arc<dyn BbsClient>,
        executor: Arc<dyn ExecutorClient>,
        lrp_processor: Arc<dyn LrpProcessor>,
        task_processor: Arc<dyn TaskProcessor>,
    ) -> Self {
        Self {
            bbs,
            containers: ContainerDelegate::new(executor),
            lrp_processor,
            task_processor,
        }
    }

    async fn execute(&self, kind: &OperationKind) {
        debug!("Starting operation");

        match kind {
            OperationKind::Container { guid } => self.process_container(guid).await,
            OperationKind::ResidualInstanceLrp {
                lrp_key,
                instance_key,
            } => {
                if self.container_missing(&kind.key()).await {
                    self.remove_instance(lrp_key, instance_key).await;
                }
            }
            OperationKind::ResidualEvacuatingLrp {
                lrp_key,
                instance_key,
            } => {
                if self.container_missing(&kind.key()).await {
                    self.remove_evacuating(lrp_key, instance_key).await;
                }
            }
            OperationKind::ResidualJointLrp {
                lrp_key,
                instance_key,
            } => {
                if self.container_missing(&kind.key()).await {
                    self.remove_instance(lrp_key, instance_key).await;
                    self.remove_evacuating(lrp_key, instance_key).await;
                }
            }
            OperationKind::ResidualTask { task_guid } => {
                if self.container_missing(task_guid).await {
                    let result = self
                        .bbs
                        .fail_task(task_guid, TASK_COMPLETION_REASON_MISSING_CONTAINER)
                        .await;
                    log_correction("fail_task", result);
                }
            }
        }

        debug!("Finished operation");
    }

    async fn process_container(&self, guid: &str) {
        let container = match self.containers.get_container(guid).await {
            Ok(Some(container)) => container,
            Ok(None) => {
                info!("Skipped, container does not exist");
                return;
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch container");
                return;
            }
        };

        match Lifecycle::of(&container) {
            Lifecycle::Lrp => self.lrp_processor.process(container).await,
            Lifecycle::Task => self.task_processor.process(container).await,
            Lifecycle::Unknown => {
                error!(
                    container_state = ?container.state,
                    lifecycle = container.tag(LIFECYCLE_TAG).unwrap_or_default(),
                    "Cannot process container with unknown lifecycle"
                );
            }
        }
    }

    /// True only when the executor positively reports the container absent.
    async fn container_missing(&self, guid: &str) -> bool {
        match self.containers.get_container(guid).await {
            Ok(None) => true,
            Ok(Some(_)) => {
                info!("Skipped, container exists");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to fetch container, skipping");
                false
            }
        }
    }

    async fn remove_instance(&self, lrp_key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) {
        let result = self
            .bbs
            .remove_actual_lrp(&lrp_key.process_guid, lrp_key.index, Some(instance_key))
            .await;
        log_correction("remove_actual_lrp", result);
    }

    async fn remove_evacuating(&self, lrp_key: &ActualLrpKey, instance_key: &ActualLrpInstanceKey) {
        let result = self
            .bbs
            .remove_evacuating_actual_lrp(lrp_key, instance_key)
            .await;
        log_correction("remove_evacuating_actual_lrp", result);
    }
}

fn log_correction(action: &'static str, result: Result<(), BbsError>) {
    match result {
        Ok(()) => info!(action, "Corrected BBS record"),
        Err(e) if e.is_not_found() => debug!(action, "BBS record already gone"),
        Err(e) => error!(action, error = %e, "Failed to correct BBS record"),
    }
}

/// A reconciliation operation bound to its collaborators.
#[derive(Clone)]
pub struct Operation {
    kind: OperationKind,
    ctx: Arc<OperationContext>,
}

impl Operation {
    pub fn new(kind: OperationKind, ctx: Arc<OperationContext>) -> Self {
        Self { kind, ctx }
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("kind", &self.kind).finish()
    }
}

#[async_trait]
impl cell_reconcile::Operation for Operation {
    fn key(&self) -> String {
        self.kind.key()
    }

    async fn execute(&self) {
        let span = info_span!("operation", kind = self.kind.name(), key = %self.kind.key());
        self.ctx.execute(&self.kind).instrument(span).await;
    }
}
