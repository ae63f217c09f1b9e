//! Auction cell client.
//!
//! The scheduler's view of this cell:
//! - `state` reports capacity, resident work and health for placement decisions
//! - `perform` turns placed work into executor container reservations
//!
//! While the cell evacuates, `perform` hands every item back as failed so the
//! scheduler places it elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use cell_models::executor::{AllocationRequest, ExecutorResource};
use cell_models::tags::{self, Lifecycle, DOMAIN_TAG};
use cell_models::{
    path_for_root_fs, CellState, Lrp, PlacementConstraint, Resource, RootFsError,
    RootFsProviders, StackPathMap, Task, Work,
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ExecutorClient, GuidError, GuidGenerator};
use crate::error::RepError;
use crate::evacuation::EvacuationReporter;

/// Static configuration of the auction cell client.
#[derive(Debug, Clone, Default)]
pub struct AuctionCellConfig {
    /// Identifier of this cell.
    pub cell_id: String,

    /// Availability zone reported to the scheduler.
    pub zone: String,

    /// Preloaded stacks carried by this cell.
    pub stack_path_map: StackPathMap,

    /// RootFS schemes accepted with any URL (e.g. `docker`).
    pub arbitrary_root_fs_schemes: Vec<String>,

    /// Tags every placement on this cell must request.
    pub placement_tags: Vec<String>,

    /// Tags a placement may additionally request.
    pub optional_placement_tags: Vec<String>,
}

/// Why a single work item could not become an allocation request.
#[derive(Debug, Error)]
enum RequestError {
    #[error(transparent)]
    Guid(#[from] GuidError),

    #[error(transparent)]
    RootFs(#[from] RootFsError),
}

/// Scheduler-facing client of this cell.
pub struct AuctionCellClient {
    config: AuctionCellConfig,
    root_fs_providers: RootFsProviders,
    executor: Arc<dyn ExecutorClient>,
    guids: Arc<dyn GuidGenerator>,
    evacuation: EvacuationReporter,
}

impl AuctionCellClient {
    pub fn new(
        config: AuctionCellConfig,
        executor: Arc<dyn ExecutorClient>,
        guids: Arc<dyn GuidGenerator>,
        evacuation: EvacuationReporter,
    ) -> Self {
        let root_fs_providers = RootFsProviders::new(
            &config.stack_path_map,
            config.arbitrary_root_fs_schemes.iter().cloned(),
        );

        Self {
            config,
            root_fs_providers,
            executor,
            guids,
            evacuation,
        }
    }

    pub fn cell_id(&self) -> &str {
        &self.config.cell_id
    }

    pub async fn healthy(&self) -> bool {
        self.executor.healthy().await
    }

    /// Snapshot the cell for the scheduler.
    ///
    /// Returns the state together with the executor health flag. An unhealthy
    /// executor does not fail the call; any executor query error does.
    #[instrument(skip(self), fields(cell_id = %self.config.cell_id))]
    pub async fn state(&self) -> Result<(CellState, bool), RepError> {
        info!("Providing cell state");

        let healthy = self.executor.healthy().await;
        if !healthy {
            error!("Executor failed health check");
        }

        let total_resources = self.executor.total_resources().await?;
        let available_resources = self.executor.remaining_resources().await?;
        let containers = self.executor.list_containers().await?;
        let volume_drivers = self.executor.volume_drivers().await?;

        let mut lrps = Vec::new();
        let mut tasks = Vec::new();
        let mut starting_container_count = 0;

        for container in &containers {
            if container.state.is_starting() {
                starting_container_count += 1;
            }

            let resource = Resource::new(container.resource.memory_mb, container.resource.disk_mb, 0);

            match Lifecycle::of(container) {
                Lifecycle::Lrp => match tags::actual_lrp_key_from_tags(container.tags.as_ref()) {
                    Ok(key) => lrps.push(Lrp::new(key, resource, PlacementConstraint::default())),
                    Err(e) => {
                        warn!(container_guid = %container.guid, error = %e, "Skipping LRP container with invalid tags");
                    }
                },
                Lifecycle::Task => tasks.push(Task::new(
                    container.guid.clone(),
                    container.tag(DOMAIN_TAG).unwrap_or_default(),
                    resource,
                    PlacementConstraint::default(),
                )),
                Lifecycle::Unknown => {}
            }
        }

        let state = CellState {
            cell_id: self.config.cell_id.clone(),
            root_fs_providers: self.root_fs_providers.clone(),
            available_resources: available_resources.into(),
            total_resources: total_resources.into(),
            lrps,
            tasks,
            starting_container_count,
            zone: self.config.zone.clone(),
            evacuating: self.evacuation.evacuating(),
            volume_drivers,
            placement_tags: self.config.placement_tags.clone(),
            optional_placement_tags: self.config.optional_placement_tags.clone(),
        };

        info!(
            lrps = state.lrps.len(),
            tasks = state.tasks.len(),
            starting = state.starting_container_count,
            evacuating = state.evacuating,
            healthy,
            "Provided cell state"
        );

        Ok((state, healthy))
    }

    /// Reserve containers for placed work.
    ///
    /// Returns the work that could not be placed. Items fail individually on
    /// guid generation, RootFS resolution or executor rejection; an error
    /// means the allocation call itself failed.
    #[instrument(skip(self, work), fields(cell_id = %self.config.cell_id, lrps = work.lrps.len(), tasks = work.tasks.len()))]
    pub async fn perform(&self, work: Work) -> Result<Work, RepError> {
        if self.evacuation.evacuating() {
            info!("Cell is evacuating, rejecting work");
            return Ok(work);
        }

        let mut failed = Work::default();
        let mut requests = Vec::with_capacity(work.lrps.len() + work.tasks.len());
        let mut lrps_by_guid: HashMap<String, Lrp> = HashMap::new();
        let mut tasks_by_guid: HashMap<String, Task> = HashMap::new();

        for lrp in work.lrps {
            match self.lrp_allocation_request(&lrp) {
                Ok(request) => {
                    lrps_by_guid.insert(request.guid.clone(), lrp);
                    requests.push(request);
                }
                Err(e) => {
                    warn!(lrp = %lrp.identifier(), error = %e, "Failed to build LRP allocation request");
                    failed.lrps.push(lrp);
                }
            }
        }

        for task in work.tasks {
            match self.task_allocation_request(&task) {
                Ok(request) => {
                    tasks_by_guid.insert(request.guid.clone(), task);
                    requests.push(request);
                }
                Err(e) => {
                    warn!(task_guid = %task.task_guid, error = %e, "Failed to build task allocation request");
                    failed.tasks.push(task);
                }
            }
        }

        if requests.is_empty() {
            return Ok(failed);
        }

        debug!(count = requests.len(), "Requesting container allocation");
        let failures = self.executor.allocate_containers(requests).await.map_err(|e| {
            error!(error = %e, "Failed to allocate containers");
            e
        })?;

        for failure in failures {
            let guid = &failure.request.guid;
            if let Some(lrp) = lrps_by_guid.remove(guid) {
                warn!(lrp = %lrp.identifier(), error = %failure.error_msg, "Executor declined LRP container");
                failed.lrps.push(lrp);
            } else if let Some(task) = tasks_by_guid.remove(guid) {
                warn!(task_guid = %task.task_guid, error = %failure.error_msg, "Executor declined task container");
                failed.tasks.push(task);
            } else {
                warn!(container_guid = %guid, "Allocation failure for unrequested container");
            }
        }

        info!(
            failed_lrps = failed.lrps.len(),
            failed_tasks = failed.tasks.len(),
            "Performed work"
        );

        Ok(failed)
    }

    fn lrp_allocation_request(&self, lrp: &Lrp) -> Result<AllocationRequest, RequestError> {
        let instance_guid = self.guids.generate_guid()?;
        let root_fs_path =
            path_for_root_fs(&lrp.placement_constraint.root_fs, &self.config.stack_path_map)?;

        Ok(AllocationRequest::new(
            tags::lrp_container_guid(&lrp.key.process_guid, &instance_guid),
            executor_resource(&lrp.resource, root_fs_path),
            tags::lrp_tags(&lrp.key, &instance_guid),
        ))
    }

    fn task_allocation_request(&self, task: &Task) -> Result<AllocationRequest, RequestError> {
        let root_fs_path =
            path_for_root_fs(&task.placement_constraint.root_fs, &self.config.stack_path_map)?;

        Ok(AllocationRequest::new(
            task.task_guid.clone(),
            executor_resource(&task.resource, root_fs_path),
            tags::task_tags(&task.domain),
        ))
    }
}

fn executor_resource(resource: &Resource, root_fs_path: String) -> ExecutorResource {
    ExecutorResource::new(
        resource.memory_mb,
        resource.disk_mb,
        resource.max_pids,
        root_fs_path,
    )
}
