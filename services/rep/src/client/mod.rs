//! Ports to the rep's collaborators.
//!
//! - `ExecutorClient`: containers on this cell and their event stream
//! - `BbsClient`: the cluster's actual LRP and task records
//! - `LrpProcessor` / `TaskProcessor`: drive a single container's lifecycle
//! - `GuidGenerator`: instance guids for new LRP placements
//!
//! `HttpExecutorClient` and `HttpBbsClient` implement the first two over
//! JSON/HTTP.

mod bbs;
mod executor;

use async_trait::async_trait;
use cell_models::bbs::{ActualLrpFilter, ActualLrpGroup, ActualLrpInstanceKey, ActualLrpKey, Task};
use cell_models::executor::{
    AllocationFailure, AllocationRequest, Container, Event, ExecutorResources,
};
use thiserror::Error;

pub use bbs::HttpBbsClient;
pub use executor::HttpExecutorClient;

/// Errors from the executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// No container with this guid exists on the cell.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// The request never completed (connection, timeout).
    #[error("executor request failed: {0}")]
    Request(String),

    /// The executor answered with a non-success status.
    #[error("executor returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("invalid executor response: {0}")]
    Decode(String),

    /// The event stream ended.
    #[error("event stream closed")]
    StreamClosed,
}

/// Errors from the BBS.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BbsError {
    /// The record does not exist (already removed or never written).
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The request never completed (connection, timeout).
    #[error("bbs request failed: {0}")]
    Request(String),

    /// The BBS answered with a non-success status.
    #[error("bbs returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("invalid bbs response: {0}")]
    Decode(String),
}

impl BbsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }
}

/// Guid generation failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to generate guid: {0}")]
pub struct GuidError(pub String);

/// Local container lifecycle manager.
#[async_trait]
pub trait ExecutorClient: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<Container>, ExecutorError>;

    /// Fails with `ContainerNotFound` when the guid is unknown.
    async fn get_container(&self, guid: &str) -> Result<Container, ExecutorError>;

    /// Reserve containers; the returned failures are the requests declined.
    async fn allocate_containers(
        &self,
        requests: Vec<AllocationRequest>,
    ) -> Result<Vec<AllocationFailure>, ExecutorError>;

    async fn total_resources(&self) -> Result<ExecutorResources, ExecutorError>;

    async fn remaining_resources(&self) -> Result<ExecutorResources, ExecutorError>;

    async fn volume_drivers(&self) -> Result<Vec<String>, ExecutorError>;

    async fn healthy(&self) -> bool;

    async fn subscribe_to_events(&self) -> Result<Box<dyn EventSource>, ExecutorError>;
}

/// A subscription to executor events.
#[async_trait]
pub trait EventSource: Send {
    /// Next event. Any error, including a deliberate close, ends the stream.
    async fn next(&mut self) -> Result<Event, ExecutorError>;

    fn close(&mut self);
}

/// Cluster-wide desired and actual state store.
#[async_trait]
pub trait BbsClient: Send + Sync {
    async fn actual_lrp_groups(
        &self,
        filter: &ActualLrpFilter,
    ) -> Result<Vec<ActualLrpGroup>, BbsError>;

    async fn tasks_by_cell_id(&self, cell_id: &str) -> Result<Vec<Task>, BbsError>;

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task, BbsError>;

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<(), BbsError>;

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(), BbsError>;

    async fn fail_task(&self, task_guid: &str, reason: &str) -> Result<(), BbsError>;
}

/// Drives an LRP container through its lifecycle.
#[async_trait]
pub trait LrpProcessor: Send + Sync {
    async fn process(&self, container: Container);
}

/// Drives a task container through its lifecycle.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, container: Container);
}

/// Source of fresh instance guids.
pub trait GuidGenerator: Send + Sync {
    fn generate_guid(&self) -> Result<String, GuidError>;
}

/// Random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl GuidGenerator for UuidGenerator {
    fn generate_guid(&self) -> Result<String, GuidError> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
