//! Executor records: containers on this cell and the events describing them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cell_state::Resources;

/// Ownership metadata attached to a container.
pub type Tags = BTreeMap<String, String>;

/// Container lifecycle state as reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    #[default]
    Invalid,
    Reserved,
    Initializing,
    Created,
    Running,
    Completed,
}

impl ContainerState {
    /// Containers that hold a reservation but are not yet running.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Reserved | Self::Initializing | Self::Created)
    }
}

/// Resources allocated to a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorResource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    #[serde(default)]
    pub max_pids: i32,
    #[serde(default)]
    pub root_fs_path: String,
}

impl ExecutorResource {
    pub fn new(memory_mb: i32, disk_mb: i32, max_pids: i32, root_fs_path: impl Into<String>) -> Self {
        Self {
            memory_mb,
            disk_mb,
            max_pids,
            root_fs_path: root_fs_path.into(),
        }
    }
}

/// A container known to the executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub guid: String,
    #[serde(flatten)]
    pub resource: ExecutorResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    #[serde(default)]
    pub state: ContainerState,
}

impl Container {
    pub fn new(guid: impl Into<String>, state: ContainerState) -> Self {
        Self {
            guid: guid.into(),
            state,
            ..Self::default()
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_resource(mut self, resource: ExecutorResource) -> Self {
        self.resource = resource;
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key).map(String::as_str)
    }
}

/// Aggregate capacity figures reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorResources {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub containers: i32,
}

impl ExecutorResources {
    pub fn new(memory_mb: i32, disk_mb: i32, containers: i32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            containers,
        }
    }
}

impl From<ExecutorResources> for Resources {
    fn from(r: ExecutorResources) -> Self {
        Resources::new(r.memory_mb, r.disk_mb, r.containers)
    }
}

/// A request to reserve a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub guid: String,
    pub resource: ExecutorResource,
    #[serde(default)]
    pub tags: Tags,
}

impl AllocationRequest {
    pub fn new(guid: impl Into<String>, resource: ExecutorResource, tags: Tags) -> Self {
        Self {
            guid: guid.into(),
            resource,
            tags,
        }
    }
}

/// An allocation request the executor declined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationFailure {
    pub request: AllocationRequest,
    pub error_msg: String,
}

impl AllocationFailure {
    pub fn new(request: AllocationRequest, error_msg: impl Into<String>) -> Self {
        Self {
            request,
            error_msg: error_msg.into(),
        }
    }
}

/// An event published on the executor's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    ContainerReserved { container: Container },
    ContainerRunning { container: Container },
    ContainerComplete { container: Container },
    #[serde(other)]
    Unknown,
}

impl Event {
    /// The container of a lifecycle event; `None` for anything else.
    pub fn lifecycle_container(&self) -> Option<&Container> {
        match self {
            Self::ContainerReserved { container }
            | Self::ContainerRunning { container }
            | Self::ContainerComplete { container } => Some(container),
            Self::Unknown => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContainerReserved { .. } => "container_reserved",
            Self::ContainerRunning { .. } => "container_running",
            Self::ContainerComplete { .. } => "container_complete",
            Self::Unknown => "unknown",
        }
    }
}
