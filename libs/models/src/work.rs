//! Auction work assigned to this cell by the scheduler.

use serde::{Deserialize, Serialize};

use crate::bbs::ActualLrpKey;

/// Resources requested by a single LRP instance or task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub memory_mb: i32,
    pub disk_mb: i32,
    #[serde(default)]
    pub max_pids: i32,
}

impl Resource {
    pub fn new(memory_mb: i32, disk_mb: i32, max_pids: i32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            max_pids,
        }
    }

    /// Negative memory or disk requests are never valid.
    pub fn valid(&self) -> bool {
        self.memory_mb >= 0 && self.disk_mb >= 0
    }
}

/// Where a piece of work is allowed to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    #[serde(default)]
    pub root_fs: String,
    #[serde(default)]
    pub placement_tags: Vec<String>,
    #[serde(default)]
    pub volume_drivers: Vec<String>,
}

impl PlacementConstraint {
    pub fn new(
        root_fs: impl Into<String>,
        placement_tags: Vec<String>,
        volume_drivers: Vec<String>,
    ) -> Self {
        Self {
            root_fs: root_fs.into(),
            placement_tags,
            volume_drivers,
        }
    }

    pub fn valid(&self) -> bool {
        !self.root_fs.is_empty()
    }
}

/// A long-running process instance placed on this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lrp {
    #[serde(flatten)]
    pub key: ActualLrpKey,
    #[serde(flatten)]
    pub placement_constraint: PlacementConstraint,
    #[serde(flatten)]
    pub resource: Resource,
}

impl Lrp {
    pub fn new(
        key: ActualLrpKey,
        resource: Resource,
        placement_constraint: PlacementConstraint,
    ) -> Self {
        Self {
            key,
            placement_constraint,
            resource,
        }
    }

    /// Human-readable identity used in logs: `process_guid.index`.
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.key.process_guid, self.key.index)
    }
}

/// A one-shot task placed on this cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_guid: String,
    pub domain: String,
    #[serde(flatten)]
    pub placement_constraint: PlacementConstraint,
    #[serde(flatten)]
    pub resource: Resource,
}

impl Task {
    pub fn new(
        task_guid: impl Into<String>,
        domain: impl Into<String>,
        resource: Resource,
        placement_constraint: PlacementConstraint,
    ) -> Self {
        Self {
            task_guid: task_guid.into(),
            domain: domain.into(),
            placement_constraint,
            resource,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.task_guid
    }
}

/// Placement requests handed to one `perform` call, or the subset that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    #[serde(default)]
    pub lrps: Vec<Lrp>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Work {
    pub fn is_empty(&self) -> bool {
        self.lrps.is_empty() && self.tasks.is_empty()
    }
}
