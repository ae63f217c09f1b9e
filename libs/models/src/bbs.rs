//! BBS records: the cluster's durable view of actual LRPs and tasks.

use serde::{Deserialize, Serialize};

/// Reason recorded when a task's container disappears from its cell.
pub const TASK_COMPLETION_REASON_MISSING_CONTAINER: &str = "task container does not exist";

/// Identity of one LRP instance slot: `(process_guid, index)` within a domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActualLrpKey {
    pub process_guid: String,
    pub index: i32,
    pub domain: String,
}

impl ActualLrpKey {
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.process_guid.is_empty() {
            return Err("process_guid is blank".to_string());
        }
        if self.domain.is_empty() {
            return Err("domain is blank".to_string());
        }
        if self.index < 0 {
            return Err(format!("index {} is negative", self.index));
        }
        Ok(())
    }
}

/// Identity of the container backing an LRP instance on a specific cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActualLrpInstanceKey {
    pub instance_guid: String,
    pub cell_id: String,
}

impl ActualLrpInstanceKey {
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.instance_guid.is_empty() {
            return Err("instance_guid is blank".to_string());
        }
        if self.cell_id.is_empty() {
            return Err("cell_id is blank".to_string());
        }
        Ok(())
    }
}

/// Lifecycle state of an actual LRP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualLrpState {
    #[default]
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

/// An actual LRP record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrp {
    #[serde(flatten)]
    pub key: ActualLrpKey,
    #[serde(flatten)]
    pub instance_key: ActualLrpInstanceKey,
    #[serde(default)]
    pub state: ActualLrpState,
}

impl ActualLrp {
    pub fn new(key: ActualLrpKey, instance_key: ActualLrpInstanceKey, state: ActualLrpState) -> Self {
        Self {
            key,
            instance_key,
            state,
        }
    }
}

/// The instance and evacuating copies of one LRP slot.
///
/// During evacuation the BBS keeps the old placement as the evacuating copy
/// while a replacement instance is started elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<ActualLrp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evacuating: Option<ActualLrp>,
}

/// Filter for listing actual LRP groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActualLrpFilter {
    pub cell_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl ActualLrpFilter {
    pub fn for_cell(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            domain: None,
        }
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Completed,
    Resolving,
}

/// A task record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_guid: String,
    pub domain: String,
    #[serde(default)]
    pub cell_id: String,
    #[serde(default)]
    pub state: TaskState,
}

impl Task {
    pub fn new(
        task_guid: impl Into<String>,
        domain: impl Into<String>,
        cell_id: impl Into<String>,
        state: TaskState,
    ) -> Self {
        Self {
            task_guid: task_guid.into(),
            domain: domain.into(),
            cell_id: cell_id.into(),
            state,
        }
    }
}
