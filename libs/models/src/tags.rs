//! Container tag contract.
//!
//! The rep writes these tags when allocating a container and reads them back
//! when reporting state or reconciling. Keys and lifecycle values must round
//! trip exactly.

use crate::bbs::{ActualLrpInstanceKey, ActualLrpKey};
use crate::error::TagError;
use crate::executor::{Container, Tags};

pub const LIFECYCLE_TAG: &str = "lifecycle";
pub const RESULT_FILE_TAG: &str = "result-file";
pub const DOMAIN_TAG: &str = "domain";

pub const TASK_LIFECYCLE: &str = "task";
pub const LRP_LIFECYCLE: &str = "lrp";

pub const PROCESS_GUID_TAG: &str = "process-guid";
pub const INSTANCE_GUID_TAG: &str = "instance-guid";
pub const PROCESS_INDEX_TAG: &str = "process-index";

/// Which processor owns a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Lrp,
    Task,
    /// Missing or unrecognized lifecycle tag.
    Unknown,
}

impl Lifecycle {
    pub fn from_tags(tags: Option<&Tags>) -> Self {
        match tags.and_then(|t| t.get(LIFECYCLE_TAG)).map(String::as_str) {
            Some(LRP_LIFECYCLE) => Self::Lrp,
            Some(TASK_LIFECYCLE) => Self::Task,
            _ => Self::Unknown,
        }
    }

    pub fn of(container: &Container) -> Self {
        Self::from_tags(container.tags.as_ref())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lrp => LRP_LIFECYCLE,
            Self::Task => TASK_LIFECYCLE,
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Container guid for an LRP instance.
///
/// The instance guid alone identifies the container; the process guid travels
/// in the `process-guid` tag.
pub fn lrp_container_guid(_process_guid: &str, instance_guid: &str) -> String {
    instance_guid.to_string()
}

/// Tags written on an LRP container at allocation time.
pub fn lrp_tags(key: &ActualLrpKey, instance_guid: &str) -> Tags {
    Tags::from([
        (LIFECYCLE_TAG.to_string(), LRP_LIFECYCLE.to_string()),
        (DOMAIN_TAG.to_string(), key.domain.clone()),
        (PROCESS_GUID_TAG.to_string(), key.process_guid.clone()),
        (INSTANCE_GUID_TAG.to_string(), instance_guid.to_string()),
        (PROCESS_INDEX_TAG.to_string(), key.index.to_string()),
    ])
}

/// Tags written on a task container at allocation time.
pub fn task_tags(domain: &str) -> Tags {
    Tags::from([
        (LIFECYCLE_TAG.to_string(), TASK_LIFECYCLE.to_string()),
        (DOMAIN_TAG.to_string(), domain.to_string()),
    ])
}

/// Recover the actual LRP key from an LRP container's tags.
pub fn actual_lrp_key_from_tags(tags: Option<&Tags>) -> Result<ActualLrpKey, TagError> {
    let tags = match tags {
        Some(tags) if !tags.is_empty() => tags,
        _ => return Err(TagError::MissingTags),
    };

    let raw_index = tags.get(PROCESS_INDEX_TAG).cloned().unwrap_or_default();
    let index: i32 = raw_index
        .parse()
        .map_err(|_| TagError::InvalidProcessIndex(raw_index.clone()))?;

    let key = ActualLrpKey::new(
        tags.get(PROCESS_GUID_TAG).cloned().unwrap_or_default(),
        index,
        tags.get(DOMAIN_TAG).cloned().unwrap_or_default(),
    );
    key.validate().map_err(TagError::InvalidKey)?;

    Ok(key)
}

/// Recover the instance key of an LRP container on `cell_id`.
pub fn actual_lrp_instance_key_from_container(
    container: &Container,
    cell_id: &str,
) -> Result<ActualLrpInstanceKey, TagError> {
    let tags = match container.tags.as_ref() {
        Some(tags) if !tags.is_empty() => tags,
        _ => return Err(TagError::MissingTags),
    };

    let key = ActualLrpInstanceKey::new(
        tags.get(INSTANCE_GUID_TAG).cloned().unwrap_or_default(),
        cell_id,
    );
    key.validate().map_err(TagError::InvalidKey)?;

    Ok(key)
}
