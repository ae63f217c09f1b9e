//! Cell state reported to the scheduler.
//!
//! The scheduler simulates placements against a `CellState` snapshot using the
//! helpers here, so they mirror what the cell itself will accept.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::InsufficientResources;
use crate::rootfs::RootFsProviders;
use crate::work::{Lrp, Resource, Task};

/// Capacity along the three scheduled dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub containers: i32,
}

impl Resources {
    pub fn new(memory_mb: i32, disk_mb: i32, containers: i32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            containers,
        }
    }

    /// Reserve one container's worth of `resource`.
    pub fn subtract(&mut self, resource: &Resource) {
        self.memory_mb = self.memory_mb.saturating_sub(resource.memory_mb);
        self.disk_mb = self.disk_mb.saturating_sub(resource.disk_mb);
        self.containers = self.containers.saturating_sub(1);
    }

    /// Mean fraction used across memory, disk and containers.
    pub fn compute_score(&self, total: &Resources) -> f64 {
        let used = fraction_used(self.memory_mb, total.memory_mb)
            + fraction_used(self.disk_mb, total.disk_mb)
            + fraction_used(self.containers, total.containers);
        used / 3.0
    }
}

// A dimension with no capacity counts as fully used.
fn fraction_used(remaining: i32, total: i32) -> f64 {
    if total <= 0 {
        return 1.0;
    }
    1.0 - f64::from(remaining) / f64::from(total)
}

/// Snapshot of a cell, recomputed on every state request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    #[serde(default)]
    pub cell_id: String,
    #[serde(default)]
    pub root_fs_providers: RootFsProviders,
    pub available_resources: Resources,
    pub total_resources: Resources,
    #[serde(default)]
    pub lrps: Vec<Lrp>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub starting_container_count: i32,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub evacuating: bool,
    #[serde(default)]
    pub volume_drivers: Vec<String>,
    #[serde(default)]
    pub placement_tags: Vec<String>,
    #[serde(default)]
    pub optional_placement_tags: Vec<String>,
}

impl CellState {
    /// Record a tentative LRP placement.
    pub fn add_lrp(&mut self, lrp: &Lrp) {
        self.available_resources.subtract(&lrp.resource);
        self.starting_container_count += 1;
        self.lrps.push(lrp.clone());
    }

    /// Record a tentative task placement.
    pub fn add_task(&mut self, task: &Task) {
        self.available_resources.subtract(&task.resource);
        self.starting_container_count += 1;
        self.tasks.push(task.clone());
    }

    pub fn resource_match(&self, resource: &Resource) -> Result<(), InsufficientResources> {
        let mut problems = Vec::new();
        if self.available_resources.containers < 1 {
            problems.push("containers");
        }
        if self.available_resources.disk_mb < resource.disk_mb {
            problems.push("disk");
        }
        if self.available_resources.memory_mb < resource.memory_mb {
            problems.push("memory");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(InsufficientResources { problems })
        }
    }

    /// Score after placing `resource`; lower is better.
    pub fn compute_score(&self, resource: &Resource, starting_container_weight: f64) -> f64 {
        let mut remaining = self.available_resources;
        remaining.subtract(resource);
        let starting = f64::from(self.starting_container_count) * starting_container_weight;
        remaining.compute_score(&self.total_resources) + starting
    }

    pub fn match_root_fs(&self, root_fs: &str) -> bool {
        self.root_fs_providers.matches_root_fs(root_fs)
    }

    pub fn match_volume_drivers(&self, drivers: &[String]) -> bool {
        drivers.iter().all(|d| self.volume_drivers.contains(d))
    }

    /// Required tags must all be requested, and every requested tag must be
    /// required or optional on this cell.
    pub fn match_placement_tags(&self, desired: &[String]) -> bool {
        let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
        let required: BTreeSet<&str> = self.placement_tags.iter().map(String::as_str).collect();
        let allowed: BTreeSet<&str> = required
            .iter()
            .copied()
            .chain(self.optional_placement_tags.iter().map(String::as_str))
            .collect();

        required.is_subset(&desired) && desired.is_subset(&allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbs::ActualLrpKey;
    use crate::rootfs::StackPathMap;
    use crate::work::PlacementConstraint;

    fn state() -> CellState {
        CellState {
            available_resources: Resources::new(1024, 2048, 4),
            total_resources: Resources::new(2048, 4096, 8),
            ..CellState::default()
        }
    }

    fn tags(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_add_lrp_consumes_resources() {
        let mut state = state();
        let lrp = Lrp::new(
            ActualLrpKey::new("pg", 0, "d"),
            Resource::new(256, 512, 0),
            PlacementConstraint::default(),
        );

        state.add_lrp(&lrp);

        assert_eq!(state.available_resources, Resources::new(768, 1536, 3));
        assert_eq!(state.starting_container_count, 1);
        assert_eq!(state.lrps, vec![lrp]);
    }

    #[test]
    fn test_subtract_saturates_on_extreme_values() {
        let mut remaining = Resources::new(1024, i32::MIN, i32::MIN);

        remaining.subtract(&Resource::new(i32::MIN, 1, 0));

        assert_eq!(remaining, Resources::new(i32::MAX, i32::MIN, i32::MIN));
    }

    #[test]
    fn test_add_task_consumes_resources() {
        let mut state = state();
        let task = Task::new("tg", "d", Resource::new(24, 48, 0), PlacementConstraint::default());

        state.add_task(&task);

        assert_eq!(state.available_resources, Resources::new(1000, 2000, 3));
        assert_eq!(state.starting_container_count, 1);
        assert_eq!(state.tasks.len(), 1);
    }

    #[test]
    fn test_resource_match() {
        let state = state();
        assert!(state.resource_match(&Resource::new(1024, 2048, 0)).is_ok());

        let err = state.resource_match(&Resource::new(4096, 4096, 0)).unwrap_err();
        assert_eq!(err.problems, vec!["disk", "memory"]);
        assert_eq!(err.to_string(), "insufficient resources: disk, memory");
    }

    #[test]
    fn test_resource_match_no_containers() {
        let mut state = state();
        state.available_resources.containers = 0;

        let err = state.resource_match(&Resource::new(1, 1, 0)).unwrap_err();
        assert_eq!(err.to_string(), "insufficient resources: containers");
    }

    #[test]
    fn test_compute_score() {
        let state = state();
        // After placing: 512/2048, 1024/4096, 3/8 remaining.
        let score = state.compute_score(&Resource::new(512, 1024, 0), 0.25);
        let expected = ((1.0 - 0.25) + (1.0 - 0.25) + (1.0 - 0.375)) / 3.0;
        assert!((score - expected).abs() < 1e-9);

        let mut busy = state.clone();
        busy.starting_container_count = 2;
        let busy_score = busy.compute_score(&Resource::new(512, 1024, 0), 0.25);
        assert!((busy_score - (expected + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_score_with_zero_capacity() {
        let empty = Resources::default();
        assert_eq!(empty.compute_score(&Resources::default()), 1.0);
    }

    #[test]
    fn test_match_root_fs() {
        let mut state = state();
        state.root_fs_providers =
            RootFsProviders::new(&StackPathMap::from_iter([("linux", "/p")]), ["docker"]);

        assert!(state.match_root_fs("preloaded:linux"));
        assert!(state.match_root_fs("docker:///busybox"));
        assert!(!state.match_root_fs("preloaded:windows"));
    }

    #[test]
    fn test_match_volume_drivers() {
        let mut state = state();
        state.volume_drivers = tags(&["nfs", "smb"]);

        assert!(state.match_volume_drivers(&[]));
        assert!(state.match_volume_drivers(&tags(&["nfs"])));
        assert!(!state.match_volume_drivers(&tags(&["nfs", "ceph"])));
    }

    #[test]
    fn test_match_placement_tags() {
        let mut state = state();
        state.placement_tags = tags(&["red"]);
        state.optional_placement_tags = tags(&["blue"]);

        assert!(state.match_placement_tags(&tags(&["red"])));
        assert!(state.match_placement_tags(&tags(&["red", "blue"])));
        assert!(!state.match_placement_tags(&tags(&["blue"])));
        assert!(!state.match_placement_tags(&tags(&["red", "green"])));
        assert!(!state.match_placement_tags(&[]));
    }

    #[test]
    fn test_untagged_cell_accepts_only_untagged_work() {
        let state = state();
        assert!(state.match_placement_tags(&[]));
        assert!(!state.match_placement_tags(&tags(&["red"])));
    }
}
