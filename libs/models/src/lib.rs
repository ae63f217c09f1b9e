//! # cell-models
//!
//! Data model shared by the cell rep and its collaborators.
//!
//! ## Record Families
//!
//! - Auction work (`Work`, `Lrp`, `Task`) handed to the cell by the scheduler
//! - Cell state (`CellState`, `Resources`) reported back for scheduling
//! - BBS records (`bbs::*`) describing desired and actual state cluster-wide
//! - Executor records (`executor::*`) describing the containers on this cell
//!
//! ## Wire Contracts
//!
//! Container tags (`tags`) are the only channel carrying ownership metadata
//! through the executor's opaque container record. RootFS URLs (`rootfs`) are
//! resolved against the cell's preloaded stacks before allocation.

pub mod bbs;
mod cell_state;
mod error;
pub mod executor;
pub mod rootfs;
pub mod tags;
mod work;

pub use cell_state::{CellState, Resources};
pub use error::{InsufficientResources, RootFsError, StackPathMapError, TagError};
pub use rootfs::{path_for_root_fs, RootFsProvider, RootFsProviders, StackPathMap};
pub use tags::Lifecycle;
pub use work::{Lrp, PlacementConstraint, Resource, Task, Work};
