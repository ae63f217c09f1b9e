//! Cell rep library.
//!
//! The rep runs on every cell. It places work handed to it by the scheduler
//! and keeps the BBS consistent with the containers actually present here.
//!
//! ## Architecture
//!
//! - **Auction cell client**: reports cell state and reserves containers for placed work
//! - **Generator**: diffs BBS records against executor containers into keyed operations
//! - **Operations**: idempotent corrective units, one guid each
//! - **Harmonizer**: bulk and event-driven loops feeding the operation queue
//! - **Evacuation**: the switch that stops new placements while the cell drains

pub mod api;
pub mod auction_cell;
pub mod client;
pub mod config;
pub mod error;
pub mod evacuation;
pub mod generator;
pub mod harmonizer;
pub mod operation;

pub use auction_cell::{AuctionCellClient, AuctionCellConfig};
pub use error::RepError;
pub use evacuation::{evacuation_context, Evacuatable, EvacuationNotifier, EvacuationReporter};
pub use generator::Generator;
pub use operation::{Operation, OperationKind};
