//! Errors surfaced by whole-call rep operations.

use thiserror::Error;

use crate::client::{BbsError, ExecutorError};

/// A state, perform or batch call failed as a whole.
///
/// Per-item failures never appear here; they travel inside the call's result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Bbs(#[from] BbsError),
}
