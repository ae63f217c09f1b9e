//! Error types for the cell data model.

use thiserror::Error;

/// Errors parsing preloaded stack entries of the form `stack:path`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackPathMapError {
    /// The entry has no `:` separator.
    #[error("invalid preloaded rootfs entry {0:?}: expected stack:path")]
    InvalidEntry(String),

    /// The stack name is blank.
    #[error("invalid preloaded rootfs entry {0:?}: stack name is blank")]
    BlankStack(String),

    /// The filesystem path is blank.
    #[error("invalid preloaded rootfs entry {0:?}: path is blank")]
    BlankPath(String),
}

/// Errors resolving a RootFS URL to an executor path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RootFsError {
    /// The URL could not be parsed.
    #[error("malformed rootfs url {url:?}: {reason}")]
    Malformed { url: String, reason: String },

    /// The URL names a preloaded stack this cell does not carry.
    #[error("preloaded rootfs {stack:?} not found on this cell")]
    PreloadedNotFound { stack: String },
}

/// Errors recovering BBS keys from container tags.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    /// The container carries no tags at all.
    #[error("container has no tags")]
    MissingTags,

    /// The process index tag is absent or not an integer.
    #[error("invalid process index {0:?}")]
    InvalidProcessIndex(String),

    /// The recovered key failed validation.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// The cell cannot fit a requested resource.
///
/// `problems` holds any of `containers`, `disk` and `memory`, sorted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("insufficient resources: {}", .problems.join(", "))]
pub struct InsufficientResources {
    pub problems: Vec<&'static str>,
}
