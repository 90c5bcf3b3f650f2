//! Error types for calendar resources.

use thiserror::Error;

use crate::settings::ResourceId;

/// Errors that can occur in resource operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Resource is not configured")]
    NotConfigured,

    #[error("Resource is closed")]
    Closed,

    #[error("Resource is not enabled for any alarm type")]
    Disabled,

    #[error("Resource is read-only")]
    ReadOnly,

    #[error("Calendar is not in the current format")]
    IncompatibleFormat,

    #[error("Previous load/save still in progress")]
    InProgress,

    #[error("Calendar has not been loaded")]
    NotLoaded,

    #[error("Could not create calendar file {path}: {reason}")]
    CreateFailed { path: String, reason: String },

    #[error("Could not load file: {0}")]
    LoadFailed(String),

    #[error("Could not save file: {0}")]
    SaveFailed(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Location is already used by another resource: {0}")]
    DuplicateUrl(String),

    #[error("Invalid resource settings: {0}")]
    InvalidSettings(String),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Event already exists: {0}")]
    DuplicateEvent(String),

    #[error("No such resource: {0}")]
    UnknownResource(ResourceId),

    #[error("Calendar is already in the current format")]
    AlreadyCurrent,

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
