//! File-backed calendar resources for alarm scheduling.
//!
//! A resource keeps an in-memory cache of alarm events in step with one
//! calendar file, local or remote:
//! - `resource` holds the load/save protocol and the single-file backend
//! - `settings` and `config` hold per-resource and engine-wide configuration
//! - `resources` is the registry that drives completions and hands out
//!   notifications
//! - `ResourceEngine` ties them together

pub mod config;
pub mod constants;
mod context;
pub mod error;
pub mod event;
pub mod event_loop;
pub mod format;
pub mod ics;
pub mod location;
pub mod notification;
pub mod resource;
pub mod resources;
pub mod settings;
pub mod transport;
pub mod utils;
mod watcher;

pub use config::{ConfigManager, EngineConfig, NewResource, RemovalTicket, StandardConflictPolicy};
pub use context::ResourceEngine;
pub use error::{ResourceError, ResourceResult};
pub use event::{AlarmEvent, AlarmType, AlarmTypes, CommandError, EventTime};
pub use format::{CURRENT_VERSION, Compatibility, FormatVersion};
pub use notification::{Notification, Severity};
pub use resource::{Resource, ResourceEdit, SingleFileResource, Status, WritableStatus};
pub use resources::Resources;
pub use settings::{Changes, ResourceId, ResourceSettings, SharedSettings};
