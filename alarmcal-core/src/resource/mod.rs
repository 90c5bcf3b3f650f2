//! Calendar resources.
//!
//! A resource is one independently loadable and savable collection of alarm
//! events. `FileResource` implements the generic protocol on top of a
//! `FileStorage` backend; `SingleFileResource` is the backend for one local
//! or remote calendar file.

mod base;
mod file_resource;
mod single_file;

pub use base::ResourceCore;
pub use file_resource::{Completion, FileResource, FileStorage};
pub use single_file::{SingleFile, SingleFileResource};

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::error::ResourceResult;
use crate::event::{AlarmEvent, AlarmType, AlarmTypes, CommandError};
use crate::event_loop::{EventLoopHandle, ResourceEvent};
use crate::format::Compatibility;
use crate::notification::Notifier;
use crate::settings::{Changes, ResourceId, SharedSettings};
use crate::transport::Transport;

/// Resource status. Ordered: everything from `Broken` on is unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ready,
    Loading,
    Saving,
    /// An I/O error occurred; retrying load or save may recover
    Broken,
    /// Closed, never reopened
    Closed,
    /// Settings are missing or invalid
    NotConfigured,
}

impl Status {
    pub fn is_unusable(&self) -> bool {
        *self >= Status::Broken
    }

    /// Closed and NotConfigured never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Closed | Status::NotConfigured)
    }
}

/// Whether events of a type can be written to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WritableStatus {
    /// Read-only, disabled, or in a format we can't write
    Unusable,
    /// Writable once the calendar is upgraded to the current format
    DownLevel,
    Writable,
}

impl WritableStatus {
    /// The conventional -1 / 0 / 1 encoding.
    pub fn as_i8(&self) -> i8 {
        match self {
            WritableStatus::Unusable => -1,
            WritableStatus::DownLevel => 0,
            WritableStatus::Writable => 1,
        }
    }
}

/// Outcome of a backend load or save that did not fail.
#[derive(Debug)]
pub enum Progress<T = ()> {
    /// Finished synchronously
    Done(T),
    /// A job was started; its completion arrives later as a `ResourceEvent`
    Started,
}

/// Configuration edits applied by `Resource::edit_resource`.
#[derive(Debug, Clone, Default)]
pub struct ResourceEdit {
    pub display_name: Option<String>,
    /// `Some(None)` clears the colour
    pub background_colour: Option<Option<String>>,
    pub read_only: Option<bool>,
    pub alarm_types: Option<AlarmTypes>,
    pub location: Option<String>,
}

/// Everything a resource needs from its environment.
#[derive(Clone)]
pub struct ResourceContext {
    pub notifier: Notifier,
    pub events: EventLoopHandle,
    pub transport: Arc<dyn Transport>,
    pub cache_dir: PathBuf,
    pub save_delay: Duration,
    pub watch_files: bool,
}

impl ResourceContext {
    pub fn new(
        config: &EngineConfig,
        notifier: Notifier,
        events: EventLoopHandle,
        transport: Arc<dyn Transport>,
    ) -> Self {
        ResourceContext {
            notifier,
            events,
            transport,
            cache_dir: config.cache_path(),
            save_delay: config.save_delay(),
            watch_files: config.watch_files,
        }
    }
}

/// The operations common to every kind of resource.
///
/// Load and save return `Ok(true)` once the operation is accepted; when a
/// job had to be started the outcome is only known after the `Loaded` or
/// `Saved` notification. `Ok(false)` means there was nothing to do.
/// Operations specific to a backend are reached through the checked
/// accessors such as `as_single_file`.
#[async_trait]
pub trait Resource: Any + Send {
    fn id(&self) -> ResourceId;

    fn status(&self) -> Status;

    fn compatibility(&self) -> Compatibility;

    /// The shared settings, until the resource is removed.
    fn settings(&self) -> Option<SharedSettings>;

    fn display_name(&self) -> String;

    /// Writability for `alarm_type`, or for any enabled type if `None`.
    fn writable_status(&self, alarm_type: Option<AlarmType>) -> WritableStatus;

    /// Events of the enabled alarm types.
    fn events(&self) -> Vec<&AlarmEvent>;

    fn event(&self, uid: &str) -> Option<&AlarmEvent>;

    fn load(&mut self, read_through: bool) -> ResourceResult<bool>;

    fn reload(&mut self, discard_mods: bool) -> ResourceResult<bool>;

    fn save(&mut self, write_through: bool, force: bool) -> ResourceResult<bool>;

    fn add_event(&mut self, event: AlarmEvent) -> ResourceResult<()>;

    fn update_event(&mut self, event: AlarmEvent, save_if_read_only: bool) -> ResourceResult<()>;

    fn delete_event(&mut self, uid: &str) -> ResourceResult<()>;

    /// Record a command error for an event without touching the calendar.
    fn set_command_error(&mut self, uid: &str, error: CommandError) -> ResourceResult<()>;

    fn set_enabled(&mut self, alarm_type: AlarmType, enabled: bool) -> Changes;

    fn set_enabled_types(&mut self, types: AlarmTypes) -> Changes;

    fn set_read_only(&mut self, read_only: bool) -> Changes;

    fn set_keep_format(&mut self, keep: bool) -> Changes;

    fn set_update_format(&mut self, update: bool) -> Changes;

    fn set_background_colour(&mut self, colour: Option<&str>) -> Changes;

    /// Set the types this resource is standard for. Uniqueness across
    /// resources is the registry's job.
    fn config_set_standard(&mut self, types: AlarmTypes) -> Changes;

    fn edit_resource(&mut self, edit: ResourceEdit) -> ResourceResult<Changes>;

    /// Announce removal, close, and release the settings.
    async fn remove_resource(&mut self);

    /// Handle a completion event posted by one of this resource's jobs.
    fn handle_event(&mut self, event: ResourceEvent);

    /// True while a transfer job is in flight.
    fn is_busy(&self) -> bool;

    /// Flush pending changes and close. Waits for an active upload.
    async fn close(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Resource {
    pub fn as_single_file(&self) -> Option<&SingleFileResource> {
        self.as_any().downcast_ref()
    }

    pub fn as_single_file_mut(&mut self) -> Option<&mut SingleFileResource> {
        self.as_any_mut().downcast_mut()
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unusable_threshold() {
        assert!(!Status::Ready.is_unusable());
        assert!(!Status::Saving.is_unusable());
        assert!(Status::Broken.is_unusable());
        assert!(!Status::Broken.is_terminal());
        assert!(Status::Closed.is_terminal());
        assert!(Status::NotConfigured.is_unusable());
    }

    #[test]
    fn writable_status_encoding() {
        assert_eq!(WritableStatus::Unusable.as_i8(), -1);
        assert_eq!(WritableStatus::DownLevel.as_i8(), 0);
        assert_eq!(WritableStatus::Writable.as_i8(), 1);
    }
}
