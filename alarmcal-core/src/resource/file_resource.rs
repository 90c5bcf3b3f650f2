//! The generic load/save/edit protocol for file-based resources.
//!
//! `FileResource` owns the status machine, the event cache and all settings
//! handling. The byte-level work is delegated to a `FileStorage` backend,
//! which reports asynchronous completions back through `handle_event`.
//! Every completion, synchronous or not, funnels through `loaded()` or
//! `saved()`.

use std::any::Any;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmEvent, AlarmType, AlarmTypes, CommandError};
use crate::event_loop::ResourceEvent;
use crate::format::{CURRENT_VERSION, Compatibility};
use crate::ics::ParsedCalendar;
use crate::location::Location;
use crate::notification::{Notification, Notifier, Severity};
use crate::settings::{Changes, ResourceId, ResourceSettings, SharedSettings};

use super::{Progress, Resource, ResourceCore, ResourceEdit, Status, WritableStatus};

const LOAD_ERROR: &str = "Error loading calendar";
const SAVE_ERROR: &str = "Error saving calendar";

/// A job completion translated by the backend.
#[derive(Debug)]
pub enum Completion {
    /// A load finished. `Ok(None)` means the content was unchanged.
    Loaded(ResourceResult<Option<ParsedCalendar>>),
    Saved(ResourceResult<()>),
    /// The debounce interval for a scheduled save elapsed
    SaveDue { write_through: bool },
    /// The backing file was changed by someone else
    ExternallyModified,
}

/// Storage backend for a `FileResource`.
pub trait FileStorage: Send + 'static {
    /// Start or perform a load. A synchronous load returns the parsed
    /// calendar, or `None` if the content is unchanged since it was last read.
    fn do_load(
        &mut self,
        core: &mut ResourceCore,
        read_through: bool,
    ) -> ResourceResult<Progress<Option<ParsedCalendar>>>;

    /// Start or perform a save of the event cache.
    fn do_save(
        &mut self,
        core: &mut ResourceCore,
        write_through: bool,
        force: bool,
    ) -> ResourceResult<Progress>;

    fn do_add_event(&mut self, core: &mut ResourceCore, event: &AlarmEvent) -> ResourceResult<()>;

    fn do_update_event(&mut self, core: &mut ResourceCore, event: &AlarmEvent)
    -> ResourceResult<()>;

    fn do_delete_event(&mut self, core: &mut ResourceCore, uid: &str) -> ResourceResult<()>;

    /// Request a save after the debounce interval. Requests made before it
    /// elapses are merged.
    fn schedule_save(&mut self, write_through: bool);

    fn cancel_scheduled_save(&mut self);

    /// Translate one of our own events into a completion, if it still
    /// matters.
    fn handle_event(&mut self, core: &mut ResourceCore, event: ResourceEvent)
    -> Option<Completion>;

    /// Re-read the format of the file as it is now on disk.
    fn disk_compatibility(&self, core: &ResourceCore) -> ResourceResult<Compatibility>;

    /// Forget the content hash so the next load re-parses.
    fn invalidate_cache(&mut self);

    fn is_modified(&self) -> bool;

    /// The file itself is not writable, whatever the settings say.
    fn file_read_only(&self) -> bool;

    fn is_busy(&self) -> bool;

    /// Stop timers and watchers. A running download is left to finish on
    /// its own; a running upload is returned so the caller can wait for it.
    fn shutdown(&mut self) -> Option<JoinHandle<()>>;
}

/// A resource backed by a `FileStorage`.
pub struct FileResource<S: FileStorage> {
    pub(crate) core: ResourceCore,
    pub(crate) storage: S,
}

impl<S: FileStorage> FileResource<S> {
    pub fn with_storage(settings: SharedSettings, notifier: Notifier, storage: S) -> Self {
        FileResource {
            core: ResourceCore::new(settings, notifier),
            storage,
        }
    }

    pub fn core(&self) -> &ResourceCore {
        &self.core
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn report_error(&self, headline: &str, e: &ResourceError) {
        let name = self.core.display_name();
        error!(resource = %self.core.id, "{} {}: {}", headline, name, e);
        self.core.notifier.message(
            self.core.id,
            Severity::Error,
            format!("{headline} {name}"),
            Some(e.to_string()),
        );
    }

    /// Move to `status` unless closed or unconfigured, and don't claim to be
    /// ready while a job is still running.
    fn settle(&mut self, status: Status) {
        if self.core.status.is_terminal() {
            return;
        }
        if status == Status::Ready && self.storage.is_busy() {
            return;
        }
        self.core.status = status;
    }

    /// Completion of every load.
    fn loaded(&mut self, result: ResourceResult<Option<ParsedCalendar>>) -> ResourceResult<bool> {
        let calendar = match result {
            Ok(calendar) => calendar,
            Err(e) => {
                self.settle(Status::Broken);
                self.report_error(LOAD_ERROR, &e);
                self.core.notify(Notification::Loaded {
                    resource: self.core.id,
                    success: false,
                });
                return Err(e);
            }
        };

        if let Some(calendar) = calendar {
            let ParsedCalendar {
                version,
                compatibility,
                events,
            } = calendar;
            self.core.compatibility = compatibility;
            self.core.version = version;
            self.core.events = events.into_iter().map(|e| (e.uid.clone(), e)).collect();
            info!(
                resource = %self.core.id,
                events = self.core.events.len(),
                ?compatibility,
                "Loaded calendar"
            );
        }

        self.annotate_command_errors();
        self.purge_command_errors();
        self.settle(Status::Ready);
        self.core.notify(Notification::Loaded {
            resource: self.core.id,
            success: true,
        });

        let update_format = self.core.settings().is_some_and(|s| s.update_format());
        if update_format && self.core.compatibility.is_upgradable() {
            if let Err(e) = self.upgrade_format() {
                warn!(resource = %self.core.id, "Could not update calendar format: {}", e);
            }
        }
        Ok(true)
    }

    /// Completion of every save.
    fn saved(&mut self, result: ResourceResult<()>) -> ResourceResult<()> {
        let success = result.is_ok();
        if let Err(e) = &result {
            self.settle(Status::Broken);
            self.report_error(SAVE_ERROR, e);
        } else {
            self.settle(Status::Ready);
        }
        self.core.notify(Notification::Saved {
            resource: self.core.id,
            success,
        });
        result
    }

    /// Preconditions for writing the calendar, checked without any I/O.
    fn check_save(&self) -> ResourceResult<()> {
        if self.core.status == Status::Closed {
            return Err(ResourceError::Closed);
        }
        if !self.core.is_configured() {
            return Err(ResourceError::NotConfigured);
        }
        if self.core.enabled_types().is_empty() {
            return Err(ResourceError::Disabled);
        }
        if self.core.read_only() || self.storage.file_read_only() {
            return Err(ResourceError::ReadOnly);
        }
        if self.core.compatibility != Compatibility::Current {
            return Err(ResourceError::IncompatibleFormat);
        }
        Ok(())
    }

    fn save_internal(&mut self, write_through: bool, force: bool) -> ResourceResult<Progress> {
        match self.storage.do_save(&mut self.core, write_through, force) {
            Ok(Progress::Done(())) => self.saved(Ok(())).map(Progress::Done),
            Ok(Progress::Started) => {
                self.core.status = Status::Saving;
                Ok(Progress::Started)
            }
            Err(ResourceError::InProgress) => {
                warn!(resource = %self.core.id, "Save rejected: previous load/save still in progress");
                Err(ResourceError::InProgress)
            }
            Err(e) => self.saved(Err(e)).map(Progress::Done),
        }
    }

    /// Preconditions for changing events of type `alarm_type`.
    fn check_writable(&self, alarm_type: AlarmType) -> ResourceResult<()> {
        match self.core.status {
            Status::Closed => return Err(ResourceError::Closed),
            Status::NotConfigured => return Err(ResourceError::NotConfigured),
            _ => {}
        }
        if !self.core.is_configured() {
            return Err(ResourceError::NotConfigured);
        }
        if !self.core.enabled_types().contains(alarm_type) {
            return Err(ResourceError::Disabled);
        }
        if self.core.read_only() || self.storage.file_read_only() {
            return Err(ResourceError::ReadOnly);
        }
        if self.core.compatibility != Compatibility::Current {
            return Err(ResourceError::IncompatibleFormat);
        }
        Ok(())
    }

    /// Copy the stored command errors onto the cached events.
    fn annotate_command_errors(&mut self) {
        let Some(settings) = self.core.settings.as_ref() else {
            return;
        };
        let settings = settings.read();
        for event in self.core.events.values_mut() {
            event.command_error = if event.category == AlarmType::Active {
                settings.command_error(&event.uid)
            } else {
                CommandError::None
            };
        }
    }

    /// Drop command errors for events which no longer exist or are no
    /// longer active.
    fn purge_command_errors(&mut self) {
        let Some(settings) = self.core.settings.as_ref() else {
            return;
        };
        let events = &self.core.events;
        let mut settings = settings.write();
        if !settings.alarm_types().contains(AlarmType::Active) {
            return;
        }
        let purged = settings.retain_command_errors(|uid| {
            events
                .get(uid)
                .is_some_and(|e| e.category == AlarmType::Active)
        });
        if purged {
            debug!(resource = %self.core.id, "Purged stale command errors");
            settings.save_logged();
        }
    }

    /// Bring the settings' command error for `event` in line with the event.
    fn reconcile_command_error(&self, event: &mut AlarmEvent) {
        if event.category != AlarmType::Active {
            event.command_error = CommandError::None;
        }
        if let Some(mut settings) = self.core.settings_mut() {
            if settings.set_command_error(&event.uid, event.command_error) {
                settings.save_logged();
            }
        }
    }

    /// Apply a settings mutation, persist it, react to it and announce it.
    fn change_settings(&mut self, apply: impl FnOnce(&mut ResourceSettings) -> Changes) -> Changes {
        let (changes, previous_enabled) = {
            let Some(mut settings) = self.core.settings_mut() else {
                return Changes::NONE;
            };
            let previous_enabled = settings.enabled_types();
            let changes = apply(&mut *settings);
            if !changes.is_empty() {
                settings.save_logged();
            }
            (changes, previous_enabled)
        };

        self.settings_changed(changes, previous_enabled);
        changes
    }

    /// Like `change_settings`, but the mutation only takes effect once it is
    /// persisted. On any error the settings are left as they were.
    fn try_change_settings(
        &mut self,
        apply: impl FnOnce(&mut ResourceSettings) -> ResourceResult<Changes>,
    ) -> ResourceResult<Changes> {
        let (changes, previous_enabled) = {
            let Some(mut settings) = self.core.settings_mut() else {
                return Err(ResourceError::NotConfigured);
            };
            let previous_enabled = settings.enabled_types();
            let mut updated = settings.clone();
            let changes = apply(&mut updated)?;
            if !changes.is_empty() {
                updated.save()?;
                *settings = updated;
            }
            (changes, previous_enabled)
        };

        self.settings_changed(changes, previous_enabled);
        Ok(changes)
    }

    fn settings_changed(&mut self, changes: Changes, previous_enabled: AlarmTypes) {
        if changes.is_empty() {
            return;
        }
        self.handle_settings_change(changes, previous_enabled);
        self.core.notify(Notification::SettingsChanged {
            resource: self.core.id,
            changes,
            previous_enabled,
        });
    }

    fn handle_settings_change(&mut self, changes: Changes, previous_enabled: AlarmTypes) {
        if changes.contains(Changes::ALARM_TYPES) {
            self.annotate_command_errors();
        }

        if changes.intersects(Changes::ENABLED | Changes::ALARM_TYPES) {
            let enabled = self.core.enabled_types();
            let newly_enabled = enabled - previous_enabled;
            if !newly_enabled.is_empty() && !self.core.status.is_terminal() {
                debug!(resource = %self.core.id, "Alarm types enabled; loading");
                if let Err(e) = self.load(false) {
                    debug!(resource = %self.core.id, "Load after enabling failed: {}", e);
                }
            }
        }

        if changes.contains(Changes::UPDATE_FORMAT) {
            let update = self.core.settings().is_some_and(|s| s.update_format());
            if update && self.core.compatibility.is_upgradable() && self.core.status == Status::Ready
            {
                if let Err(e) = self.upgrade_format() {
                    warn!(resource = %self.core.id, "Could not update calendar format: {}", e);
                }
            }
        }
    }

    /// Rewrite a down-level calendar in the current format.
    pub(crate) fn upgrade_format(&mut self) -> ResourceResult<()> {
        match self.core.status {
            Status::Closed => return Err(ResourceError::Closed),
            Status::NotConfigured => return Err(ResourceError::NotConfigured),
            Status::Broken => return Err(ResourceError::NotLoaded),
            _ => {}
        }
        if !self.core.is_configured() {
            return Err(ResourceError::NotConfigured);
        }
        if self.core.read_only() || self.storage.file_read_only() {
            return Err(ResourceError::ReadOnly);
        }
        if self.core.enabled_types().is_empty() {
            return Err(ResourceError::Disabled);
        }
        match self.core.compatibility {
            Compatibility::Current => return Err(ResourceError::AlreadyCurrent),
            Compatibility::Incompatible => return Err(ResourceError::IncompatibleFormat),
            Compatibility::Converted | Compatibility::Convertible => {}
        }

        match self.storage.disk_compatibility(&self.core)? {
            Compatibility::Converted | Compatibility::Convertible => {}
            Compatibility::Current => return Err(ResourceError::AlreadyCurrent),
            Compatibility::Incompatible => return Err(ResourceError::IncompatibleFormat),
        }

        let previous = (self.core.compatibility, self.core.version);
        self.core.compatibility = Compatibility::Current;
        self.core.version = Some(CURRENT_VERSION);
        self.storage.cancel_scheduled_save();

        if let Err(e) = self.save_internal(true, true) {
            (self.core.compatibility, self.core.version) = previous;
            return Err(e);
        }

        self.change_settings(|s| s.set_update_format(false));
        info!(resource = %self.core.id, "Calendar updated to format {}", CURRENT_VERSION);
        Ok(())
    }

    fn flush_scheduled_save(&mut self, write_through: bool) -> ResourceResult<()> {
        self.check_save()?;
        self.save_internal(write_through, false).map(|_| ())
    }
}

#[async_trait]
impl<S: FileStorage> Resource for FileResource<S> {
    fn id(&self) -> ResourceId {
        self.core.id
    }

    fn status(&self) -> Status {
        self.core.status
    }

    fn compatibility(&self) -> Compatibility {
        self.core.compatibility
    }

    fn settings(&self) -> Option<SharedSettings> {
        self.core.settings.clone()
    }

    fn display_name(&self) -> String {
        self.core.display_name()
    }

    fn writable_status(&self, alarm_type: Option<AlarmType>) -> WritableStatus {
        if self.core.status.is_unusable() || !self.core.is_configured() {
            return WritableStatus::Unusable;
        }
        let Some(settings) = self.core.settings() else {
            return WritableStatus::Unusable;
        };
        let enabled = match alarm_type {
            Some(ty) => settings.enabled_types().contains(ty),
            None => !settings.enabled_types().is_empty(),
        };
        if !enabled || settings.read_only() || self.storage.file_read_only() {
            return WritableStatus::Unusable;
        }
        match self.core.compatibility {
            Compatibility::Current => WritableStatus::Writable,
            c if c.is_upgradable() && !settings.keep_format() => WritableStatus::DownLevel,
            _ => WritableStatus::Unusable,
        }
    }

    fn events(&self) -> Vec<&AlarmEvent> {
        let enabled = self.core.enabled_types();
        self.core
            .events
            .values()
            .filter(|e| enabled.contains(e.category))
            .collect()
    }

    fn event(&self, uid: &str) -> Option<&AlarmEvent> {
        self.core
            .events
            .get(uid)
            .filter(|e| self.core.is_visible(e))
    }

    fn load(&mut self, read_through: bool) -> ResourceResult<bool> {
        if self.core.status == Status::Closed {
            return Err(ResourceError::Closed);
        }
        if !self.core.is_configured() {
            self.core.status = Status::NotConfigured;
            let e = ResourceError::NotConfigured;
            self.report_error(LOAD_ERROR, &e);
            return Err(e);
        }
        if self.core.enabled_types().is_empty() {
            debug!(resource = %self.core.id, "Not loading: no alarm types enabled");
            self.settle(Status::Ready);
            return Ok(false);
        }

        match self.storage.do_load(&mut self.core, read_through) {
            Ok(Progress::Done(calendar)) => self.loaded(Ok(calendar)),
            Ok(Progress::Started) => {
                self.core.status = Status::Loading;
                Ok(true)
            }
            Err(ResourceError::InProgress) => {
                warn!(resource = %self.core.id, "Load rejected: previous load/save still in progress");
                Err(ResourceError::InProgress)
            }
            Err(e) => self.loaded(Err(e)),
        }
    }

    fn reload(&mut self, discard_mods: bool) -> ResourceResult<bool> {
        match self.core.status {
            Status::Closed => return Err(ResourceError::Closed),
            Status::NotConfigured => return Err(ResourceError::NotConfigured),
            _ => {}
        }

        if !discard_mods && self.storage.is_modified() && self.check_save().is_ok() {
            self.storage.cancel_scheduled_save();
            match self.save_internal(true, false) {
                // The file now holds what we have in memory.
                Ok(Progress::Done(())) => return Ok(true),
                // An upload is running, so the reload below is refused as busy.
                Ok(Progress::Started) => {
                    debug!(resource = %self.core.id, "Save before reload started an upload")
                }
                Err(e) => debug!(resource = %self.core.id, "Save before reload failed: {}", e),
            }
        }

        if self.storage.is_busy() {
            warn!(resource = %self.core.id, "Reload rejected: previous load/save still in progress");
            return Err(ResourceError::InProgress);
        }

        self.storage.cancel_scheduled_save();
        self.storage.invalidate_cache();
        self.core.events.clear();
        self.load(true)
    }

    fn save(&mut self, write_through: bool, force: bool) -> ResourceResult<bool> {
        if let Err(e) = self.check_save() {
            debug!(resource = %self.core.id, "Not saving: {}", e);
            return Err(e);
        }
        self.storage.cancel_scheduled_save();
        self.save_internal(write_through, force).map(|_| true)
    }

    fn add_event(&mut self, mut event: AlarmEvent) -> ResourceResult<()> {
        if let Err(e) = self.check_writable(event.category) {
            warn!(resource = %self.core.id, event = %event.uid, "Cannot add event: {}", e);
            return Err(e);
        }
        if self.core.events.contains_key(&event.uid) {
            return Err(ResourceError::DuplicateEvent(event.uid));
        }

        self.storage.do_add_event(&mut self.core, &event)?;
        self.reconcile_command_error(&mut event);
        let uid = event.uid.clone();
        self.core.events.insert(uid.clone(), event);
        self.storage.schedule_save(true);
        self.core.notify(Notification::EventAdded {
            resource: self.core.id,
            event_id: uid,
        });
        Ok(())
    }

    fn update_event(&mut self, mut event: AlarmEvent, save_if_read_only: bool) -> ResourceResult<()> {
        let Some(old_category) = self.core.events.get(&event.uid).map(|e| e.category) else {
            return Err(ResourceError::EventNotFound(event.uid));
        };

        let writable = self
            .check_writable(old_category)
            .and_then(|_| self.check_writable(event.category));

        match writable {
            Ok(()) => {
                self.storage.do_update_event(&mut self.core, &event)?;
                self.reconcile_command_error(&mut event);
                let uid = event.uid.clone();
                self.core.events.insert(uid.clone(), event);
                self.storage.schedule_save(true);
                self.core.notify(Notification::EventUpdated {
                    resource: self.core.id,
                    event_id: uid,
                });
                Ok(())
            }
            Err(ResourceError::ReadOnly | ResourceError::IncompatibleFormat) if save_if_read_only => {
                debug!(resource = %self.core.id, event = %event.uid, "Updating read-only event in memory only");
                self.reconcile_command_error(&mut event);
                let uid = event.uid.clone();
                self.core.events.insert(uid.clone(), event);
                self.core.notify(Notification::EventUpdated {
                    resource: self.core.id,
                    event_id: uid,
                });
                Ok(())
            }
            Err(e) => {
                warn!(resource = %self.core.id, event = %event.uid, "Cannot update event: {}", e);
                Err(e)
            }
        }
    }

    fn delete_event(&mut self, uid: &str) -> ResourceResult<()> {
        let Some(category) = self.core.events.get(uid).map(|e| e.category) else {
            return Err(ResourceError::EventNotFound(uid.to_string()));
        };
        if let Err(e) = self.check_writable(category) {
            warn!(resource = %self.core.id, event = %uid, "Cannot delete event: {}", e);
            return Err(e);
        }

        self.storage.do_delete_event(&mut self.core, uid)?;
        self.core.events.remove(uid);
        if let Some(mut settings) = self.core.settings_mut() {
            if settings.set_command_error(uid, CommandError::None) {
                settings.save_logged();
            }
        }
        self.storage.schedule_save(true);
        self.core.notify(Notification::EventDeleted {
            resource: self.core.id,
            event_id: uid.to_string(),
        });
        Ok(())
    }

    fn set_command_error(&mut self, uid: &str, error: CommandError) -> ResourceResult<()> {
        let Some(category) = self.core.events.get(uid).map(|e| e.category) else {
            return Err(ResourceError::EventNotFound(uid.to_string()));
        };
        if category != AlarmType::Active && error != CommandError::None {
            return Err(ResourceError::InvalidSettings(format!(
                "{uid} is not an active alarm"
            )));
        }

        let changed = match self.core.settings_mut() {
            Some(mut settings) => {
                let changed = settings.set_command_error(uid, error);
                if changed {
                    settings.save_logged();
                }
                changed
            }
            None => return Err(ResourceError::NotConfigured),
        };

        if let Some(event) = self.core.events.get_mut(uid) {
            event.command_error = error;
        }
        if changed {
            self.core.notify(Notification::EventUpdated {
                resource: self.core.id,
                event_id: uid.to_string(),
            });
        }
        Ok(())
    }

    fn set_enabled(&mut self, alarm_type: AlarmType, enabled: bool) -> Changes {
        self.change_settings(|s| s.set_enabled(alarm_type, enabled))
    }

    fn set_enabled_types(&mut self, types: AlarmTypes) -> Changes {
        self.change_settings(|s| s.set_enabled_types(types))
    }

    fn set_read_only(&mut self, read_only: bool) -> Changes {
        self.change_settings(|s| s.set_read_only(read_only))
    }

    fn set_keep_format(&mut self, keep: bool) -> Changes {
        self.change_settings(|s| s.set_keep_format(keep))
    }

    fn set_update_format(&mut self, update: bool) -> Changes {
        self.change_settings(|s| s.set_update_format(update))
    }

    fn set_background_colour(&mut self, colour: Option<&str>) -> Changes {
        self.change_settings(|s| s.set_background_colour(colour))
    }

    fn config_set_standard(&mut self, types: AlarmTypes) -> Changes {
        self.change_settings(|s| s.set_standard_types(types))
    }

    fn edit_resource(&mut self, edit: ResourceEdit) -> ResourceResult<Changes> {
        match self.core.status {
            Status::Closed => return Err(ResourceError::Closed),
            Status::NotConfigured => return Err(ResourceError::NotConfigured),
            _ => {}
        }
        if let Some(url) = edit.location.as_deref() {
            if Location::parse(url).is_none() {
                return Err(ResourceError::InvalidSettings(format!("Malformed location {url}")));
            }
            let (moved, accepted) = self
                .core
                .settings()
                .map_or((false, false), |s| (s.url() != url, s.accepts_location(url)));
            if moved && !accepted {
                warn!(resource = %self.core.id, url = %url, "Location does not match the storage type");
                return Err(ResourceError::InvalidSettings(format!(
                    "Location {url} does not match the storage type"
                )));
            }
            if moved && self.storage.is_busy() {
                return Err(ResourceError::InProgress);
            }
        }

        let changes = self.try_change_settings(|s| {
            let mut changes = Changes::NONE;
            if let Some(name) = edit.display_name.as_deref() {
                changes |= s.set_display_name(name);
            }
            if let Some(colour) = edit.background_colour.as_ref() {
                changes |= s.set_background_colour(colour.as_deref());
            }
            if let Some(read_only) = edit.read_only {
                changes |= s.set_read_only(read_only);
            }
            if let Some(types) = edit.alarm_types {
                changes |= s.set_alarm_types(types);
            }
            if let Some(url) = edit.location.as_deref() {
                let moved = s.set_url(url);
                if !moved.is_empty() && !s.validate() {
                    return Err(ResourceError::InvalidSettings(format!(
                        "Location {url} does not match the storage type"
                    )));
                }
                changes |= moved;
            }
            Ok(changes)
        })?;

        if changes.contains(Changes::LOCATION) {
            info!(resource = %self.core.id, "Location changed; reloading");
            self.storage.cancel_scheduled_save();
            self.storage.invalidate_cache();
            self.core.events.clear();
            if let Err(e) = self.load(true) {
                debug!(resource = %self.core.id, "Load from new location failed: {}", e);
            }
        }
        Ok(changes)
    }

    async fn remove_resource(&mut self) {
        self.core.notify(Notification::ResourceToBeRemoved(self.core.id));
        self.close().await;
        self.core.settings = None;
    }

    fn handle_event(&mut self, event: ResourceEvent) {
        if self.core.status == Status::Closed {
            debug!(resource = %self.core.id, ?event, "Ignoring event for closed resource");
            return;
        }
        let Some(completion) = self.storage.handle_event(&mut self.core, event) else {
            return;
        };

        let result = match completion {
            Completion::Loaded(result) => self.loaded(result).map(|_| ()),
            Completion::Saved(result) => self.saved(result),
            Completion::SaveDue { write_through } => self.flush_scheduled_save(write_through),
            Completion::ExternallyModified => {
                info!(resource = %self.core.id, "Calendar file changed externally; reloading");
                self.reload(true).map(|_| ())
            }
        };
        if let Err(e) = result {
            debug!(resource = %self.core.id, "{}", e);
        }
    }

    fn is_busy(&self) -> bool {
        self.storage.is_busy()
    }

    async fn close(&mut self) {
        if self.core.status == Status::Closed {
            return;
        }
        self.storage.cancel_scheduled_save();

        if self.storage.is_modified() && self.check_save().is_ok() {
            if let Err(e) = self.save_internal(true, false) {
                warn!(resource = %self.core.id, "Final save failed: {}", e);
            }
        }

        if let Some(upload) = self.storage.shutdown() {
            debug!(resource = %self.core.id, "Waiting for upload to finish");
            if let Err(e) = upload.await {
                warn!(resource = %self.core.id, "Upload task failed: {}", e);
            }
        }

        self.core.events.clear();
        self.core.status = Status::Closed;
        debug!(resource = %self.core.id, "Closed");
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
