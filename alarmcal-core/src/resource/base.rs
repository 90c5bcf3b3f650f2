//! State shared by the generic resource engine and its storage backend.

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::event::{AlarmEvent, AlarmTypes, EventMap};
use crate::format::{Compatibility, FormatVersion};
use crate::location::Location;
use crate::notification::{Notification, Notifier};
use crate::settings::{ResourceId, ResourceSettings, SharedSettings};

use super::Status;

#[derive(Debug)]
pub struct ResourceCore {
    pub(crate) settings: Option<SharedSettings>,
    pub(crate) id: ResourceId,
    pub(crate) status: Status,
    pub(crate) compatibility: Compatibility,
    pub(crate) version: Option<FormatVersion>,
    pub(crate) events: EventMap,
    pub(crate) notifier: Notifier,
}

impl ResourceCore {
    pub fn new(settings: SharedSettings, notifier: Notifier) -> Self {
        let (id, valid) = {
            let s = settings.read();
            (s.id(), s.is_valid())
        };
        ResourceCore {
            settings: Some(settings),
            id,
            status: if valid {
                Status::Ready
            } else {
                Status::NotConfigured
            },
            compatibility: Compatibility::Incompatible,
            version: None,
            events: EventMap::new(),
            notifier,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    pub fn events(&self) -> &EventMap {
        &self.events
    }

    pub fn settings(&self) -> Option<RwLockReadGuard<'_, ResourceSettings>> {
        self.settings.as_ref().map(|s| s.read())
    }

    pub fn settings_mut(&self) -> Option<RwLockWriteGuard<'_, ResourceSettings>> {
        self.settings.as_ref().map(|s| s.write())
    }

    pub fn is_configured(&self) -> bool {
        self.status != Status::NotConfigured && self.settings().is_some_and(|s| s.is_valid())
    }

    pub fn location(&self) -> Option<Location> {
        self.settings().and_then(|s| s.location().cloned())
    }

    pub fn display_name(&self) -> String {
        match self.settings() {
            Some(s) if !s.display_name().is_empty() => s.display_name().to_string(),
            Some(s) => s.url().to_string(),
            None => self.id.to_string(),
        }
    }

    pub fn enabled_types(&self) -> AlarmTypes {
        self.settings()
            .map(|s| s.enabled_types())
            .unwrap_or(AlarmTypes::NONE)
    }

    pub fn read_only(&self) -> bool {
        self.settings().is_some_and(|s| s.read_only())
    }

    pub fn persisted_hash(&self) -> Option<String> {
        self.settings().and_then(|s| s.hash().map(String::from))
    }

    /// Record the content hash durably, so a restart starts from the right
    /// baseline.
    pub fn persist_hash(&self, hash: &str) {
        if let Some(mut settings) = self.settings_mut() {
            if !settings.set_hash(hash).is_empty() {
                settings.save_logged();
            }
        }
    }

    /// Is the event visible to consumers?
    pub fn is_visible(&self, event: &AlarmEvent) -> bool {
        self.enabled_types().contains(event.category)
    }

    pub fn notify(&self, notification: Notification) {
        self.notifier.send(notification);
    }
}
