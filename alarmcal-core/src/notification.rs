//! Notifications from resources to the application.
//!
//! Resources never call back into their owner; they post `Notification`s on a
//! channel which the `Resources` registry hands out to consumers.

use tokio::sync::mpsc;

use crate::event::AlarmTypes;
use crate::settings::{Changes, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A user-facing message about a resource
    ResourceMessage {
        resource: ResourceId,
        severity: Severity,
        headline: String,
        detail: Option<String>,
    },
    /// A resource has been constructed and registered
    NewResourceInitialised(ResourceId),
    /// Settings changed; `previous_enabled` is the enabled set before the change
    SettingsChanged {
        resource: ResourceId,
        changes: Changes,
        previous_enabled: AlarmTypes,
    },
    /// A resource is about to be removed
    ResourceToBeRemoved(ResourceId),
    /// Config for a removed resource is gone; its settings are about to be freed
    SettingsDestroyed(ResourceId),
    /// A load finished (synchronously or after a download)
    Loaded { resource: ResourceId, success: bool },
    /// A save finished (synchronously or after an upload)
    Saved { resource: ResourceId, success: bool },
    EventAdded { resource: ResourceId, event_id: String },
    /// An event changed, including settings-only changes such as its command error
    EventUpdated { resource: ResourceId, event_id: String },
    EventDeleted { resource: ResourceId, event_id: String },
}

/// Sending half of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    pub fn channel() -> (Notifier, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Notifier { tx }, rx)
    }

    /// Post a notification. Dropped silently if nobody is listening.
    pub fn send(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn message(
        &self,
        resource: ResourceId,
        severity: Severity,
        headline: String,
        detail: Option<String>,
    ) {
        self.send(Notification::ResourceMessage {
            resource,
            severity,
            headline,
            detail,
        });
    }
}
