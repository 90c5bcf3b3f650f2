//! Registry of live resources.
//!
//! `Resources` owns every constructed resource, the receiving end of the
//! completion channel their jobs post to, and the notification channel
//! consumers read from. All resource state is touched from the task that
//! drives `process_next_event`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmType, AlarmTypes};
use crate::event_loop::{Dispatch, EventLoopHandle};
use crate::location::Location;
use crate::notification::{Notification, Notifier};
use crate::resource::{Resource, ResourceContext, ResourceEdit};
use crate::settings::{Changes, ResourceId};
use crate::transport::Transport;

pub struct Resources {
    context: ResourceContext,
    resources: BTreeMap<ResourceId, Box<dyn Resource>>,
    dispatch: UnboundedReceiver<Dispatch>,
    notifications: UnboundedReceiver<Notification>,
}

impl Resources {
    pub fn new(config: &EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let (notifier, notifications) = Notifier::channel();
        let (events, dispatch) = EventLoopHandle::channel();
        Resources {
            context: ResourceContext::new(config, notifier, events, transport),
            resources: BTreeMap::new(),
            dispatch,
            notifications,
        }
    }

    /// The environment handed to resources constructed for this registry.
    pub fn context(&self) -> &ResourceContext {
        &self.context
    }

    /// Register a newly constructed resource and start loading it.
    pub fn add(&mut self, resource: Box<dyn Resource>) -> ResourceId {
        let id = resource.id();
        self.context
            .notifier
            .send(Notification::NewResourceInitialised(id));

        let resource = self.resources.entry(id).or_insert(resource);
        if let Err(e) = resource.load(true) {
            debug!(resource = %id, "Initial load failed: {}", e);
        }
        id
    }

    /// Take a resource out of the registry. Events still queued for it are
    /// dropped when they arrive.
    pub fn remove(&mut self, id: ResourceId) -> Option<Box<dyn Resource>> {
        self.resources.remove(&id)
    }

    pub fn get(&self, id: ResourceId) -> Option<&(dyn Resource + 'static)> {
        self.resources.get(&id).map(|r| &**r)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut (dyn Resource + 'static)> {
        self.resources.get_mut(&id).map(|r| &mut **r)
    }

    pub fn ids(&self) -> Vec<ResourceId> {
        self.resources.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn Resource + 'static)> {
        self.resources.values().map(|r| &**r)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Wait for the next completion event and hand it to its resource.
    pub async fn process_next_event(&mut self) -> bool {
        match self.dispatch.recv().await {
            Some(dispatch) => {
                self.dispatch(dispatch);
                true
            }
            None => false,
        }
    }

    /// Handle every event already queued. Returns how many were handled.
    pub fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(dispatch) = self.dispatch.try_recv() {
            self.dispatch(dispatch);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, dispatch: Dispatch) {
        let Dispatch { resource, event } = dispatch;
        match self.resources.get_mut(&resource) {
            Some(r) => r.handle_event(event),
            None => debug!(resource = %resource, ?event, "Dropping event for unknown resource"),
        }
    }

    pub async fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    /// All notifications posted so far.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    /// Make `id` the standard resource for `alarm_type`, or stop it being so.
    ///
    /// Only one resource can be standard for a type: making one standard
    /// clears the type from every other.
    pub fn set_standard(
        &mut self,
        id: ResourceId,
        alarm_type: AlarmType,
        standard: bool,
    ) -> ResourceResult<Changes> {
        let target = self
            .resources
            .get(&id)
            .ok_or(ResourceError::UnknownResource(id))?;
        let Some(settings) = target.settings() else {
            return Err(ResourceError::NotConfigured);
        };
        let current = settings.read().standard_types();

        if !standard {
            let resource = self.get_mut(id).ok_or(ResourceError::UnknownResource(id))?;
            return Ok(resource.config_set_standard(current - alarm_type.into()));
        }

        if !settings.read().enabled_types().contains(alarm_type) {
            return Err(ResourceError::Disabled);
        }

        for (other_id, other) in self.resources.iter_mut() {
            if *other_id == id {
                continue;
            }
            let Some(types) = other.settings().map(|s| s.read().standard_types()) else {
                continue;
            };
            if types.contains(alarm_type) {
                info!(resource = %other_id, %alarm_type, "No longer the standard resource");
                other.config_set_standard(types - alarm_type.into());
            }
        }

        let resource = self.get_mut(id).ok_or(ResourceError::UnknownResource(id))?;
        Ok(resource.config_set_standard(current | alarm_type))
    }

    /// The standard resource for `alarm_type`, if any.
    pub fn standard(&self, alarm_type: AlarmType) -> Option<ResourceId> {
        self.resources.iter().find_map(|(id, r)| {
            let standard = r.settings()?.read().standard_types();
            standard.contains(alarm_type).then_some(*id)
        })
    }

    /// Resources holding events of `alarm_type` which are currently enabled.
    pub fn enabled(&self, alarm_type: AlarmType) -> Vec<ResourceId> {
        self.resources
            .iter()
            .filter(|(_, r)| {
                r.settings()
                    .is_some_and(|s| s.read().enabled_types().contains(alarm_type))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Edit a resource's configuration, refusing a location already used by
    /// another resource.
    pub fn edit_resource(&mut self, id: ResourceId, edit: ResourceEdit) -> ResourceResult<Changes> {
        if !self.resources.contains_key(&id) {
            return Err(ResourceError::UnknownResource(id));
        }

        if let Some(url) = edit.location.as_deref() {
            let identity = Location::parse(url)
                .ok_or_else(|| ResourceError::InvalidSettings(format!("Malformed location {url}")))?
                .identity();
            let taken = self.resources.iter().any(|(other_id, other)| {
                *other_id != id
                    && other.settings().is_some_and(|s| {
                        s.read().location().is_some_and(|l| l.identity() == identity)
                    })
            });
            if taken {
                warn!(resource = %id, url, "Location is used by another resource");
                return Err(ResourceError::DuplicateUrl(url.to_string()));
            }
        }

        let resource = self.get_mut(id).ok_or(ResourceError::UnknownResource(id))?;
        resource.edit_resource(edit)
    }

    /// Types of alarm any registered resource can hold.
    pub fn alarm_types(&self) -> AlarmTypes {
        self.resources
            .values()
            .filter_map(|r| r.settings().map(|s| s.read().alarm_types()))
            .fold(AlarmTypes::NONE, |all, types| all | types)
    }

    /// Close every resource, flushing unsaved changes.
    pub async fn close_all(&mut self) {
        for (id, resource) in self.resources.iter_mut() {
            debug!(resource = %id, "Closing");
            resource.close().await;
        }
    }
}
