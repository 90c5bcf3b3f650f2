//! The set of configured resources.
//!
//! `ConfigManager` owns the resource store. It turns the stored groups into
//! resources at startup, allocates ids and group indexes for new resources,
//! and deletes the configuration of removed ones.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmType, AlarmTypes};
use crate::location::Location;
use crate::notification::{Notification, Notifier};
use crate::resource::SingleFileResource;
use crate::resources::Resources;
use crate::settings::{ResourceId, ResourceSettings, SharedSettings, StorageType};

use super::{ConfigStore, EngineConfig, StandardConflictPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreationState {
    NotStarted,
    InProgress,
    Done,
}

/// Parameters for a resource added at runtime.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub url: String,
    pub alarm_types: AlarmTypes,
    pub display_name: Option<String>,
    pub read_only: bool,
}

impl NewResource {
    pub fn new(url: &str, alarm_types: AlarmTypes) -> Self {
        NewResource {
            url: url.to_string(),
            alarm_types,
            display_name: None,
            read_only: false,
        }
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    store: ConfigStore,
    policy: StandardConflictPolicy,
    settings: BTreeMap<ResourceId, SharedSettings>,
    indexes: BTreeMap<ResourceId, u32>,
    /// Group indexes in use, including groups we keep but don't load
    used_indexes: BTreeSet<u32>,
    state: CreationState,
}

impl ConfigManager {
    pub fn new(store: ConfigStore, policy: StandardConflictPolicy) -> Self {
        ConfigManager {
            store,
            policy,
            settings: BTreeMap::new(),
            indexes: BTreeMap::new(),
            used_indexes: BTreeSet::new(),
            state: CreationState::NotStarted,
        }
    }

    pub fn open(config: &EngineConfig) -> ResourceResult<Self> {
        let store = ConfigStore::open(config.resources_path())?;
        Ok(Self::new(store, config.standard_conflict))
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn settings(&self, id: ResourceId) -> Option<SharedSettings> {
        self.settings.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<ResourceId> {
        self.settings.keys().copied().collect()
    }

    /// Create a resource for every valid stored group and register it.
    ///
    /// Groups that can't be read, fail validation or repeat the id or
    /// location of an earlier group are deleted. Only the first call does
    /// anything. Returns the number of resources created.
    pub fn create_resources(&mut self, resources: &mut Resources) -> usize {
        if self.state != CreationState::NotStarted {
            debug!("Resources already created");
            return 0;
        }
        self.state = CreationState::InProgress;

        let mut loaded: Vec<SharedSettings> = Vec::new();
        let mut identities: BTreeMap<String, ResourceId> = BTreeMap::new();
        let mut standard: BTreeMap<AlarmType, SharedSettings> = BTreeMap::new();
        let mut max_counter = self.store.last_id();
        let mut seen_ids: BTreeSet<ResourceId> = BTreeSet::new();

        for (index, group) in self.store.resource_groups() {
            let mut settings = match ResourceSettings::read_config(&self.store, &group) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(group = %group, "Deleting unreadable resource config: {}", e);
                    self.store.delete_group(&group);
                    continue;
                }
            };

            let id = settings.id();
            if !id.is_file_resource() {
                warn!(group = %group, resource = %id, "Deleting resource config with invalid id");
                self.store.delete_group(&group);
                continue;
            }
            if self.settings.contains_key(&id) || seen_ids.contains(&id) {
                warn!(group = %group, resource = %id, "Deleting resource config with duplicate id");
                self.store.delete_group(&group);
                continue;
            }
            if !settings.validate() {
                warn!(group = %group, resource = %id, url = %settings.url(), "Deleting invalid resource config");
                self.store.delete_group(&group);
                continue;
            }
            if settings.storage_type() == StorageType::Directory {
                warn!(group = %group, resource = %id, "Directory resources are not supported; ignoring");
                // The group stays, so its id and index stay taken.
                max_counter = max_counter.max(id.counter());
                seen_ids.insert(id);
                self.used_indexes.insert(index);
                continue;
            }

            let Some(identity) = settings.location().map(Location::identity) else {
                continue;
            };
            if let Some(existing) = identities.get(&identity) {
                warn!(
                    group = %group,
                    resource = %id,
                    existing = %existing,
                    url = %settings.url(),
                    "Deleting resource config duplicating another's location"
                );
                self.store.delete_group(&group);
                continue;
            }
            identities.insert(identity, id);

            let settings = Arc::new(RwLock::new(settings));
            self.resolve_standard_conflicts(&settings, &mut standard);

            max_counter = max_counter.max(id.counter());
            seen_ids.insert(id);
            self.used_indexes.insert(index);
            self.indexes.insert(id, index);
            loaded.push(settings);
        }

        if max_counter > self.store.last_id() {
            self.store.set_last_id(max_counter);
        }
        if let Err(e) = self.store.sync() {
            warn!("Failed to write resource config: {}", e);
        }

        let count = loaded.len();
        for settings in loaded {
            let id = settings.read().id();
            self.settings.insert(id, settings.clone());
            let resource = SingleFileResource::new(settings, resources.context());
            resources.add(Box::new(resource));
        }

        self.state = CreationState::Done;
        info!(count, "Created resources from config");
        count
    }

    /// Strip standard claims made by more than one resource, keeping the
    /// one the policy prefers.
    fn resolve_standard_conflicts(
        &self,
        settings: &SharedSettings,
        standard: &mut BTreeMap<AlarmType, SharedSettings>,
    ) {
        let claims = settings.read().standard_types();
        for ty in claims.iter() {
            let Some(previous) = standard.get(&ty).cloned() else {
                standard.insert(ty, settings.clone());
                continue;
            };

            let loser = match self.policy {
                StandardConflictPolicy::FirstLoadedWins => settings.clone(),
                StandardConflictPolicy::LastLoadedWins => {
                    standard.insert(ty, settings.clone());
                    previous
                }
            };
            let mut loser = loser.write();
            warn!(
                resource = %loser.id(),
                alarm_type = %ty,
                "Another resource is already standard; clearing"
            );
            loser.set_standard(ty, false);
            loser.save_logged();
        }
    }

    /// Configure a new resource, register it and start loading it.
    pub fn add_resource(
        &mut self,
        new: NewResource,
        resources: &mut Resources,
    ) -> ResourceResult<ResourceId> {
        let location = Location::parse(&new.url)
            .ok_or_else(|| ResourceError::InvalidSettings(format!("Malformed location {}", new.url)))?;
        let identity = location.identity();
        let taken = self.settings.values().any(|s| {
            s.read()
                .location()
                .is_some_and(|l| l.identity() == identity)
        });
        if taken {
            warn!(url = %new.url, "Location is already used by another resource");
            return Err(ResourceError::DuplicateUrl(new.url));
        }

        let counter = self.store.last_id() + 1;
        let id = ResourceId::file_resource(counter);
        let index = self.next_free_index();
        let group = ConfigStore::resource_group_name(index);

        let mut settings =
            ResourceSettings::new(Some(self.store.clone()), &group, id, &new.url, new.alarm_types);
        if let Some(name) = new.display_name.as_deref() {
            settings.set_display_name(name);
        }
        settings.set_read_only(new.read_only);
        if !settings.validate() {
            return Err(ResourceError::InvalidSettings(format!(
                "{} does not match the storage type",
                new.url
            )));
        }

        self.store.set_last_id(counter);
        settings.save()?;

        let settings = Arc::new(RwLock::new(settings));
        self.settings.insert(id, settings.clone());
        self.indexes.insert(id, index);
        self.used_indexes.insert(index);
        info!(resource = %id, group = %group, url = %new.url, "Added resource");

        let resource = SingleFileResource::new(settings, resources.context());
        Ok(resources.add(Box::new(resource)))
    }

    /// Lowest group index not in use.
    fn next_free_index(&self) -> u32 {
        (0..)
            .find(|i| !self.used_indexes.contains(i))
            .unwrap_or(u32::MAX)
    }

    /// Remove a resource and delete its configuration.
    ///
    /// The resource announces its removal and closes before the group is
    /// deleted. The settings are released when the returned ticket is
    /// dropped, which first posts `SettingsDestroyed`.
    pub async fn remove_resource(
        &mut self,
        id: ResourceId,
        resources: &mut Resources,
    ) -> ResourceResult<RemovalTicket> {
        let settings = self
            .settings
            .remove(&id)
            .ok_or(ResourceError::UnknownResource(id))?;

        if let Some(mut resource) = resources.remove(id) {
            resource.remove_resource().await;
        }

        let group = settings.read().group().to_string();
        self.store.delete_group(&group);
        if let Err(e) = self.store.sync() {
            warn!(resource = %id, "Failed to write resource config: {}", e);
        }
        if let Some(index) = self.indexes.remove(&id) {
            self.used_indexes.remove(&index);
        }
        info!(resource = %id, group = %group, "Removed resource");

        Ok(RemovalTicket {
            id,
            settings: Some(settings),
            notifier: resources.context().notifier.clone(),
        })
    }
}

/// Holds the settings of a removed resource until dropped.
///
/// Dropping posts `SettingsDestroyed` and then frees the settings, so
/// listeners always hear of the destruction while the settings still exist.
#[derive(Debug)]
pub struct RemovalTicket {
    id: ResourceId,
    settings: Option<SharedSettings>,
    notifier: Notifier,
}

impl RemovalTicket {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// The settings the resource had when it was removed.
    pub fn settings(&self) -> Option<&SharedSettings> {
        self.settings.as_ref()
    }
}

impl Drop for RemovalTicket {
    fn drop(&mut self) {
        self.notifier.send(Notification::SettingsDestroyed(self.id));
        self.settings = None;
    }
}
