//! Persistent per-resource settings.
//!
//! Every mutator reports which categories of setting it changed so that the
//! owning resource and its listeners can react selectively.

mod types;

pub use types::{Changes, ResourceId, StorageType};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigStore;
use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmType, AlarmTypes, CommandError};
use crate::location::Location;

/// Settings shared between the config manager and the resource using them.
pub type SharedSettings = Arc<RwLock<ResourceSettings>>;

/// On-disk layout of one `[Resource_N]` group.
#[derive(Debug, Serialize, Deserialize)]
struct SettingsGroup {
    id: i64,
    storage_type: StorageType,
    path: String,
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_colour: Option<String>,
    #[serde(default)]
    alarm_types: Vec<AlarmType>,
    #[serde(default)]
    enabled_types: Vec<AlarmType>,
    #[serde(default)]
    standard_types: Vec<AlarmType>,
    #[serde(default)]
    read_only: bool,
    #[serde(default)]
    keep_format: bool,
    #[serde(default)]
    update_format: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    hash: String,
    /// "eventId:errorType" pairs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    command_errors: Vec<String>,
}

/// Durable configuration for one resource.
#[derive(Debug, Clone)]
pub struct ResourceSettings {
    store: Option<ConfigStore>,
    group: String,
    id: ResourceId,
    url: String,
    location: Option<Location>,
    storage_type: StorageType,
    display_name: String,
    display_location: String,
    alarm_types: AlarmTypes,
    enabled_types: AlarmTypes,
    standard_types: AlarmTypes,
    read_only: bool,
    background_colour: Option<String>,
    keep_format: bool,
    update_format: bool,
    hash: String,
    command_errors: BTreeMap<String, CommandError>,
}

impl ResourceSettings {
    /// Fresh settings for a newly added resource.
    pub fn new(
        store: Option<ConfigStore>,
        group: &str,
        id: ResourceId,
        url: &str,
        alarm_types: AlarmTypes,
    ) -> Self {
        ResourceSettings {
            store,
            group: group.to_string(),
            id,
            url: url.to_string(),
            location: Location::parse(url),
            storage_type: StorageType::File,
            display_name: String::new(),
            display_location: String::new(),
            alarm_types,
            enabled_types: alarm_types,
            standard_types: AlarmTypes::NONE,
            read_only: false,
            background_colour: None,
            keep_format: false,
            update_format: false,
            hash: String::new(),
            command_errors: BTreeMap::new(),
        }
    }

    /// Read settings from a config group.
    pub fn read_config(store: &ConfigStore, group: &str) -> ResourceResult<Self> {
        let data: SettingsGroup = store
            .read_group(group)?
            .ok_or_else(|| ResourceError::Config(format!("No group [{group}]")))?;

        let command_errors = data
            .command_errors
            .iter()
            .filter_map(|entry| {
                let parsed = entry.rsplit_once(':').and_then(|(uid, err)| {
                    CommandError::from_config_str(err).map(|err| (uid.to_string(), err))
                });
                if parsed.is_none() {
                    warn!(group, entry = %entry, "Ignoring malformed command error entry");
                }
                parsed
            })
            .filter(|(_, err)| *err != CommandError::None)
            .collect();

        let alarm_types: AlarmTypes = data.alarm_types.into_iter().collect();
        let enabled_types = data.enabled_types.into_iter().collect::<AlarmTypes>() & alarm_types;
        let standard_types =
            data.standard_types.into_iter().collect::<AlarmTypes>() & enabled_types;

        Ok(ResourceSettings {
            store: Some(store.clone()),
            group: group.to_string(),
            id: ResourceId(data.id),
            location: Location::parse(&data.path),
            url: data.path,
            storage_type: data.storage_type,
            display_name: data.name,
            display_location: String::new(),
            alarm_types,
            enabled_types,
            standard_types,
            read_only: data.read_only,
            background_colour: data.background_colour,
            keep_format: data.keep_format,
            update_format: data.update_format && !data.keep_format,
            hash: data.hash,
            command_errors,
        })
    }

    /// Write all fields to the config group and flush the store.
    pub fn save(&self) -> ResourceResult<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };

        let data = SettingsGroup {
            id: self.id.0,
            storage_type: self.storage_type,
            path: self.url.clone(),
            name: self.display_name.clone(),
            background_colour: self.background_colour.clone(),
            alarm_types: self.alarm_types.to_vec(),
            enabled_types: self.enabled_types.to_vec(),
            standard_types: self.standard_types.to_vec(),
            read_only: self.read_only,
            keep_format: self.keep_format,
            update_format: self.update_format,
            hash: self.hash.clone(),
            command_errors: self
                .command_errors
                .iter()
                .map(|(uid, err)| format!("{}:{}", uid, err.as_config_str()))
                .collect(),
        };

        store.write_group(&self.group, &data)?;
        store.sync()
    }

    /// Save, logging rather than returning any failure.
    pub fn save_logged(&self) {
        if let Err(e) = self.save() {
            warn!(resource = %self.id, "Failed to save resource settings: {}", e);
        }
    }

    /// Re-derive the location fields and check them against the filesystem.
    ///
    /// On a mismatch between the declared storage type and what the path
    /// actually is, the settings become permanently invalid.
    pub fn validate(&mut self) -> bool {
        if !self.id.is_valid() || self.storage_type == StorageType::NoStorage {
            return false;
        }

        self.location = Location::parse(&self.url);
        let Some(location) = self.location.as_ref() else {
            warn!(resource = %self.id, url = %self.url, "Malformed resource location");
            self.storage_type = StorageType::NoStorage;
            return false;
        };

        self.display_location = location.display_location();

        if !self.alarm_types.contains(AlarmType::Active) {
            self.command_errors.clear();
        }

        if let Location::Local(path) = location {
            if let Some(actual) = existing_storage_type(path) {
                if actual != self.storage_type {
                    warn!(
                        resource = %self.id,
                        path = %path.display(),
                        "Location type does not match configured storage type"
                    );
                    self.storage_type = StorageType::NoStorage;
                    return false;
                }
            }
        }

        if self.display_name.is_empty() {
            self.display_name = default_name(location);
        }
        true
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_valid() && self.storage_type != StorageType::NoStorage && self.location.is_some()
    }

    // GETTERS:

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    pub fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn display_location(&self) -> &str {
        &self.display_location
    }

    pub fn alarm_types(&self) -> AlarmTypes {
        self.alarm_types
    }

    pub fn enabled_types(&self) -> AlarmTypes {
        self.enabled_types
    }

    pub fn standard_types(&self) -> AlarmTypes {
        self.standard_types
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn background_colour(&self) -> Option<&str> {
        self.background_colour.as_deref()
    }

    pub fn keep_format(&self) -> bool {
        self.keep_format
    }

    pub fn update_format(&self) -> bool {
        self.update_format
    }

    pub fn hash(&self) -> Option<&str> {
        (!self.hash.is_empty()).then_some(self.hash.as_str())
    }

    // MUTATORS:

    /// Change the permitted alarm types. Narrowing also narrows the enabled
    /// and standard types.
    pub fn set_alarm_types(&mut self, types: AlarmTypes) -> Changes {
        if types == self.alarm_types {
            return Changes::NONE;
        }
        let mut changes = Changes::ALARM_TYPES;
        self.alarm_types = types;

        let enabled = self.enabled_types & types;
        if enabled != self.enabled_types {
            self.enabled_types = enabled;
            changes |= Changes::ENABLED;
        }
        let standard = self.standard_types & enabled;
        if standard != self.standard_types {
            self.standard_types = standard;
            changes |= Changes::STANDARD;
        }
        if !types.contains(AlarmType::Active) {
            self.command_errors.clear();
        }
        changes
    }

    pub fn set_enabled(&mut self, ty: AlarmType, enabled: bool) -> Changes {
        let mut types = self.enabled_types;
        types.set(ty, enabled);
        self.set_enabled_types(types)
    }

    /// Set the enabled types. A type that is disabled stops being standard.
    pub fn set_enabled_types(&mut self, types: AlarmTypes) -> Changes {
        let types = types & self.alarm_types;
        if types == self.enabled_types {
            return Changes::NONE;
        }
        let mut changes = Changes::ENABLED;
        self.enabled_types = types;

        let standard = self.standard_types & types;
        if standard != self.standard_types {
            self.standard_types = standard;
            changes |= Changes::STANDARD;
        }
        changes
    }

    pub fn set_standard(&mut self, ty: AlarmType, standard: bool) -> Changes {
        let mut types = self.standard_types;
        types.set(ty, standard);
        self.set_standard_types(types)
    }

    /// Set the standard types, limited to those enabled.
    pub fn set_standard_types(&mut self, types: AlarmTypes) -> Changes {
        let types = types & self.enabled_types;
        if types == self.standard_types {
            return Changes::NONE;
        }
        self.standard_types = types;
        Changes::STANDARD
    }

    pub fn set_read_only(&mut self, read_only: bool) -> Changes {
        if read_only == self.read_only {
            return Changes::NONE;
        }
        self.read_only = read_only;
        Changes::READ_ONLY
    }

    /// Keeping the original format cancels any requested format update.
    pub fn set_keep_format(&mut self, keep: bool) -> Changes {
        if keep == self.keep_format {
            return Changes::NONE;
        }
        self.keep_format = keep;
        let mut changes = Changes::KEEP_FORMAT;
        if keep && self.update_format {
            self.update_format = false;
            changes |= Changes::UPDATE_FORMAT;
        }
        changes
    }

    /// Requesting a format update cancels keeping the original format.
    pub fn set_update_format(&mut self, update: bool) -> Changes {
        if update == self.update_format {
            return Changes::NONE;
        }
        self.update_format = update;
        let mut changes = Changes::UPDATE_FORMAT;
        if update && self.keep_format {
            self.keep_format = false;
            changes |= Changes::KEEP_FORMAT;
        }
        changes
    }

    pub fn set_background_colour(&mut self, colour: Option<&str>) -> Changes {
        if colour == self.background_colour.as_deref() {
            return Changes::NONE;
        }
        self.background_colour = colour.map(String::from);
        Changes::BACKGROUND_COLOUR
    }

    pub fn set_display_name(&mut self, name: &str) -> Changes {
        if name == self.display_name {
            return Changes::NONE;
        }
        self.display_name = name.to_string();
        Changes::NAME
    }

    /// Change the location. The caller must check `validate()` afterwards.
    pub fn set_url(&mut self, url: &str) -> Changes {
        if url == self.url {
            return Changes::NONE;
        }
        self.url = url.to_string();
        self.location = Location::parse(url);
        Changes::LOCATION
    }

    /// Whether moving to `url` would keep these settings valid.
    pub fn accepts_location(&self, url: &str) -> bool {
        if self.storage_type == StorageType::NoStorage {
            return false;
        }
        match Location::parse(url) {
            None => false,
            Some(Location::Local(path)) => {
                existing_storage_type(&path).is_none_or(|actual| actual == self.storage_type)
            }
            Some(Location::Remote(_)) => true,
        }
    }

    pub fn set_hash(&mut self, hash: &str) -> Changes {
        if hash == self.hash {
            return Changes::NONE;
        }
        self.hash = hash.to_string();
        Changes::HASH
    }

    // COMMAND ERRORS:

    pub fn command_error(&self, event_id: &str) -> CommandError {
        self.command_errors
            .get(event_id)
            .copied()
            .unwrap_or(CommandError::None)
    }

    pub fn command_errors(&self) -> &BTreeMap<String, CommandError> {
        &self.command_errors
    }

    /// Record an event's command error. Returns true if anything changed.
    pub fn set_command_error(&mut self, event_id: &str, error: CommandError) -> bool {
        if error == CommandError::None {
            return self.command_errors.remove(event_id).is_some();
        }
        if !self.alarm_types.contains(AlarmType::Active) {
            return false;
        }
        self.command_errors.insert(event_id.to_string(), error) != Some(error)
    }

    /// Keep only the command errors for which `keep` returns true.
    /// Returns true if any were removed.
    pub fn retain_command_errors(&mut self, mut keep: impl FnMut(&str) -> bool) -> bool {
        let before = self.command_errors.len();
        self.command_errors.retain(|uid, _| keep(uid));
        self.command_errors.len() != before
    }
}

fn default_name(location: &Location) -> String {
    let name = match location {
        Location::Local(path) => file_stem(path),
        Location::Remote(url) => url
            .path_segments()
            .and_then(|mut s| s.next_back().map(String::from))
            .filter(|s| !s.is_empty())
            .and_then(|s| file_stem(Path::new(&s))),
    };
    name.unwrap_or_else(|| location.display_location())
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

/// What an existing local path holds, or None if nothing is there yet.
fn existing_storage_type(path: &Path) -> Option<StorageType> {
    if !path.exists() {
        None
    } else if path.is_dir() {
        Some(StorageType::Directory)
    } else {
        Some(StorageType::File)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> ResourceSettings {
        ResourceSettings::new(None, "Resource_0", ResourceId::file_resource(1), url, AlarmTypes::ALL)
    }

    fn assert_invariant(s: &ResourceSettings) {
        assert!(s.enabled_types().contains_all(s.standard_types()));
        assert!(s.alarm_types().contains_all(s.enabled_types()));
    }

    #[test]
    fn disabling_a_type_clears_standard() {
        let mut s = settings("/tmp/a.ics");
        s.set_standard(AlarmType::Active, true);
        assert!(s.standard_types().contains(AlarmType::Active));

        let changes = s.set_enabled(AlarmType::Active, false);
        assert!(changes.contains(Changes::ENABLED | Changes::STANDARD));
        assert!(!s.standard_types().contains(AlarmType::Active));
        assert_invariant(&s);
    }

    #[test]
    fn standard_is_limited_to_enabled_types() {
        let mut s = settings("/tmp/a.ics");
        s.set_enabled_types(AlarmType::Archived.into());
        let changes = s.set_standard_types(AlarmTypes::ALL);
        assert_eq!(changes, Changes::STANDARD);
        assert_eq!(s.standard_types(), AlarmType::Archived.into());
        assert_eq!(s.set_standard(AlarmType::Active, true), Changes::NONE);
        assert_invariant(&s);
    }

    #[test]
    fn narrowing_alarm_types_narrows_enabled_and_standard() {
        let mut s = settings("/tmp/a.ics");
        s.set_standard_types(AlarmTypes::ALL);
        s.set_command_error("ev1", CommandError::Main);

        let changes = s.set_alarm_types(AlarmType::Template.into());
        assert!(changes.contains(Changes::ALARM_TYPES | Changes::ENABLED | Changes::STANDARD));
        assert_eq!(s.enabled_types(), AlarmType::Template.into());
        assert_eq!(s.standard_types(), AlarmType::Template.into());
        assert!(s.command_errors().is_empty());
        assert_invariant(&s);

        // Widening leaves enabled/standard alone.
        let changes = s.set_alarm_types(AlarmTypes::ALL);
        assert_eq!(changes, Changes::ALARM_TYPES);
        assert_eq!(s.enabled_types(), AlarmType::Template.into());
    }

    #[test]
    fn invariant_holds_for_mixed_sequences() {
        let mut s = settings("/tmp/a.ics");
        let steps: Vec<Box<dyn Fn(&mut ResourceSettings)>> = vec![
            Box::new(|s| {
                s.set_standard_types(AlarmTypes::ALL);
            }),
            Box::new(|s| {
                s.set_enabled(AlarmType::Archived, false);
            }),
            Box::new(|s| {
                s.set_alarm_types(AlarmType::Active | AlarmType::Archived);
            }),
            Box::new(|s| {
                s.set_enabled_types(AlarmTypes::ALL);
            }),
            Box::new(|s| {
                s.set_standard(AlarmType::Template, true);
            }),
            Box::new(|s| {
                s.set_alarm_types(AlarmTypes::NONE);
            }),
        ];
        for step in steps {
            step(&mut s);
            assert_invariant(&s);
        }
    }

    #[test]
    fn keep_and_update_format_are_exclusive() {
        let mut s = settings("/tmp/a.ics");
        s.set_update_format(true);
        let changes = s.set_keep_format(true);
        assert!(changes.contains(Changes::KEEP_FORMAT | Changes::UPDATE_FORMAT));
        assert!(!s.update_format());

        s.set_update_format(true);
        assert!(!s.keep_format());
    }

    #[test]
    fn validate_rejects_storage_type_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut s = settings(&dir.path().display().to_string());
        assert!(!s.validate());
        assert_eq!(s.storage_type(), StorageType::NoStorage);
        assert!(!s.is_valid());

        // Permanently invalid, even if the location is corrected.
        s.set_url(&dir.path().join("cal.ics").display().to_string());
        assert!(!s.validate());
    }

    #[test]
    fn accepts_location_checks_storage_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let s = settings(&dir.path().join("a.ics").display().to_string());
        assert!(s.accepts_location(&dir.path().join("b.ics").display().to_string()));
        assert!(s.accepts_location("https://example.com/cal.ics"));
        assert!(!s.accepts_location(&dir.path().display().to_string()));
        assert!(!s.accepts_location("not a path"));
    }

    #[test]
    fn validate_derives_display_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reminders.ics");
        let mut s = settings(&path.display().to_string());
        assert!(s.validate());
        assert_eq!(s.display_name(), "reminders");
        assert_eq!(s.display_location(), path.display().to_string());
        assert!(s.is_valid());

        let mut bad = settings("not a path");
        assert!(!bad.validate());
    }

    #[test]
    fn command_errors_need_active_type() {
        let mut s = settings("/tmp/a.ics");
        assert!(s.set_command_error("ev1", CommandError::Pre));
        assert!(!s.set_command_error("ev1", CommandError::Pre));
        assert_eq!(s.command_error("ev1"), CommandError::Pre);
        assert!(s.set_command_error("ev1", CommandError::None));
        assert_eq!(s.command_error("ev1"), CommandError::None);

        s.set_alarm_types(AlarmType::Archived.into());
        assert!(!s.set_command_error("ev2", CommandError::Main));
    }

    #[test]
    fn config_roundtrip() {
        let store = ConfigStore::in_memory();
        let mut s = ResourceSettings::new(
            Some(store.clone()),
            "Resource_2",
            ResourceId::file_resource(3),
            "/tmp/alarms.ics",
            AlarmType::Active | AlarmType::Template,
        );
        s.set_standard(AlarmType::Active, true);
        s.set_read_only(true);
        s.set_background_colour(Some("#ff0000"));
        s.set_hash("abc123");
        s.set_command_error("ev1", CommandError::PrePost);
        s.save().unwrap();

        let read = ResourceSettings::read_config(&store, "Resource_2").unwrap();
        assert_eq!(read.id(), ResourceId::file_resource(3));
        assert_eq!(read.alarm_types(), AlarmType::Active | AlarmType::Template);
        assert_eq!(read.standard_types(), AlarmType::Active.into());
        assert!(read.read_only());
        assert_eq!(read.background_colour(), Some("#ff0000"));
        assert_eq!(read.hash(), Some("abc123"));
        assert_eq!(read.command_error("ev1"), CommandError::PrePost);
    }

    #[test]
    fn read_config_enforces_subset_invariant() {
        let store = ConfigStore::in_memory();
        store
            .write_group(
                "Resource_0",
                &SettingsGroup {
                    id: ResourceId::file_resource(1).0,
                    storage_type: StorageType::File,
                    path: "/tmp/a.ics".into(),
                    name: String::new(),
                    background_colour: None,
                    alarm_types: vec![AlarmType::Active],
                    enabled_types: vec![AlarmType::Active, AlarmType::Archived],
                    standard_types: vec![AlarmType::Archived, AlarmType::Active],
                    read_only: false,
                    keep_format: true,
                    update_format: true,
                    hash: String::new(),
                    command_errors: vec!["ev1:main".into(), "garbage".into()],
                },
            )
            .unwrap();

        let s = ResourceSettings::read_config(&store, "Resource_0").unwrap();
        assert_eq!(s.enabled_types(), AlarmType::Active.into());
        assert_eq!(s.standard_types(), AlarmType::Active.into());
        assert!(!s.update_format());
        assert_eq!(s.command_errors().len(), 1);
    }
}
