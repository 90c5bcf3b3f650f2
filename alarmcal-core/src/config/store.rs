//! Persistent store for resource configuration.
//!
//! A TOML document with one `[General]` table holding the last allocated
//! resource id, and one `[Resource_N]` table per configured resource.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{ResourceError, ResourceResult};

const GENERAL_GROUP: &str = "General";
const LAST_ID_KEY: &str = "last_id";
const RESOURCE_GROUP_PREFIX: &str = "Resource_";

#[derive(Debug)]
struct StoreFile {
    path: Option<PathBuf>,
    table: toml::Table,
}

/// Shared handle to the resource configuration file.
///
/// Cloning is cheap; all clones see the same document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<Mutex<StoreFile>>,
}

impl ConfigStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> ResourceResult<Self> {
        let path = path.into();

        let table = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content).map_err(|e| {
                ResourceError::Config(format!("Could not parse {}: {e}", path.display()))
            })?
        } else {
            toml::Table::new()
        };

        Ok(ConfigStore {
            inner: Arc::new(Mutex::new(StoreFile {
                path: Some(path),
                table,
            })),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        ConfigStore {
            inner: Arc::new(Mutex::new(StoreFile {
                path: None,
                table: toml::Table::new(),
            })),
        }
    }

    pub fn resource_group_name(index: u32) -> String {
        format!("{RESOURCE_GROUP_PREFIX}{index}")
    }

    /// All resource groups as (index, name), in ascending index order.
    pub fn resource_groups(&self) -> Vec<(u32, String)> {
        let inner = self.inner.lock();
        let mut groups: Vec<(u32, String)> = inner
            .table
            .keys()
            .filter_map(|name| {
                let index = name.strip_prefix(RESOURCE_GROUP_PREFIX)?.parse().ok()?;
                Some((index, name.clone()))
            })
            .collect();
        groups.sort();
        groups
    }

    pub fn has_group(&self, name: &str) -> bool {
        self.inner.lock().table.contains_key(name)
    }

    /// Deserialize a group. Ok(None) if the group doesn't exist.
    pub fn read_group<T: DeserializeOwned>(&self, name: &str) -> ResourceResult<Option<T>> {
        let inner = self.inner.lock();
        let Some(value) = inner.table.get(name) else {
            return Ok(None);
        };

        value
            .clone()
            .try_into()
            .map(Some)
            .map_err(|e| ResourceError::Config(format!("Invalid group [{name}]: {e}")))
    }

    pub fn write_group<T: Serialize>(&self, name: &str, value: &T) -> ResourceResult<()> {
        let value = toml::Value::try_from(value)
            .map_err(|e| ResourceError::Config(format!("Could not serialize [{name}]: {e}")))?;
        self.inner.lock().table.insert(name.to_string(), value);
        Ok(())
    }

    pub fn delete_group(&self, name: &str) {
        self.inner.lock().table.remove(name);
    }

    pub fn last_id(&self) -> i64 {
        let inner = self.inner.lock();
        inner
            .table
            .get(GENERAL_GROUP)
            .and_then(|g| g.get(LAST_ID_KEY))
            .and_then(|v| v.as_integer())
            .unwrap_or(0)
    }

    pub fn set_last_id(&self, id: i64) {
        let mut inner = self.inner.lock();
        let general = inner
            .table
            .entry(GENERAL_GROUP)
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        if let toml::Value::Table(general) = general {
            general.insert(LAST_ID_KEY.to_string(), toml::Value::Integer(id));
        }
    }

    /// Write the document to disk.
    pub fn sync(&self) -> ResourceResult<()> {
        let inner = self.inner.lock();
        let Some(path) = inner.path.as_ref() else {
            return Ok(());
        };

        let content = toml::to_string_pretty(&inner.table)
            .map_err(|e| ResourceError::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = path.with_extension("toml.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}
