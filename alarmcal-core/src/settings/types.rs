//! Small value types used by resource settings.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::constants::FILE_RESOURCE_FLAG;

/// Unique, persistent resource identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub i64);

impl ResourceId {
    pub const INVALID: ResourceId = ResourceId(-1);

    /// Id for the nth file resource allocated.
    pub fn file_resource(n: i64) -> Self {
        ResourceId(n | FILE_RESOURCE_FLAG)
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }

    pub fn is_file_resource(&self) -> bool {
        self.is_valid() && self.0 & FILE_RESOURCE_FLAG != 0
    }

    /// The id with the file resource flag removed.
    pub fn counter(&self) -> i64 {
        self.0 & !FILE_RESOURCE_FLAG
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// A single calendar file
    File,
    /// A directory of calendar files (not implemented by any resource)
    Directory,
    /// Invalid configuration
    #[serde(skip)]
    NoStorage,
}

/// Which settings a mutation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Changes(u16);

impl Changes {
    pub const NONE: Changes = Changes(0);
    pub const ALARM_TYPES: Changes = Changes(1 << 0);
    pub const ENABLED: Changes = Changes(1 << 1);
    pub const STANDARD: Changes = Changes(1 << 2);
    pub const READ_ONLY: Changes = Changes(1 << 3);
    pub const KEEP_FORMAT: Changes = Changes(1 << 4);
    pub const UPDATE_FORMAT: Changes = Changes(1 << 5);
    pub const BACKGROUND_COLOUR: Changes = Changes(1 << 6);
    pub const NAME: Changes = Changes(1 << 7);
    pub const HASH: Changes = Changes(1 << 8);
    pub const LOCATION: Changes = Changes(1 << 9);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Changes) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any flag in `other` is set.
    pub fn intersects(&self, other: Changes) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Changes {
    type Output = Changes;
    fn bitor(self, rhs: Changes) -> Changes {
        Changes(self.0 | rhs.0)
    }
}

impl BitOrAssign for Changes {
    fn bitor_assign(&mut self, rhs: Changes) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_resource_ids_carry_flag() {
        let id = ResourceId::file_resource(5);
        assert!(id.is_valid());
        assert!(id.is_file_resource());
        assert_eq!(id.counter(), 5);
        assert!(!ResourceId(5).is_file_resource());
        assert!(!ResourceId::INVALID.is_valid());
    }

    #[test]
    fn changes_combine() {
        let changes = Changes::ENABLED | Changes::STANDARD;
        assert!(changes.contains(Changes::ENABLED));
        assert!(!changes.contains(Changes::ENABLED | Changes::NAME));
        assert!(changes.intersects(Changes::ENABLED | Changes::NAME));
        assert!(Changes::NONE.is_empty());
    }
}
