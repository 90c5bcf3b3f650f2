//! Calendar storage format versions and compatibility.

use std::fmt;
use std::str::FromStr;

/// Storage format version stamped into calendar files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FormatVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        FormatVersion {
            major,
            minor,
            patch,
        }
    }
}

/// The format written by this version of the library.
pub const CURRENT_VERSION: FormatVersion = FormatVersion::new(2, 7, 0);

/// Oldest format that can still be converted to the current one.
pub const MIN_CONVERTIBLE_VERSION: FormatVersion = FormatVersion::new(1, 0, 0);

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for FormatVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |name: &str| -> Result<u32, String> {
            match parts.next() {
                Some(p) => p
                    .parse()
                    .map_err(|_| format!("Invalid {} in version '{}'", name, s)),
                None => Ok(0),
            }
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(format!("Too many components in version '{}'", s));
        }
        Ok(FormatVersion::new(major, minor, patch))
    }
}

/// How a calendar file's format relates to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Written in the current format
    Current,
    /// Old format, converted in memory while loading
    Converted,
    /// Old format, can be converted by rewriting the file
    Convertible,
    /// Not ours, or a format newer than we understand
    Incompatible,
}

impl Compatibility {
    /// True for the down-level formats that a format upgrade can fix.
    pub fn is_upgradable(&self) -> bool {
        matches!(self, Compatibility::Converted | Compatibility::Convertible)
    }
}

/// Compare a file's version tag against the current format.
///
/// `has_events` distinguishes a new, empty calendar (which is simply stamped
/// with the current version) from a populated calendar written by someone
/// else.
pub fn check_compatibility(version: Option<FormatVersion>, has_events: bool) -> Compatibility {
    match version {
        None if has_events => Compatibility::Incompatible,
        None => Compatibility::Current,
        Some(v) if v == CURRENT_VERSION => Compatibility::Current,
        Some(v) if v >= MIN_CONVERTIBLE_VERSION && v < CURRENT_VERSION => {
            Compatibility::Convertible
        }
        Some(_) => Compatibility::Incompatible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_version_strings() {
        assert_eq!("2.7.0".parse(), Ok(FormatVersion::new(2, 7, 0)));
        assert_eq!("1.9".parse(), Ok(FormatVersion::new(1, 9, 0)));
        assert!("2.x.0".parse::<FormatVersion>().is_err());
        assert!("1.2.3.4".parse::<FormatVersion>().is_err());
    }

    #[test]
    fn compatibility_by_version() {
        assert_eq!(
            check_compatibility(Some(CURRENT_VERSION), true),
            Compatibility::Current
        );
        assert_eq!(
            check_compatibility(Some(FormatVersion::new(2, 2, 9)), true),
            Compatibility::Convertible
        );
        assert_eq!(
            check_compatibility(Some(FormatVersion::new(3, 0, 0)), true),
            Compatibility::Incompatible
        );
        assert_eq!(
            check_compatibility(Some(FormatVersion::new(0, 9, 0)), false),
            Compatibility::Incompatible
        );
    }

    #[test]
    fn unversioned_calendar_is_new_only_when_empty() {
        assert_eq!(check_compatibility(None, false), Compatibility::Current);
        assert_eq!(check_compatibility(None, true), Compatibility::Incompatible);
    }
}
