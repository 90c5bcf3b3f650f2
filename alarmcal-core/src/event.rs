//! Alarm event types.
//!
//! These are the records held in a resource's event cache. Recurrence rules
//! are carried as text and interpreted by whoever schedules the alarms.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The kind of alarm an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmType {
    /// Live, pending alarm
    Active,
    /// Expired or completed alarm kept as history
    Archived,
    /// Reusable pattern, never scheduled itself
    Template,
}

impl AlarmType {
    pub const ALL: [AlarmType; 3] = [AlarmType::Active, AlarmType::Archived, AlarmType::Template];

    pub fn as_ics_str(&self) -> &'static str {
        match self {
            AlarmType::Active => "ACTIVE",
            AlarmType::Archived => "ARCHIVED",
            AlarmType::Template => "TEMPLATE",
        }
    }

    pub fn from_ics_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(AlarmType::Active),
            "ARCHIVED" => Some(AlarmType::Archived),
            "TEMPLATE" => Some(AlarmType::Template),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            AlarmType::Active => 0b001,
            AlarmType::Archived => 0b010,
            AlarmType::Template => 0b100,
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AlarmType::Active => write!(f, "active"),
            AlarmType::Archived => write!(f, "archived"),
            AlarmType::Template => write!(f, "template"),
        }
    }
}

/// A set of alarm types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlarmTypes(u8);

impl AlarmTypes {
    pub const NONE: AlarmTypes = AlarmTypes(0);
    pub const ALL: AlarmTypes = AlarmTypes(0b111);

    pub fn contains(&self, ty: AlarmType) -> bool {
        self.0 & ty.bit() != 0
    }

    /// True if every type in `other` is also in `self`.
    pub fn contains_all(&self, other: AlarmTypes) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, ty: AlarmType) {
        self.0 |= ty.bit();
    }

    pub fn remove(&mut self, ty: AlarmType) {
        self.0 &= !ty.bit();
    }

    pub fn set(&mut self, ty: AlarmType, on: bool) {
        if on {
            self.insert(ty)
        } else {
            self.remove(ty)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = AlarmType> + '_ {
        AlarmType::ALL.into_iter().filter(|t| self.contains(*t))
    }

    pub fn to_vec(&self) -> Vec<AlarmType> {
        self.iter().collect()
    }
}

impl From<AlarmType> for AlarmTypes {
    fn from(ty: AlarmType) -> Self {
        AlarmTypes(ty.bit())
    }
}

impl FromIterator<AlarmType> for AlarmTypes {
    fn from_iter<I: IntoIterator<Item = AlarmType>>(iter: I) -> Self {
        let mut types = AlarmTypes::NONE;
        for ty in iter {
            types.insert(ty);
        }
        types
    }
}

impl BitOr for AlarmTypes {
    type Output = AlarmTypes;
    fn bitor(self, rhs: AlarmTypes) -> AlarmTypes {
        AlarmTypes(self.0 | rhs.0)
    }
}

impl BitOr<AlarmType> for AlarmTypes {
    type Output = AlarmTypes;
    fn bitor(self, rhs: AlarmType) -> AlarmTypes {
        AlarmTypes(self.0 | rhs.bit())
    }
}

impl BitOr for AlarmType {
    type Output = AlarmTypes;
    fn bitor(self, rhs: AlarmType) -> AlarmTypes {
        AlarmTypes(self.bit() | rhs.bit())
    }
}

impl BitOrAssign for AlarmTypes {
    fn bitor_assign(&mut self, rhs: AlarmTypes) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AlarmTypes {
    type Output = AlarmTypes;
    fn bitand(self, rhs: AlarmTypes) -> AlarmTypes {
        AlarmTypes(self.0 & rhs.0)
    }
}

impl Sub for AlarmTypes {
    type Output = AlarmTypes;
    fn sub(self, rhs: AlarmTypes) -> AlarmTypes {
        AlarmTypes(self.0 & !rhs.0)
    }
}

/// Classification of the last command execution failure for an event.
///
/// This is local-system state: it is kept in the resource settings, never in
/// the calendar file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandError {
    #[default]
    None,
    /// The main command failed
    Main,
    /// The pre-alarm action failed
    Pre,
    /// The post-alarm action failed
    Post,
    /// Both pre- and post-alarm actions failed
    PrePost,
}

impl CommandError {
    pub fn as_config_str(&self) -> &'static str {
        match self {
            CommandError::None => "none",
            CommandError::Main => "main",
            CommandError::Pre => "pre",
            CommandError::Post => "post",
            CommandError::PrePost => "prepost",
        }
    }

    pub fn from_config_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(CommandError::None),
            "main" => Some(CommandError::Main),
            "pre" => Some(CommandError::Pre),
            "post" => Some(CommandError::Post),
            "prepost" => Some(CommandError::PrePost),
            _ => None,
        }
    }
}

/// When an alarm is due, in the form the calendar file gave it.
///
/// Zoned and floating times are kept as written so that rewriting a file
/// never moves an alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTime {
    DateTimeUtc(DateTime<Utc>),
    /// Wall-clock time in the local zone, wherever that is
    DateTimeFloating(NaiveDateTime),
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
    /// All-day alarm
    Date(NaiveDate),
}

impl EventTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// The instant the alarm is due.
    ///
    /// Floating times and all-day dates are taken in the local zone. Returns
    /// None for an unknown TZID or a wall-clock time skipped by a DST change.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            EventTime::DateTimeUtc(dt) => Some(*dt),
            EventTime::DateTimeFloating(naive) => local_to_utc(naive),
            EventTime::DateTimeZoned { datetime, tzid } => {
                let tz: Tz = tzid.parse().ok()?;
                tz.from_local_datetime(datetime)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            }
            EventTime::Date(d) => local_to_utc(&d.and_hms_opt(0, 0, 0)?),
        }
    }
}

fn local_to_utc(naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

impl From<DateTime<Utc>> for EventTime {
    fn from(dt: DateTime<Utc>) -> Self {
        EventTime::DateTimeUtc(dt)
    }
}

impl From<NaiveDate> for EventTime {
    fn from(d: NaiveDate) -> Self {
        EventTime::Date(d)
    }
}

/// An alarm event as stored in a calendar resource.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmEvent {
    pub uid: String,
    pub category: AlarmType,
    /// Alarm message text (SUMMARY)
    pub text: String,
    pub start: EventTime,
    /// RRULE value, if the alarm recurs
    pub recurrence: Option<String>,
    /// Command to execute instead of displaying a message
    pub command: Option<String>,
    /// Unknown X- properties, preserved for round-tripping
    pub custom_properties: Vec<(String, String)>,
    /// Local-only annotation, never written to the calendar file
    pub command_error: CommandError,
}

impl AlarmEvent {
    pub fn new(category: AlarmType, text: &str, start: impl Into<EventTime>) -> Self {
        AlarmEvent {
            uid: format!("{}@alarmcal", uuid::Uuid::new_v4()),
            category,
            text: text.to_string(),
            start: start.into(),
            recurrence: None,
            command: None,
            custom_properties: Vec::new(),
            command_error: CommandError::None,
        }
    }

    pub fn with_uid(mut self, uid: &str) -> Self {
        self.uid = uid.to_string();
        self
    }
}

/// Event cache keyed by event uid.
pub type EventMap = BTreeMap<String, AlarmEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alarm_types_set_operations() {
        let mut types = AlarmType::Active | AlarmType::Template;
        assert!(types.contains(AlarmType::Active));
        assert!(!types.contains(AlarmType::Archived));

        types.remove(AlarmType::Active);
        assert_eq!(types, AlarmTypes::from(AlarmType::Template));

        let all = AlarmTypes::ALL;
        assert!(all.contains_all(types));
        assert_eq!(all - types, AlarmType::Active | AlarmType::Archived);
        assert_eq!(all.to_vec(), AlarmType::ALL.to_vec());
    }

    #[test]
    fn zoned_time_resolves_in_its_zone() {
        let datetime = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let berlin = EventTime::DateTimeZoned {
            datetime,
            tzid: "Europe/Berlin".to_string(),
        };
        assert_eq!(
            berlin.to_utc(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 9, 0, 0).unwrap())
        );

        let unknown = EventTime::DateTimeZoned {
            datetime,
            tzid: "Nowhere/Special".to_string(),
        };
        assert_eq!(unknown.to_utc(), None);
    }

    #[test]
    fn command_error_config_names() {
        for err in [
            CommandError::None,
            CommandError::Main,
            CommandError::Pre,
            CommandError::Post,
            CommandError::PrePost,
        ] {
            assert_eq!(CommandError::from_config_str(err.as_config_str()), Some(err));
        }
        assert_eq!(CommandError::from_config_str("bogus"), None);
    }
}
