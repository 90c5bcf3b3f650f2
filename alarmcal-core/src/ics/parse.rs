//! ICS calendar parsing using the icalendar crate's parser.

use icalendar::{
    DatePerhapsTime,
    parser::{Component, Property, read_calendar, unfold},
};
use tracing::warn;

use crate::constants::{COMMAND_PROPERTY, TYPE_PROPERTY, VERSION_PROPERTY};
use crate::error::{ResourceError, ResourceResult};
use crate::event::{AlarmEvent, AlarmType, CommandError, EventTime};
use crate::format::{Compatibility, FormatVersion, check_compatibility};

/// The result of parsing a calendar file.
#[derive(Debug, Clone)]
pub struct ParsedCalendar {
    pub version: Option<FormatVersion>,
    pub compatibility: Compatibility,
    pub events: Vec<AlarmEvent>,
}

impl ParsedCalendar {
    /// True for a calendar with neither a format marker nor events.
    pub fn is_new(&self) -> bool {
        self.version.is_none() && self.events.is_empty()
    }
}

/// Parse calendar file content.
///
/// Empty content is a valid, new calendar. Events from a convertible older
/// format are converted in memory; if that changed anything the result is
/// reported as `Converted` rather than `Convertible`.
pub fn parse_calendar(content: &str) -> ResourceResult<ParsedCalendar> {
    if content.trim().is_empty() {
        return Ok(ParsedCalendar {
            version: None,
            compatibility: Compatibility::Current,
            events: Vec::new(),
        });
    }

    if !content.contains("BEGIN:VCALENDAR") {
        return Err(ResourceError::IcsParse("Missing VCALENDAR component".into()));
    }

    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).map_err(ResourceError::IcsParse)?;

    let (properties, components) =
        match calendar.components.iter().find(|c| c.name == "VCALENDAR") {
            Some(root) => (&root.properties, &root.components),
            None => (&calendar.properties, &calendar.components),
        };

    let version_tag = properties
        .iter()
        .find(|p| p.name == VERSION_PROPERTY)
        .map(|p| p.val.to_string());

    let vevents: Vec<&Component> = components.iter().filter(|c| c.name == "VEVENT").collect();

    let (version, mut compatibility) = match version_tag {
        Some(tag) => match tag.parse::<FormatVersion>() {
            Ok(v) => (Some(v), check_compatibility(Some(v), !vevents.is_empty())),
            Err(e) => {
                warn!(version = %tag, "Unrecognised calendar version: {}", e);
                (None, Compatibility::Incompatible)
            }
        },
        None => (None, check_compatibility(None, !vevents.is_empty())),
    };

    let legacy = compatibility == Compatibility::Convertible;
    let mut converted = false;
    let mut events = Vec::with_capacity(vevents.len());

    for vevent in vevents {
        match parse_event(vevent, legacy) {
            Some((event, derived)) => {
                converted |= derived;
                events.push(event);
            }
            None => warn!("Skipping event without UID or valid DTSTART"),
        }
    }

    if converted {
        compatibility = Compatibility::Converted;
    }

    Ok(ParsedCalendar {
        version,
        compatibility,
        events,
    })
}

/// Read just the format version of calendar content, as used to re-check a
/// file before rewriting it in the current format.
pub fn read_version(content: &str) -> ResourceResult<(Option<FormatVersion>, Compatibility)> {
    let parsed = parse_calendar(content)?;
    Ok((parsed.version, parsed.compatibility))
}

/// Parse a VEVENT into an AlarmEvent.
///
/// Returns the event and whether its category had to be derived from a legacy
/// UID suffix.
fn parse_event(vevent: &Component, legacy: bool) -> Option<(AlarmEvent, bool)> {
    let uid = vevent.find_prop("UID")?.val.to_string();
    let text = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_default();
    let start = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);

    let mut derived = false;
    let category = match vevent
        .find_prop(TYPE_PROPERTY)
        .and_then(|p| AlarmType::from_ics_str(p.val.as_ref()))
    {
        Some(category) => category,
        None if legacy => {
            derived = true;
            legacy_category(&uid)
        }
        None => AlarmType::Active,
    };

    let recurrence = vevent.find_prop("RRULE").map(|p| p.val.to_string());
    let command = vevent.find_prop(COMMAND_PROPERTY).map(|p| p.val.to_string());

    // Custom X- properties (preserved for round-tripping)
    let custom_properties: Vec<(String, String)> = vevent
        .properties
        .iter()
        .filter(|p| is_custom_property(p))
        .map(|p| (p.name.to_string(), p.val.to_string()))
        .collect();

    let event = AlarmEvent {
        uid,
        category,
        text,
        start,
        recurrence,
        command,
        custom_properties,
        command_error: CommandError::None,
    };
    Some((event, derived))
}

fn is_custom_property(prop: &Property) -> bool {
    let name = prop.name.as_ref();
    name.starts_with("X-") && name != TYPE_PROPERTY && name != COMMAND_PROPERTY
}

/// Old calendars encoded the alarm category in the UID.
fn legacy_category(uid: &str) -> AlarmType {
    if uid.contains("-exp-") {
        AlarmType::Archived
    } else if uid.contains("-tmpl-") {
        AlarmType::Template
    } else {
        AlarmType::Active
    }
}

/// Convert icalendar's DatePerhapsTime to our EventTime, keeping the zone.
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::CURRENT_VERSION;
    use crate::ics::generate_calendar;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample_event(uid: &str, category: AlarmType) -> AlarmEvent {
        AlarmEvent::new(
            category,
            "Water the plants",
            Utc.with_ymd_and_hms(2025, 3, 20, 15, 0, 0).unwrap(),
        )
        .with_uid(uid)
    }

    #[test]
    fn empty_content_is_a_new_calendar() {
        let parsed = parse_calendar("").unwrap();
        assert!(parsed.is_new());
        assert_eq!(parsed.compatibility, Compatibility::Current);
    }

    #[test]
    fn generated_calendar_roundtrips() {
        let mut active = sample_event("a-1", AlarmType::Active);
        active.recurrence = Some("FREQ=DAILY;COUNT=3".to_string());
        active.command = Some("notify-send hello".to_string());
        active
            .custom_properties
            .push(("X-KDE-KALARM-FONTCOLOR".to_string(), "red".to_string()));
        let template = sample_event("t-1", AlarmType::Template);

        let ics = generate_calendar([&active, &template]);
        let parsed = parse_calendar(&ics).expect("Should parse generated calendar");

        assert_eq!(parsed.version, Some(CURRENT_VERSION));
        assert_eq!(parsed.compatibility, Compatibility::Current);
        assert_eq!(parsed.events.len(), 2);
        let reparsed = parsed.events.iter().find(|e| e.uid == "a-1").unwrap();
        assert_eq!(reparsed, &active);
    }

    #[test]
    fn zoned_and_all_day_starts_roundtrip() {
        let zoned = AlarmEvent::new(
            AlarmType::Active,
            "Standup",
            EventTime::DateTimeZoned {
                datetime: NaiveDate::from_ymd_opt(2020, 1, 1)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap(),
                tzid: "Europe/Berlin".to_string(),
            },
        )
        .with_uid("zoned");
        let all_day = AlarmEvent::new(
            AlarmType::Active,
            "Birthday",
            NaiveDate::from_ymd_opt(2020, 6, 15).unwrap(),
        )
        .with_uid("all-day");
        let mut floating = sample_event("floating", AlarmType::Active);
        floating.start = EventTime::DateTimeFloating(
            NaiveDate::from_ymd_opt(2020, 3, 1)
                .unwrap()
                .and_hms_opt(7, 30, 0)
                .unwrap(),
        );

        let ics = generate_calendar([&zoned, &all_day, &floating]);
        assert!(ics.contains("DTSTART;TZID=Europe/Berlin:20200101T100000\r\n"));
        assert!(ics.contains("DTSTART;VALUE=DATE:20200615\r\n"));
        assert!(ics.contains("DTSTART:20200301T073000\r\n"));

        let parsed = parse_calendar(&ics).unwrap();
        for original in [&zoned, &all_day, &floating] {
            let reparsed = parsed.events.iter().find(|e| e.uid == original.uid).unwrap();
            assert_eq!(reparsed.start, original.start);
        }
    }

    #[test]
    fn legacy_zoned_start_keeps_its_zone() {
        let ics = "BEGIN:VCALENDAR\r\n\
PRODID:-//K Desktop Environment//NONSGML KAlarm//EN\r\n\
X-KDE-KALARM-VERSION:2.0.0\r\n\
BEGIN:VEVENT\r\n\
UID:KAlarm-1\r\n\
SUMMARY:Old alarm\r\n\
DTSTART;TZID=Europe/Berlin:20200101T100000\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let parsed = parse_calendar(ics).unwrap();
        let start = &parsed.events[0].start;
        assert_eq!(
            start.to_utc(),
            Some(Utc.with_ymd_and_hms(2020, 1, 1, 9, 0, 0).unwrap())
        );

        let rewritten = generate_calendar(&parsed.events);
        assert!(rewritten.contains("DTSTART;TZID=Europe/Berlin:20200101T100000\r\n"));
        assert!(!rewritten.contains("DTSTART:20200101T100000Z"));
    }

    #[test]
    fn foreign_calendar_is_incompatible() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Other//App//EN\r\n\
BEGIN:VEVENT\r\n\
UID:x-1\r\n\
SUMMARY:Meeting\r\n\
DTSTART:20240101T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let parsed = parse_calendar(ics).unwrap();
        assert_eq!(parsed.compatibility, Compatibility::Incompatible);
        assert_eq!(parsed.events.len(), 1);
    }

    #[test]
    fn legacy_calendar_derives_categories() {
        let ics = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//K Desktop Environment//NONSGML KAlarm//EN\r\n\
X-KDE-KALARM-VERSION:1.9.10\r\n\
BEGIN:VEVENT\r\n\
UID:KAlarm-exp-1234\r\n\
SUMMARY:Old alarm\r\n\
DTSTART:20090101T100000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let parsed = parse_calendar(ics).unwrap();
        assert_eq!(parsed.version, Some(FormatVersion::new(1, 9, 10)));
        assert_eq!(parsed.compatibility, Compatibility::Converted);
        assert_eq!(parsed.events[0].category, AlarmType::Archived);
    }

    #[test]
    fn legacy_calendar_with_categories_is_convertible() {
        let ics = "BEGIN:VCALENDAR\r\n\
PRODID:-//K Desktop Environment//NONSGML KAlarm//EN\r\n\
X-KDE-KALARM-VERSION:2.2.9\r\n\
BEGIN:VEVENT\r\n\
UID:abc\r\n\
SUMMARY:Old alarm\r\n\
DTSTART:20090101T100000Z\r\n\
X-KDE-KALARM-TYPE:TEMPLATE\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

        let (version, compat) = read_version(ics).unwrap();
        assert_eq!(version, Some(FormatVersion::new(2, 2, 9)));
        assert_eq!(compat, Compatibility::Convertible);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(parse_calendar("this is not a calendar").is_err());
    }
}
