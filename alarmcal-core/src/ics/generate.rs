//! ICS calendar generation.

use icalendar::{Calendar, Component, Property, ValueType};

use crate::constants::{COMMAND_PROPERTY, PRODUCT_ID, TYPE_PROPERTY, VERSION_PROPERTY};
use crate::event::{AlarmEvent, EventTime};
use crate::format::CURRENT_VERSION;

/// Generate .ics content for a set of events, in the current format.
///
/// The local-only command error annotation is never written.
pub fn generate_calendar<'a>(events: impl IntoIterator<Item = &'a AlarmEvent>) -> String {
    let mut cal = Calendar::new();

    for event in events {
        cal.push(to_ics_event(event));
    }

    let cal = cal.done();
    stamp_format(&cal.to_string())
}

fn to_ics_event(event: &AlarmEvent) -> icalendar::Event {
    let mut ics_event = icalendar::Event::new();
    ics_event.uid(&event.uid);
    ics_event.summary(&event.text);
    add_datetime_property(&mut ics_event, "DTSTART", &event.start);
    ics_event.add_property(TYPE_PROPERTY, event.category.as_ics_str());

    if let Some(ref rrule) = event.recurrence {
        ics_event.add_property("RRULE", rrule);
    }

    if let Some(ref command) = event.command {
        ics_event.add_property(COMMAND_PROPERTY, command);
    }

    for (key, value) in &event.custom_properties {
        ics_event.add_property(key, value);
    }

    ics_event.done()
}

/// Add a datetime property in the same form it was read: UTC, floating,
/// zoned or all-day.
fn add_datetime_property(ics_event: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            ics_event.append_property(prop);
        }
        EventTime::DateTimeUtc(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%SZ").to_string());
        }
        EventTime::DateTimeFloating(dt) => {
            ics_event.add_property(name, dt.format("%Y%m%dT%H%M%S").to_string());
        }
        EventTime::DateTimeZoned { datetime, tzid } => {
            let mut prop = Property::new(name, datetime.format("%Y%m%dT%H%M%S").to_string());
            prop.add_parameter("TZID", tzid);
            ics_event.append_property(prop);
        }
    }
}

/// Replace the icalendar crate's header with our format marker:
/// - PRODID identifies the application
/// - the version property records the storage format
/// - CALSCALE:GREGORIAN is dropped (it's the default)
fn stamp_format(ics: &str) -> String {
    let mut result = String::with_capacity(ics.len() + 96);

    for line in ics.lines() {
        if line.starts_with("PRODID:") || line == "CALSCALE:GREGORIAN" {
            continue;
        }

        result.push_str(line);
        result.push_str("\r\n");

        if line == "BEGIN:VCALENDAR" {
            result.push_str(&format!("PRODID:{}\r\n", PRODUCT_ID));
            result.push_str(&format!("{}:{}\r\n", VERSION_PROPERTY, CURRENT_VERSION));
        }
    }

    result
}
