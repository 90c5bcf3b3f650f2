//! Calendar file generation and parsing.
//!
//! Calendars are RFC 5545 iCalendar files carrying the alarm format marker
//! (`PRODID` plus a version property) at calendar level.

mod generate;
mod parse;

pub use generate::generate_calendar;
pub use parse::{ParsedCalendar, parse_calendar, read_version};
