//! Utilities for dealing with dates.

use std::fmt;
use chrono::{DateTime, TimeZone};
use chrono::format::{Item, Numeric, Pad};


//------------ Constructing ISO Dates ----------------------------------------

/// Formats a date in ISO 8601 format without a time zone.
///
/// This is used for log file timestamps in local time.
pub fn format_local_iso_date<Tz>(date: DateTime<Tz>) -> impl fmt::Display
where Tz: TimeZone, Tz::Offset: fmt::Display {
    const LOCAL_ISO_DATE: &[Item<'static>] = &[
        Item::Numeric(Numeric::Year, Pad::Zero),
        Item::Literal("-"),
        Item::Numeric(Numeric::Month, Pad::Zero),
        Item::Literal("-"),
        Item::Numeric(Numeric::Day, Pad::Zero),
        Item::Literal("T"),
        Item::Numeric(Numeric::Hour, Pad::Zero),
        Item::Literal(":"),
        Item::Numeric(Numeric::Minute, Pad::Zero),
        Item::Literal(":"),
        Item::Numeric(Numeric::Second, Pad::Zero),
    ];

    date.format_with_items(LOCAL_ISO_DATE.iter())
}


//============ Tests =========================================================
