use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Accepted timestamp layouts, tried in order; the first full match wins.
/// Layouts without a time of day resolve to midnight.
pub const DATE_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d-%m-%Y",
    "%d-%b-%Y %H:%M:%S",
    "%d-%b-%Y %H:%M",
    "%d-%b-%Y",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%d/%m/%Y %I:%M %p",
    "%d-%b-%Y %I:%M %p",
    "%d %b %Y",
];

fn has_time(format: &str) -> bool {
    format.contains("%H") || format.contains("%I")
}

/// Parse a timestamp as printed on a report.
///
/// Returns `None` for anything no layout accepts. A trailing `Z` or UTC
/// offset is accepted on ISO input and dropped; report times are wall-clock
/// times at the lab.
pub fn parse_report_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for format in DATE_FORMATS {
        let parsed = if has_time(format) {
            NaiveDateTime::parse_from_str(text, format).ok()
        } else {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        };
        if parsed.is_some() {
            return parsed;
        }
    }

    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_local())
}
