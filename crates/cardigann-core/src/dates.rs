//! Date parsing helpers used by the date filters and the `date` field
//!
//! All parsed dates are rendered as RFC1123Z (`Mon, 02 Jan 2006 15:04:05 -0700`).
//! Times without an offset are taken as UTC.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use regex::Regex;

/// chrono format string for RFC1123Z
pub const RFC1123Z: &str = "%a, %d %b %Y %H:%M:%S %z";

pub fn format_rfc1123z(date: &DateTime<FixedOffset>) -> String {
    date.format(RFC1123Z).to_string()
}

/// Go reference-time tokens and their chrono equivalents, longest first
const GO_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Monday", "%A"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("Z0700", "%z"),
    ("-0700", "%z"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    (".999999", "%.f"),
    (".999", "%.f"),
    ("2006", "%Y"),
    ("Jan", "%b"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("_2", "%e"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%m"),
    ("2", "%d"),
    ("3", "%I"),
    ("4", "%M"),
    ("5", "%S"),
];

/// Converts a Go layout (`2006-01-02 15:04`) into a chrono format string
pub fn go_layout_to_chrono(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (token, format) in GO_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(format);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

/// Parses `value` with a Go layout
///
/// Missing years default to the year of `now`, missing dates to its day.
pub fn parse_with_layout(
    value: &str,
    layout: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<FixedOffset>> {
    let mut format = go_layout_to_chrono(layout);
    let mut value = value.trim().to_string();
    let has_date = ["%Y", "%y", "%m", "%d", "%e", "%b", "%B"]
        .iter()
        .any(|t| format.contains(t));
    if has_date && !format.contains("%Y") && !format.contains("%y") {
        format.push_str(" %Y");
        value.push_str(&format!(" {}", now.year()));
    }
    parse_with_format(&value, &format, now)
}

fn parse_with_format(
    value: &str,
    format: &str,
    now: DateTime<Utc>,
) -> Option<DateTime<FixedOffset>> {
    if let Ok(date) = DateTime::parse_from_str(value, format) {
        return Some(date);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
        return Some(utc(naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, format) {
        return Some(utc(date.and_time(NaiveTime::MIN)));
    }
    if let Ok(time) = NaiveTime::parse_from_str(value, format) {
        return Some(utc(now.date_naive().and_time(time)));
    }
    None
}

fn utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive).fixed_offset()
}

/// Parses relative times such as `2 hours, 5 min ago` or `yesterday`
pub fn parse_time_ago(value: &str, now: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
    let text = value.trim().to_lowercase();
    let text = text.replace(" and ", " ");
    let text = text.trim_end_matches("ago").trim();
    match text {
        "now" | "just now" | "today" => return Some(now.fixed_offset()),
        "yesterday" => return Some((now - Duration::days(1)).fixed_offset()),
        _ => {}
    }

    let Ok(part) = Regex::new(r"(\d+(?:[.,]\d+)?)\s*([a-z]+)") else {
        return None;
    };
    let mut offset = Duration::zero();
    let mut matched = false;
    for caps in part.captures_iter(text) {
        let amount: f64 = caps[1].replace(',', ".").parse().ok()?;
        let unit = &caps[2];
        let seconds = if unit.starts_with("mo") {
            30.0 * 86_400.0
        } else if unit.starts_with("mi") || unit == "m" {
            60.0
        } else if unit.starts_with('s') {
            1.0
        } else if unit.starts_with('h') {
            3_600.0
        } else if unit.starts_with('d') {
            86_400.0
        } else if unit.starts_with('w') {
            7.0 * 86_400.0
        } else if unit.starts_with('y') {
            365.0 * 86_400.0
        } else {
            return None;
        };
        let millis = amount * seconds * 1000.0;
        if !millis.is_finite() || millis >= i64::MAX as f64 {
            return None;
        }
        offset = offset.checked_add(&Duration::try_milliseconds(millis as i64)?)?;
        matched = true;
    }
    if !matched {
        return None;
    }
    now.checked_sub_signed(offset).map(|date| date.fixed_offset())
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M",
    "%d %B %Y %H:%M",
    "%b %d %Y %H:%M",
    "%b %d, %Y %H:%M",
    "%B %d, %Y %H:%M",
    "%a %b %d %H:%M:%S %Y",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%B %d %Y",
];

/// Best-effort parsing of dates in any common notation
pub fn parse_fuzzy(value: &str, now: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    let day_word = Regex::new(
        r"^(today|yesterday|tomorrow)\b[\s,at]*(\d{1,2}:\d{2}(?::\d{2})?)?\s*(am|pm)?$",
    )
    .ok()?;
    if let Some(caps) = day_word.captures(&lower) {
        let day = match &caps[1] {
            "yesterday" => now.date_naive() - Duration::days(1),
            "tomorrow" => now.date_naive() + Duration::days(1),
            _ => now.date_naive(),
        };
        let time = match caps.get(2) {
            Some(time) => {
                let time = NaiveTime::parse_from_str(time.as_str(), "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(time.as_str(), "%H:%M"))
                    .ok()?;
                match caps.get(3).map(|m| m.as_str()) {
                    Some("pm") if time.hour() < 12 => time + Duration::hours(12),
                    Some("am") if time.hour() == 12 => time - Duration::hours(12),
                    _ => time,
                }
            }
            None => NaiveTime::MIN,
        };
        return Some(utc(day.and_time(time)));
    }

    if lower.contains("ago") || lower == "now" || lower == "just now" {
        return parse_time_ago(&lower, now);
    }

    if trimmed.len() >= 9 && trimmed.len() <= 11 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let seconds: i64 = trimmed.parse().ok()?;
        return Utc.timestamp_opt(seconds, 0).single().map(|d| d.fixed_offset());
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(date);
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(date);
    }

    let ordinal = Regex::new(r"(\d)(st|nd|rd|th)\b").ok()?;
    let cleaned = ordinal.replace_all(trimmed, "$1");
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    for format in OFFSET_FORMATS {
        if let Ok(date) = DateTime::parse_from_str(&cleaned, format) {
            return Some(date);
        }
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, format) {
            return Some(utc(naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Some(utc(date.and_time(NaiveTime::MIN)));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_go_layout_conversion() {
        assert_eq!(go_layout_to_chrono("2006-01-02 15:04:05"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(go_layout_to_chrono("Jan 2, 2006"), "%b %d, %Y");
        assert_eq!(go_layout_to_chrono("Mon, 02 Jan 2006 15:04:05 -0700"), RFC1123Z);
        assert_eq!(go_layout_to_chrono("02/01/06 3:04 PM"), "%d/%m/%y %I:%M %p");
    }

    #[test]
    fn test_parse_with_layout() {
        let date = parse_with_layout("2021-07-04 18:30", "2006-01-02 15:04", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Sun, 04 Jul 2021 18:30:00 +0000");
    }

    #[test]
    fn test_parse_with_layout_and_offset() {
        let date =
            parse_with_layout("04.07.2021 18:30 +0200", "02.01.2006 15:04 -0700", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Sun, 04 Jul 2021 18:30:00 +0200");
    }

    #[test]
    fn test_parse_with_layout_without_year() {
        let date = parse_with_layout("Jul 4 18:30", "Jan 2 15:04", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Thu, 04 Jul 2024 18:30:00 +0000");
    }

    #[test]
    fn test_parse_with_layout_mismatch() {
        assert!(parse_with_layout("yesterday", "2006-01-02", now()).is_none());
    }

    #[test]
    fn test_time_ago() {
        let date = parse_time_ago("2 hours, 30 minutes ago", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Fri, 15 Mar 2024 09:30:00 +0000");
        let date = parse_time_ago("1 week ago", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Fri, 08 Mar 2024 12:00:00 +0000");
        let date = parse_time_ago("3 mo", now()).unwrap();
        assert_eq!(date.date_naive(), NaiveDate::from_ymd_opt(2023, 12, 16).unwrap());
        assert!(parse_time_ago("sometime", now()).is_none());
    }

    #[test]
    fn test_time_ago_out_of_range_is_none() {
        assert!(parse_time_ago("300000 years ago", now()).is_none());
        assert!(parse_time_ago("99999999999999999999 seconds ago", now()).is_none());
        assert!(parse_fuzzy("300000 years ago", now()).is_none());
        let date = parse_time_ago("200 years ago", now()).unwrap();
        assert_eq!(date.year(), 1824);
    }

    #[test]
    fn test_fuzzy_day_words() {
        let date = parse_fuzzy("Yesterday, 10:23", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Thu, 14 Mar 2024 10:23:00 +0000");
        let date = parse_fuzzy("today at 01:05 pm", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Fri, 15 Mar 2024 13:05:00 +0000");
    }

    #[test]
    fn test_fuzzy_common_formats() {
        let cases = [
            ("2023-01-31 08:15:00", "Tue, 31 Jan 2023 08:15:00 +0000"),
            ("31.01.2023 08:15", "Tue, 31 Jan 2023 08:15:00 +0000"),
            ("Jan 31st, 2023", "Tue, 31 Jan 2023 00:00:00 +0000"),
            ("Tue, 31 Jan 2023 08:15:00 +0100", "Tue, 31 Jan 2023 08:15:00 +0100"),
            ("2023-01-31T08:15:00Z", "Tue, 31 Jan 2023 08:15:00 +0000"),
            ("1675152900", "Tue, 31 Jan 2023 08:15:00 +0000"),
        ];
        for (input, expected) in cases {
            let date = parse_fuzzy(input, now()).unwrap_or_else(|| panic!("failed on {}", input));
            assert_eq!(format_rfc1123z(&date), expected, "input {}", input);
        }
    }

    #[test]
    fn test_fuzzy_ago() {
        let date = parse_fuzzy("5 mins ago", now()).unwrap();
        assert_eq!(format_rfc1123z(&date), "Fri, 15 Mar 2024 11:55:00 +0000");
    }

    #[test]
    fn test_fuzzy_garbage() {
        assert!(parse_fuzzy("not a date", now()).is_none());
        assert!(parse_fuzzy("   ", now()).is_none());
    }
}
