//! Flexible date parsing for search filters.
//!
//! Accepts ISO and slash dates, month-name forms in several orders,
//! `today`/`yesterday`/`tomorrow`, and `"N days ago"`. Day-of-month validity
//! is enforced, so `31-February-2025` is a parse error rather than a rollover.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;

use crate::error::{Error, Result};

const STANDARD_FORMATS: &[&str] = &[
    "%Y-%m-%d", // YYYY-MM-DD
    "%Y/%m/%d", // YYYY/MM/DD
    "%m-%d-%Y", // MM-DD-YYYY
    "%m/%d/%Y", // MM/DD/YYYY
    "%d-%m-%Y", // DD-MM-YYYY
    "%d/%m/%Y", // DD/MM/YYYY
    "%b %d, %Y", // Jan 2, 2006
    "%B %d, %Y", // January 2, 2006
    "%d %b %Y", // 2 Jan 2006
    "%d %B %Y", // 2 January 2006
];

fn month_number(name: &str) -> Option<u32> {
    match name.to_lowercase().as_str() {
        "january" | "jan" => Some(1),
        "february" | "feb" => Some(2),
        "march" | "mar" => Some(3),
        "april" | "apr" => Some(4),
        "may" => Some(5),
        "june" | "jun" => Some(6),
        "july" | "jul" => Some(7),
        "august" | "aug" => Some(8),
        "september" | "sep" | "sept" => Some(9),
        "october" | "oct" => Some(10),
        "november" | "nov" => Some(11),
        "december" | "dec" => Some(12),
        _ => None,
    }
}

fn to_result(date: NaiveDate) -> (DateTime<Utc>, String) {
    let instant = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight always exists")
        .and_utc();
    (instant, date.format("%Y-%m-%d").to_string())
}

/// Parse one of the accepted date shapes, returning the UTC-midnight instant
/// and the canonical `YYYY-MM-DD` rendering. Month-only inputs resolve to the
/// first of the month.
pub fn parse_flexible_date(date_str: &str) -> Result<(DateTime<Utc>, String)> {
    let date_str = date_str.trim();

    for format in STANDARD_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, format) {
            return Ok(to_result(date));
        }
    }

    // "July 2025" / "2025 July"
    let month_year =
        Regex::new(r"^(\d{4})\s+([a-zA-Z]+)$|^([a-zA-Z]+)\s+(\d{4})$").expect("static regex");
    if let Some(caps) = month_year.captures(date_str) {
        let (year, month_name) = match (caps.get(1), caps.get(2)) {
            (Some(y), Some(m)) => (y.as_str(), m.as_str()),
            _ => (&caps[4], &caps[3]),
        };
        if let (Ok(year), Some(month)) = (year.parse::<i32>(), month_number(month_name)) {
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
                return Ok(to_result(date));
            }
        }
    }

    // "1-July-2025" / "1 July 2025"
    let day_month_year =
        Regex::new(r"^(\d{1,2})[-\s]+([a-zA-Z]+)[-\s]+(\d{4})$").expect("static regex");
    if let Some(caps) = day_month_year.captures(date_str) {
        if let Some(date) = ymd_from_parts(&caps[3], &caps[2], &caps[1]) {
            return Ok(to_result(date));
        }
        return Err(Error::BadRequest(format!("unable to parse date: {date_str}")));
    }

    // "July-25-2025" / "July 25 2025"
    let month_day_year =
        Regex::new(r"^([a-zA-Z]+)[-\s]+(\d{1,2})[-\s]+(\d{4})$").expect("static regex");
    if let Some(caps) = month_day_year.captures(date_str) {
        if let Some(date) = ymd_from_parts(&caps[3], &caps[1], &caps[2]) {
            return Ok(to_result(date));
        }
        return Err(Error::BadRequest(format!("unable to parse date: {date_str}")));
    }

    // "2025 July 10"
    let year_month_day =
        Regex::new(r"^(\d{4})[-\s]+([a-zA-Z]+)[-\s]+(\d{1,2})$").expect("static regex");
    if let Some(caps) = year_month_day.captures(date_str) {
        if let Some(date) = ymd_from_parts(&caps[1], &caps[2], &caps[3]) {
            return Ok(to_result(date));
        }
        return Err(Error::BadRequest(format!("unable to parse date: {date_str}")));
    }

    let lower = date_str.to_lowercase();
    let today = Utc::now().date_naive();
    match lower.as_str() {
        "today" => return Ok(to_result(today)),
        "yesterday" => return Ok(to_result(today - Duration::days(1))),
        "tomorrow" => return Ok(to_result(today + Duration::days(1))),
        _ => {}
    }

    let days_ago = Regex::new(r"^(\d+)\s+days?\s+ago$").expect("static regex");
    if let Some(caps) = days_ago.captures(&lower) {
        let days: i64 = caps[1]
            .parse()
            .map_err(|_| Error::BadRequest(format!("unable to parse date: {date_str}")))?;
        return Ok(to_result(today - Duration::days(days)));
    }

    Err(Error::BadRequest(format!("unable to parse date: {date_str}")))
}

fn ymd_from_parts(year: &str, month_name: &str, day: &str) -> Option<NaiveDate> {
    let year: i32 = year.parse().ok()?;
    let month = month_number(month_name)?;
    let day: u32 = day.parse().ok()?;
    if day == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(input: &str) -> String {
        parse_flexible_date(input).unwrap().1
    }

    #[test]
    fn iso_and_slash_dates() {
        assert_eq!(canonical("2025-07-10"), "2025-07-10");
        assert_eq!(canonical("2025/07/10"), "2025-07-10");
        // MM-DD is tried before DD-MM, so a month > 12 falls through.
        assert_eq!(canonical("10-07-2025"), "2025-10-07");
        assert_eq!(canonical("25-12-2025"), "2025-12-25");
    }

    #[test]
    fn month_name_forms() {
        assert_eq!(canonical("Jan 2, 2026"), "2026-01-02");
        assert_eq!(canonical("2 January 2026"), "2026-01-02");
        assert_eq!(canonical("1-July-2025"), "2025-07-01");
        assert_eq!(canonical("July-25-2025"), "2025-07-25");
        assert_eq!(canonical("2025 July 10"), "2025-07-10");
    }

    #[test]
    fn month_year_resolves_to_first_of_month() {
        let (instant, canonical) = parse_flexible_date("Sept 2025").unwrap();
        assert_eq!(canonical, "2025-09-01");
        assert_eq!(instant.to_rfc3339(), "2025-09-01T00:00:00+00:00");

        assert_eq!(parse_flexible_date("2025 September").unwrap().1, "2025-09-01");
    }

    #[test]
    fn month_names_are_case_insensitive() {
        assert_eq!(canonical("JULY 2025"), "2025-07-01");
        assert_eq!(canonical("sept 2025"), "2025-09-01");
    }

    #[test]
    fn invalid_day_of_month_fails() {
        assert!(parse_flexible_date("31-February-2025").is_err());
        assert!(parse_flexible_date("February-30-2025").is_err());
        assert!(parse_flexible_date("2025-02-31").is_err());
    }

    #[test]
    fn relative_dates() {
        let today = Utc::now().date_naive();
        assert_eq!(canonical("today"), today.format("%Y-%m-%d").to_string());
        assert_eq!(
            canonical("yesterday"),
            (today - Duration::days(1)).format("%Y-%m-%d").to_string()
        );
        assert_eq!(
            canonical("3 days ago"),
            (today - Duration::days(3)).format("%Y-%m-%d").to_string()
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(parse_flexible_date("not a date").is_err());
        assert!(parse_flexible_date("").is_err());
    }
}
