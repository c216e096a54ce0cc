//! The `limit` grammar for history/replies tools: either a literal message
//! count or a time window like `1d` / `2w` / `3m`, mapped onto Slack's
//! `oldest`/`latest` parameters.

use chrono::{Local, Months, NaiveDate, TimeZone};

use crate::error::{Error, Result};

/// Per-page limit used whenever a duration window is requested.
const WINDOW_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimitSpec {
    pub limit: Option<u32>,
    pub oldest: Option<String>,
    pub latest: Option<String>,
}

/// Interpret a `limit` string in the context of an optional cursor.
///
/// - `Nd` / `Nw` / `Nm` (positive N): per-page limit 100 and a window from
///   local midnight of `today − (N−1)` days/weeks/calendar months to now.
/// - plain decimal: literal per-page limit, no window.
/// - empty with a non-empty cursor: pure continuation, nothing overridden.
pub fn parse_limit(limit: &str, cursor: &str) -> Result<LimitSpec> {
    let limit = limit.trim();

    if limit.is_empty() {
        if cursor.is_empty() {
            return Err(Error::BadRequest(
                "limit must be provided when cursor is empty".into(),
            ));
        }
        return Ok(LimitSpec::default());
    }

    if let Some(unit) = limit.chars().last().filter(|c| c.is_ascii_alphabetic()) {
        let count: i64 = limit[..limit.len() - 1].parse().map_err(|_| {
            Error::BadRequest(format!(
                "invalid duration limit {limit:?}: must be a positive integer with 'd', 'w' or 'm' suffix"
            ))
        })?;
        if count <= 0 {
            return Err(Error::BadRequest(format!(
                "invalid duration limit {limit:?}: must be a positive integer with 'd', 'w' or 'm' suffix"
            )));
        }

        let today = Local::now().date_naive();
        let oldest_day = match unit {
            'd' => today
                .checked_sub_days(chrono::Days::new(count as u64 - 1))
                .ok_or_else(|| Error::BadRequest(format!("duration limit out of range: {limit}")))?,
            'w' => today
                .checked_sub_days(chrono::Days::new((count as u64 - 1) * 7))
                .ok_or_else(|| Error::BadRequest(format!("duration limit out of range: {limit}")))?,
            'm' => today
                .checked_sub_months(Months::new(count as u32 - 1))
                .ok_or_else(|| Error::BadRequest(format!("duration limit out of range: {limit}")))?,
            other => {
                return Err(Error::BadRequest(format!(
                    "invalid duration suffix {other:?} in limit {limit:?}: expected 'd', 'w' or 'm'"
                )))
            }
        };

        return Ok(LimitSpec {
            limit: Some(WINDOW_PAGE_LIMIT),
            oldest: Some(slack_ts_at_local_midnight(oldest_day)?),
            latest: Some(format!("{}.000000", Local::now().timestamp())),
        });
    }

    let n: u32 = limit
        .parse()
        .map_err(|_| Error::BadRequest(format!("invalid numeric limit: {limit:?}")))?;
    Ok(LimitSpec {
        limit: Some(n),
        ..Default::default()
    })
}

fn slack_ts_at_local_midnight(day: NaiveDate) -> Result<String> {
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .expect("midnight always exists");
    let local = Local
        .from_local_datetime(&midnight)
        .earliest()
        .ok_or_else(|| Error::BadRequest(format!("no local midnight for {day}")))?;
    Ok(format!("{}.000000", local.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};

    fn expected_midnight_ts(days_back: i64) -> String {
        let day = Local::now().date_naive() - Duration::days(days_back);
        slack_ts_at_local_midnight(day).unwrap()
    }

    #[test]
    fn duration_days_window() {
        let spec = parse_limit("2d", "").unwrap();
        assert_eq!(spec.limit, Some(100));
        assert_eq!(spec.oldest.as_deref(), Some(expected_midnight_ts(1).as_str()));
        assert!(spec.latest.is_some());
    }

    #[test]
    fn one_day_starts_today() {
        let spec = parse_limit("1d", "").unwrap();
        assert_eq!(spec.oldest.as_deref(), Some(expected_midnight_ts(0).as_str()));
    }

    #[test]
    fn weeks_are_seven_days() {
        let spec = parse_limit("2w", "").unwrap();
        assert_eq!(spec.oldest.as_deref(), Some(expected_midnight_ts(7).as_str()));
    }

    #[test]
    fn months_step_by_calendar_month() {
        let spec = parse_limit("1m", "").unwrap();
        assert_eq!(spec.oldest.as_deref(), Some(expected_midnight_ts(0).as_str()));

        let spec = parse_limit("2m", "").unwrap();
        let expected = Local::now()
            .date_naive()
            .checked_sub_months(Months::new(1))
            .unwrap();
        assert_eq!(
            spec.oldest.as_deref(),
            Some(slack_ts_at_local_midnight(expected).unwrap().as_str())
        );
    }

    #[test]
    fn numeric_limit_has_no_window() {
        let spec = parse_limit("50", "").unwrap();
        assert_eq!(
            spec,
            LimitSpec {
                limit: Some(50),
                oldest: None,
                latest: None,
            }
        );
    }

    #[test]
    fn empty_limit_with_cursor_is_pure_continuation() {
        assert_eq!(parse_limit("", "abc").unwrap(), LimitSpec::default());
    }

    #[test]
    fn empty_limit_without_cursor_is_rejected() {
        assert!(parse_limit("", "").is_err());
    }

    #[test]
    fn bad_inputs_are_rejected() {
        assert!(parse_limit("0d", "").is_err());
        assert!(parse_limit("-1d", "").is_err());
        assert!(parse_limit("5y", "").is_err());
        assert!(parse_limit("abc", "").is_err());
        assert!(parse_limit("-5", "").is_err());
    }
}
