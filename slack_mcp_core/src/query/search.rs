//! Slack search-DSL synthesis.
//!
//! Free text and structured filters are merged into a canonical query string:
//! `key:value` tokens already present in the raw query are folded into the
//! structured set first, values are deduplicated per key, and keys are
//! emitted in a fixed order.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::query::dates::parse_flexible_date;

/// Emission order is part of the canonical form.
pub const FILTER_KEYS: &[&str] = &["is", "in", "from", "with", "before", "after", "on", "during"];

pub type Filters = HashMap<String, Vec<String>>;

fn is_filter_key(key: &str) -> bool {
    FILTER_KEYS.contains(&key.to_lowercase().as_str())
}

/// Split a raw query into free-text tokens and recognized `key:value` filters.
pub fn split_query(query: &str) -> (Vec<String>, Filters) {
    let mut free_text = Vec::new();
    let mut filters = Filters::new();

    for token in query.split_whitespace() {
        match token.split_once(':') {
            Some((key, value)) if is_filter_key(key) && !value.is_empty() => {
                add_filter(&mut filters, &key.to_lowercase(), value);
            }
            _ => free_text.push(token.to_string()),
        }
    }

    (free_text, filters)
}

/// Append a filter value, deduplicating per key.
pub fn add_filter(filters: &mut Filters, key: &str, value: &str) {
    let values = filters.entry(key.to_string()).or_default();
    if !values.iter().any(|existing| existing == value) {
        values.push(value.to_string());
    }
}

/// Emit the canonical query: free text first, then filters in fixed key order.
pub fn build_query(free_text: &[String], filters: &Filters) -> String {
    let mut out: Vec<String> = free_text.to_vec();
    for key in FILTER_KEYS {
        if let Some(values) = filters.get(*key) {
            for value in values {
                out.push(format!("{key}:{value}"));
            }
        }
    }
    out.join(" ")
}

/// Normalize the four date filters, enforcing their exclusivity rules:
/// `on` excludes the other three, `during` excludes `before`/`after`, and a
/// `before`/`after` pair must be ordered.
pub fn build_date_filters(
    before: &str,
    after: &str,
    on: &str,
    during: &str,
) -> Result<Vec<(&'static str, String)>> {
    let mut out = Vec::new();

    if !on.is_empty() {
        if !during.is_empty() || !before.is_empty() || !after.is_empty() {
            return Err(Error::BadRequest(
                "'on' cannot be combined with other date filters".into(),
            ));
        }
        let (_, normalized) = parse_flexible_date(on)
            .map_err(|e| Error::BadRequest(format!("invalid 'on' date: {e}")))?;
        out.push(("on", normalized));
        return Ok(out);
    }

    if !during.is_empty() {
        if !before.is_empty() || !after.is_empty() {
            return Err(Error::BadRequest(
                "'during' cannot be combined with 'before' or 'after'".into(),
            ));
        }
        let (_, normalized) = parse_flexible_date(during)
            .map_err(|e| Error::BadRequest(format!("invalid 'during' date: {e}")))?;
        out.push(("during", normalized));
        return Ok(out);
    }

    let mut after_instant = None;
    if !after.is_empty() {
        let (instant, normalized) = parse_flexible_date(after)
            .map_err(|e| Error::BadRequest(format!("invalid 'after' date: {e}")))?;
        after_instant = Some(instant);
        out.push(("after", normalized));
    }
    if !before.is_empty() {
        let (instant, normalized) = parse_flexible_date(before)
            .map_err(|e| Error::BadRequest(format!("invalid 'before' date: {e}")))?;
        if let Some(after_instant) = after_instant {
            if after_instant > instant {
                return Err(Error::BadRequest("'after' date is after 'before' date".into()));
            }
        }
        out.push(("before", normalized));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_recognizes_filter_tokens() {
        let (free, filters) = split_query("deploy failed in:#ops from:@alice is:thread");
        assert_eq!(free, vec!["deploy", "failed"]);
        assert_eq!(filters["in"], vec!["#ops"]);
        assert_eq!(filters["from"], vec!["@alice"]);
        assert_eq!(filters["is"], vec!["thread"]);
    }

    #[test]
    fn unknown_keys_stay_free_text() {
        let (free, filters) = split_query("has:star priority:high");
        assert_eq!(free, vec!["has:star", "priority:high"]);
        assert!(filters.is_empty());
    }

    #[test]
    fn filters_deduplicate_per_key() {
        let mut filters = Filters::new();
        add_filter(&mut filters, "in", "#ops");
        add_filter(&mut filters, "in", "#ops");
        add_filter(&mut filters, "in", "#dev");
        assert_eq!(filters["in"], vec!["#ops", "#dev"]);
    }

    #[test]
    fn build_emits_fixed_key_order() {
        let mut filters = Filters::new();
        add_filter(&mut filters, "during", "2025-07-01");
        add_filter(&mut filters, "is", "thread");
        add_filter(&mut filters, "from", "@bob");
        let query = build_query(&["hello".to_string()], &filters);
        assert_eq!(query, "hello is:thread from:@bob during:2025-07-01");
    }

    #[test]
    fn round_trip_is_stable() {
        let raw = "hello is:thread from:@bob during:2025-07-01";
        let (free, filters) = split_query(raw);
        assert_eq!(build_query(&free, &filters), raw);
    }

    #[test]
    fn on_excludes_everything() {
        assert!(build_date_filters("", "", "2025-07-01", "2025-07-02").is_err());
        assert!(build_date_filters("2025-07-03", "", "2025-07-01", "").is_err());
        let filters = build_date_filters("", "", "July 1, 2025", "").unwrap();
        assert_eq!(filters, vec![("on", "2025-07-01".to_string())]);
    }

    #[test]
    fn during_excludes_before_and_after() {
        assert!(build_date_filters("2025-07-03", "", "", "2025-07-01").is_err());
        assert!(build_date_filters("", "2025-06-01", "", "2025-07-01").is_err());
    }

    #[test]
    fn before_after_pair_must_be_ordered() {
        assert!(build_date_filters("2025-07-01", "2025-07-10", "", "").is_err());

        let filters = build_date_filters("2025-07-10", "2025-07-01", "", "").unwrap();
        assert_eq!(
            filters,
            vec![
                ("after", "2025-07-01".to_string()),
                ("before", "2025-07-10".to_string()),
            ]
        );
    }
}
