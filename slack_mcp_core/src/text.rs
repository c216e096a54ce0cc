//! Inbound message text processing.
//!
//! Every message body returned to the client runs through [`process_text`]:
//! link markup (Slack, Markdown, inline HTML) is rewritten to `url - label`
//! fragments, surviving URLs are protected while stray characters are
//! stripped, and horizontal whitespace is collapsed.

use chrono::{DateTime, SecondsFormat};
use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::slack::types::Attachment;

pub fn process_text(s: &str) -> String {
    filter_special_chars(s)
}

/// True when `needle` is the last non-whitespace content of `haystack`.
fn is_last_in_text(needle: &str, haystack: &str) -> bool {
    match haystack.rfind(needle) {
        Some(pos) => haystack[pos + needle.len()..].trim().is_empty(),
        None => false,
    }
}

/// Rewrite every link match to `url - label`, appending a comma unless the
/// link closes the text.
fn rewrite_links(mut text: String, re: &Regex, url_group: usize, label_group: usize) -> String {
    let matches: Vec<(String, String, String)> = re
        .captures_iter(&text)
        .map(|caps| {
            (
                caps[0].to_string(),
                caps[url_group].to_string(),
                caps[label_group].to_string(),
            )
        })
        .collect();

    for (original, url, label) in matches {
        let mut replacement = format!("{url} - {label}");
        if !is_last_in_text(&original, &text) {
            replacement.push(',');
        }
        text = text.replacen(&original, &replacement, 1);
    }
    text
}

fn filter_special_chars(text: &str) -> String {
    let slack_link_re = Regex::new(r"<(https?://[^>|]+)\|([^>]+)>").expect("static regex");
    let markdown_link_re = Regex::new(r"\[([^\]]+)\]\((https?://[^)]+)\)").expect("static regex");
    let html_link_re =
        Regex::new(r#"<a\s+href=["']([^"']+)["'][^>]*>([^<]+)</a>"#).expect("static regex");

    let text = rewrite_links(text.to_string(), &slack_link_re, 1, 2);
    let text = rewrite_links(text, &markdown_link_re, 2, 1);
    let text = rewrite_links(text, &html_link_re, 1, 2);

    // Protect surviving URLs so the character filter cannot mangle them.
    let url_re = Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("static regex");
    let urls: Vec<String> = url_re.find_iter(&text).map(|m| m.as_str().to_string()).collect();

    let mut protected = text;
    for (i, url) in urls.iter().enumerate() {
        protected = protected.replacen(url.as_str(), &format!("___URL_PLACEHOLDER_{i}___"), 1);
    }

    let clean_re = Regex::new(r"[^0-9\p{L}\p{M}\s.,\-_:/?=&%]").expect("static regex");
    let mut cleaned = clean_re.replace_all(&protected, "").into_owned();

    for (i, url) in urls.iter().enumerate() {
        cleaned = cleaned.replacen(&format!("___URL_PLACEHOLDER_{i}___"), url, 1);
    }

    let space_re = Regex::new(r"[ \t]+").expect("static regex");
    space_re.replace_all(&cleaned, " ").trim().to_string()
}

/// Flatten one attachment into a single CSV-safe line.
pub fn attachment_to_text(att: &Attachment) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !att.title.is_empty() {
        parts.push(format!("Title: {}", att.title));
    }
    if !att.author_name.is_empty() {
        parts.push(format!("Author: {}", att.author_name));
    }
    if !att.pretext.is_empty() {
        parts.push(format!("Pretext: {}", att.pretext));
    }
    if !att.text.is_empty() {
        parts.push(format!("Text: {}", att.text));
    }
    if !att.footer.is_empty() {
        let ts = timestamp_to_rfc3339(&format!("{}.000000", att.ts)).unwrap_or_default();
        parts.push(format!("Footer: {} @ {}", att.footer, ts));
    }

    parts
        .join("; ")
        .replace(['\n', '\r', '\t'], " ")
        .replace('(', "[")
        .replace(')', "]")
        .trim()
        .to_string()
}

/// Render attachments as a suffix for the message text column.
pub fn attachments_to_text(msg_text: &str, attachments: &[Attachment]) -> String {
    if attachments.is_empty() {
        return String::new();
    }

    let descriptions: Vec<String> = attachments
        .iter()
        .map(attachment_to_text)
        .filter(|t| !t.is_empty())
        .collect();
    if descriptions.is_empty() {
        return String::new();
    }

    let prefix = if msg_text.is_empty() { "" } else { ". " };
    format!("{prefix}{}", descriptions.join(", "))
}

/// Convert a Slack `seconds.microseconds` timestamp to RFC 3339 UTC.
pub fn timestamp_to_rfc3339(slack_ts: &str) -> Result<String> {
    let (secs, micros) = slack_ts
        .split_once('.')
        .ok_or_else(|| Error::BadRequest(format!("invalid slack timestamp format: {slack_ts}")))?;

    let secs: i64 = secs
        .parse()
        .map_err(|e| Error::BadRequest(format!("failed to parse seconds: {e}")))?;
    let micros: u32 = micros
        .parse()
        .map_err(|e| Error::BadRequest(format!("failed to parse microseconds: {e}")))?;

    let dt = DateTime::from_timestamp(secs, micros * 1000)
        .ok_or_else(|| Error::BadRequest(format!("timestamp out of range: {slack_ts}")))?;

    Ok(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Extract the workspace subdomain from a team URL like
/// `https://acme.slack.com/`.
pub fn workspace(raw_url: &str) -> Result<String> {
    let parsed =
        Url::parse(raw_url).map_err(|e| Error::BadRequest(format!("invalid team URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::BadRequest(format!("invalid Slack URL: {raw_url:?}")))?;

    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() < 3 {
        return Err(Error::BadRequest(format!("invalid Slack URL: {raw_url:?}")));
    }
    Ok(parts[0].to_string())
}

/// Pull `thread_ts` out of a message permalink's query string.
pub fn extract_thread_ts(permalink: &str) -> Option<String> {
    let parsed = Url::parse(permalink).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == "thread_ts")
        .map(|(_, v)| v.into_owned())
}
