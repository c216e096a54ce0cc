//! Posting and link-unfurling policies.
//!
//! Both share the comma-list grammar: bare channel ids form an allow-list,
//! `!`-prefixed ids form a deny-list, and the two polarities cannot be mixed.
//! The unfurl variant additionally accepts boolean sentinels and matches
//! domains instead of channel ids.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;
use url::Url;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingPolicy {
    /// No configuration: the add-message tool refuses everything.
    Disabled,
    /// `true` / `1`: every channel accepted.
    All,
    /// Only the listed channel ids.
    Allow(Vec<String>),
    /// Every channel except the listed ids.
    Deny(Vec<String>),
}

impl PostingPolicy {
    pub fn parse(config: &str) -> Result<Self> {
        let config = config.trim();
        if config.is_empty() {
            return Ok(PostingPolicy::Disabled);
        }
        if config == "true" || config == "1" {
            return Ok(PostingPolicy::All);
        }

        let mut allowed = Vec::new();
        let mut denied = Vec::new();
        for item in config.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.strip_prefix('!') {
                Some(id) => denied.push(id.to_string()),
                None => allowed.push(item.to_string()),
            }
        }

        if !allowed.is_empty() && !denied.is_empty() {
            return Err(Error::Config(
                "SLACK_MCP_ADD_MESSAGE_TOOL cannot mix allowed and disallowed (! prefixed) channels"
                    .into(),
            ));
        }
        if denied.is_empty() {
            Ok(PostingPolicy::Allow(allowed))
        } else {
            Ok(PostingPolicy::Deny(denied))
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, PostingPolicy::Disabled)
    }

    pub fn allows(&self, channel_id: &str) -> bool {
        match self {
            PostingPolicy::Disabled => false,
            PostingPolicy::All => true,
            PostingPolicy::Allow(ids) => ids.iter().any(|id| id == channel_id),
            PostingPolicy::Deny(ids) => !ids.iter().any(|id| id == channel_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnfurlPolicy {
    Disabled,
    Enabled,
    /// Unfurl only when every link and bare domain in the payload is listed.
    Domains(HashSet<String>),
}

impl UnfurlPolicy {
    pub fn parse(opt: &str) -> Self {
        match opt.trim() {
            "" | "no" | "false" | "0" => UnfurlPolicy::Disabled,
            "yes" | "true" | "1" => UnfurlPolicy::Enabled,
            list => {
                let domains = list
                    .split(',')
                    .map(|d| d.trim().to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect();
                UnfurlPolicy::Domains(domains)
            }
        }
    }

    /// Decide whether unfurling stays on for a message. Any non-whitelisted
    /// host disables unfurling for the whole message, never partially.
    pub fn is_unfurling_enabled(&self, text: &str) -> bool {
        let allowed = match self {
            UnfurlPolicy::Disabled => return false,
            UnfurlPolicy::Enabled => return true,
            UnfurlPolicy::Domains(allowed) => allowed,
        };

        let url_re = Regex::new(r"https?://[^\s]+").expect("static regex");
        for raw in url_re.find_iter(text) {
            let Ok(parsed) = Url::parse(raw.as_str()) else {
                continue;
            };
            let Some(host) = parsed.host_str() else {
                continue;
            };
            let host = host.to_lowercase();
            let host = host.trim_start_matches("www.");
            if !allowed.contains(host) {
                warn!(host, policy = ?allowed, "attempt to unfurl non-whitelisted host");
                return false;
            }
        }

        // Bare domains are only meaningful when the public suffix is a real
        // ICANN one, otherwise "v1.2.3"-style tokens would trip the policy.
        let without_urls = url_re.replace_all(text, " ");
        let domain_re = Regex::new(r"\b(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}\b")
            .expect("static regex");
        for candidate in domain_re.find_iter(&without_urls) {
            let domain = candidate.as_str().to_lowercase();
            let Some(suffix) = psl::suffix(domain.as_bytes()) else {
                continue;
            };
            if suffix.typ() != Some(psl::Type::Icann) {
                continue;
            }
            if !allowed.contains(domain.as_str()) {
                warn!(host = %domain, policy = ?allowed, "attempt to unfurl non-whitelisted host");
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_disables_posting() {
        let policy = PostingPolicy::parse("").unwrap();
        assert!(!policy.is_enabled());
        assert!(!policy.allows("C1"));
    }

    #[test]
    fn sentinel_allows_everything() {
        for cfg in ["true", "1"] {
            let policy = PostingPolicy::parse(cfg).unwrap();
            assert!(policy.allows("C1234567890"));
            assert!(policy.allows("D0987654321"));
        }
    }

    #[test]
    fn allow_list_rejects_unlisted() {
        let policy = PostingPolicy::parse("C1234567890,D0987654321").unwrap();
        assert!(policy.allows("C1234567890"));
        assert!(policy.allows("D0987654321"));
        assert!(!policy.allows("C0000000000"));
    }

    #[test]
    fn deny_list_allows_everything_else() {
        let policy = PostingPolicy::parse("!C2").unwrap();
        assert!(policy.allows("C1"));
        assert!(!policy.allows("C2"));
    }

    #[test]
    fn mixed_polarity_is_a_config_error() {
        assert!(matches!(
            PostingPolicy::parse("C1,!C2"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn whitespace_and_empty_items_are_ignored() {
        let policy = PostingPolicy::parse(" C1 , ,C2 ").unwrap();
        assert!(policy.allows("C1"));
        assert!(policy.allows("C2"));
        assert!(!policy.allows("C3"));
    }

    #[test]
    fn unfurl_sentinels() {
        assert_eq!(UnfurlPolicy::parse(""), UnfurlPolicy::Disabled);
        assert_eq!(UnfurlPolicy::parse("no"), UnfurlPolicy::Disabled);
        assert_eq!(UnfurlPolicy::parse("0"), UnfurlPolicy::Disabled);
        assert_eq!(UnfurlPolicy::parse("yes"), UnfurlPolicy::Enabled);
        assert_eq!(UnfurlPolicy::parse("1"), UnfurlPolicy::Enabled);
    }

    #[test]
    fn unfurl_bare_domain_outside_whitelist_disables() {
        let policy = UnfurlPolicy::parse("example.com,foo.io");
        assert!(!policy.is_unfurling_enabled("Visit https://example.com and bad.com"));
    }

    #[test]
    fn unfurl_enabled_sentinel_ignores_hosts() {
        let policy = UnfurlPolicy::parse("yes");
        assert!(policy.is_unfurling_enabled("Visit https://example.com and bad.com"));
    }

    #[test]
    fn unfurl_whitelisted_hosts_pass() {
        let policy = UnfurlPolicy::parse("example.com,foo.io");
        assert!(policy.is_unfurling_enabled("see https://example.com/docs and foo.io"));
    }

    #[test]
    fn unfurl_strips_www_prefix() {
        let policy = UnfurlPolicy::parse("example.com");
        assert!(policy.is_unfurling_enabled("https://www.example.com/page"));
    }

    #[test]
    fn unfurl_ignores_non_icann_suffixes() {
        let policy = UnfurlPolicy::parse("example.com");
        // "server.local" has no ICANN suffix, so it never trips the policy.
        assert!(policy.is_unfurling_enabled("ping server.local and https://example.com"));
    }
}
