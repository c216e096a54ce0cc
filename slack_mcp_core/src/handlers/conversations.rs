//! `conversations_history`, `conversations_replies`,
//! `conversations_search_messages` and `conversations_add_message`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::{to_csv, MessageRow};
use crate::markdown::markdown_to_blocks;
use crate::provider::{ApiProvider, UsersIndex};
use crate::query::limits::parse_limit;
use crate::query::search::{add_filter, build_date_filters, build_query, split_query};
use crate::slack::types::{SearchMatch, WireMessage};
use crate::slack::web::{HistoryParams, PostOptions};
use crate::text;

const DEFAULT_SEARCH_LIMIT: u32 = 100;

const USERS_SYNC_WARNING: &str = "users sync is not ready yet; rows may show raw ids instead of \
     resolved names until the users collection finishes syncing";

#[derive(Debug, Deserialize)]
struct ConversationsInput {
    channel_id: String,
    #[serde(default)]
    limit: String,
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    include_activity_messages: bool,
    #[serde(default)]
    thread_ts: String,
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    #[serde(default)]
    search_query: String,
    #[serde(default)]
    filter_threads_only: bool,
    #[serde(default)]
    filter_in_channel: String,
    #[serde(default)]
    filter_in_im_or_mpim: String,
    #[serde(default)]
    filter_users_with: String,
    #[serde(default)]
    filter_users_from: String,
    #[serde(default)]
    filter_date_before: String,
    #[serde(default)]
    filter_date_after: String,
    #[serde(default)]
    filter_date_on: String,
    #[serde(default)]
    filter_date_during: String,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct AddMessageInput {
    channel_id: String,
    #[serde(default)]
    thread_ts: String,
    #[serde(default)]
    payload: String,
    #[serde(default)]
    content_type: String,
}

pub struct ConversationsHandler {
    provider: Arc<ApiProvider>,
    config: Arc<Config>,
}

impl ConversationsHandler {
    pub fn new(provider: Arc<ApiProvider>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    pub async fn history(&self, args: Value) -> Result<String> {
        let input: ConversationsInput =
            serde_json::from_value(args).map_err(|e| Error::BadRequest(e.to_string()))?;

        let channel = self.provider.resolve_channel_id(&input.channel_id).await?;
        let window = parse_limit(&input.limit, &input.cursor)?;

        let params = HistoryParams {
            channel: channel.clone(),
            limit: window.limit,
            oldest: window.oldest,
            latest: window.latest,
            cursor: Some(input.cursor),
            inclusive: false,
        };

        let page = self.provider.gateway().conversation_history(&params).await?;

        let users = self.provider.users_index().await;
        let mut rows = self.rows_from_messages(
            &page.messages,
            &channel,
            input.include_activity_messages,
            &users,
        );

        if page.has_more {
            if let Some(last) = rows.last_mut() {
                last.cursor = page.next_cursor;
            }
        }

        to_csv(&rows)
    }

    pub async fn replies(&self, args: Value) -> Result<String> {
        let input: ConversationsInput =
            serde_json::from_value(args).map_err(|e| Error::BadRequest(e.to_string()))?;

        if input.thread_ts.is_empty() {
            return Err(Error::BadRequest("thread_ts must be a string".into()));
        }
        if !input.thread_ts.contains('.') {
            return Err(Error::BadRequest(
                "thread_ts must be a valid timestamp in format 1234567890.123456".into(),
            ));
        }

        let channel = self.provider.resolve_channel_id(&input.channel_id).await?;
        let window = parse_limit(&input.limit, &input.cursor)?;

        let params = HistoryParams {
            channel: channel.clone(),
            limit: window.limit,
            oldest: window.oldest,
            latest: window.latest,
            cursor: Some(input.cursor),
            inclusive: false,
        };

        let page = self
            .provider
            .gateway()
            .conversation_replies(&params, &input.thread_ts)
            .await?;

        let users = self.provider.users_index().await;
        let mut rows = self.rows_from_messages(
            &page.messages,
            &channel,
            input.include_activity_messages,
            &users,
        );

        if page.has_more {
            if let Some(last) = rows.last_mut() {
                last.cursor = page.next_cursor;
            }
        }

        to_csv(&rows)
    }

    pub async fn search(&self, args: Value) -> Result<String> {
        let input: SearchInput =
            serde_json::from_value(args).map_err(|e| Error::BadRequest(e.to_string()))?;

        let (free_text, mut filters) = split_query(input.search_query.trim());

        if input.filter_threads_only {
            add_filter(&mut filters, "is", "thread");
        }

        if !input.filter_in_channel.is_empty() {
            let formatted = self
                .provider
                .format_channel_for_search(&input.filter_in_channel)
                .await?;
            add_filter(&mut filters, "in", &formatted);
        } else if !input.filter_in_im_or_mpim.is_empty() {
            let formatted = self
                .provider
                .format_user_for_search(&input.filter_in_im_or_mpim)
                .await?;
            add_filter(&mut filters, "in", &formatted);
        }

        if !input.filter_users_with.is_empty() {
            let formatted = self
                .provider
                .format_user_for_search(&input.filter_users_with)
                .await?;
            add_filter(&mut filters, "with", &formatted);
        }
        if !input.filter_users_from.is_empty() {
            let formatted = self
                .provider
                .format_user_for_search(&input.filter_users_from)
                .await?;
            add_filter(&mut filters, "from", &formatted);
        }

        for (key, value) in build_date_filters(
            &input.filter_date_before,
            &input.filter_date_after,
            &input.filter_date_on,
            &input.filter_date_during,
        )? {
            add_filter(&mut filters, key, &value);
        }

        let query = build_query(&free_text, &filters);
        let limit = input.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let page_number = decode_page_cursor(&input.cursor)?;

        let page = self.provider.gateway().search(&query, limit, page_number).await?;

        let users = self.provider.users_index().await;
        if !self.provider.users_ready() {
            warn!("{USERS_SYNC_WARNING}");
        }

        let mut rows: Vec<MessageRow> = page
            .matches
            .iter()
            .map(|m| self.row_from_search_match(m, &users))
            .collect();

        let pagination = page.pagination;
        if !rows.is_empty() && pagination.per_page * pagination.page_count < pagination.total_count
        {
            let next = format!("page:{}", pagination.page_count + 1);
            if let Some(last) = rows.last_mut() {
                last.cursor = BASE64.encode(next.as_bytes());
            }
        }

        to_csv(&rows)
    }

    pub async fn add_message(&self, args: Value) -> Result<String> {
        let policy = self.config.posting_policy();
        if !policy.is_enabled() {
            return Err(Error::Policy(
                "by default, the conversations_add_message tool is disabled to guard Slack \
                 workspaces against accidental spamming. To enable it, set the \
                 SLACK_MCP_ADD_MESSAGE_TOOL environment variable to true, 1, or a comma separated \
                 list of channels, e.g. 'C1234567890,D0987654321', or '!C1234567890' to enable all \
                 channels except one"
                    .into(),
            ));
        }

        let input: AddMessageInput =
            serde_json::from_value(args).map_err(|e| Error::BadRequest(e.to_string()))?;

        let channel = self.provider.resolve_channel_id(&input.channel_id).await?;

        if !policy.allows(&channel) {
            return Err(Error::Policy(format!(
                "conversations_add_message tool is not allowed for channel {:?}, applied policy: {}",
                channel, self.config.add_message_tool
            )));
        }

        if !input.thread_ts.is_empty() && !input.thread_ts.contains('.') {
            return Err(Error::BadRequest(
                "thread_ts must be a valid timestamp in format 1234567890.123456".into(),
            ));
        }

        if input.payload.is_empty() {
            return Err(Error::BadRequest("payload must be a non-empty string".into()));
        }

        let content_type = if input.content_type.is_empty() {
            "text/markdown"
        } else {
            input.content_type.as_str()
        };

        let blocks = match content_type {
            "text/plain" => None,
            "text/markdown" => match markdown_to_blocks(&input.payload) {
                Ok(blocks) => Some(blocks),
                Err(e) => {
                    // Plain text still gets the message through.
                    warn!(error = %e, "markdown parsing failed, falling back to plain text");
                    None
                }
            },
            other => {
                return Err(Error::BadRequest(format!(
                    "content_type must be either 'text/plain' or 'text/markdown', got {other:?}"
                )))
            }
        };

        let unfurl = self
            .config
            .unfurl_policy()
            .is_unfurling_enabled(&input.payload);

        let opts = PostOptions {
            thread_ts: if input.thread_ts.is_empty() {
                None
            } else {
                Some(input.thread_ts.clone())
            },
            blocks,
            text: input.payload.clone(),
            unfurl_links: unfurl,
            unfurl_media: unfurl,
        };

        let (posted_channel, posted_ts) =
            self.provider.gateway().post_message(&channel, &opts).await?;

        // Re-fetch the single message so the caller sees the canonical
        // rendering, not the payload we sent.
        let params = HistoryParams {
            channel: posted_channel.clone(),
            limit: Some(1),
            oldest: Some(posted_ts.clone()),
            latest: Some(posted_ts.clone()),
            cursor: None,
            inclusive: true,
        };
        let page = self.provider.gateway().conversation_history(&params).await?;

        let users = self.provider.users_index().await;
        let rows = self.rows_from_messages(&page.messages, &posted_channel, false, &users);

        if self.config.add_message_mark {
            self.provider
                .gateway()
                .mark_read(&posted_channel, &posted_ts)
                .await?;
        }

        to_csv(&rows)
    }

    fn rows_from_messages(
        &self,
        messages: &[WireMessage],
        channel: &str,
        include_activity: bool,
        users: &UsersIndex,
    ) -> Vec<MessageRow> {
        let mut rows = Vec::with_capacity(messages.len());
        let mut warned = false;

        for msg in messages {
            if !msg.subtype.is_empty() && !include_activity {
                continue;
            }

            let (user_name, real_name, resolved) = users.user_info(&msg.user);
            if !resolved && !self.provider.users_ready() && !warned {
                warn!("{USERS_SYNC_WARNING}");
                warned = true;
            }

            let body = text::process_text(&msg.text);
            let suffix = text::attachments_to_text(&body, &msg.attachments);

            rows.push(MessageRow {
                user_id: msg.user.clone(),
                user_name,
                real_name,
                channel: channel.to_string(),
                thread_ts: msg.thread_ts.clone(),
                text: format!("{body}{suffix}"),
                time: msg.ts.clone(),
                cursor: String::new(),
            });
        }

        rows
    }

    fn row_from_search_match(&self, m: &SearchMatch, users: &UsersIndex) -> MessageRow {
        let (user_name, real_name, _) = users.user_info(&m.user);
        let thread_ts = text::extract_thread_ts(&m.permalink).unwrap_or_default();

        MessageRow {
            user_id: m.user.clone(),
            user_name,
            real_name,
            channel: format!("#{}", m.channel.name),
            thread_ts,
            text: text::process_text(&m.text),
            time: m.ts.clone(),
            cursor: String::new(),
        }
    }
}

/// Search cursors are `base64("page:N")`, one-based.
fn decode_page_cursor(cursor: &str) -> Result<u32> {
    if cursor.is_empty() {
        return Ok(1);
    }

    let decoded = BASE64
        .decode(cursor)
        .map_err(|e| Error::BadRequest(format!("invalid cursor: {e}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| Error::BadRequest(format!("invalid cursor: {cursor:?}")))?;

    let page = match decoded.split_once(':') {
        Some(("page", n)) => n.parse::<u32>().ok(),
        _ => None,
    };

    match page {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(Error::BadRequest(format!("invalid cursor page: {cursor:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cursor_is_page_one() {
        assert_eq!(decode_page_cursor("").unwrap(), 1);
    }

    #[test]
    fn page_cursor_round_trips() {
        let encoded = BASE64.encode("page:3");
        assert_eq!(decode_page_cursor(&encoded).unwrap(), 3);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert!(decode_page_cursor("!!!").is_err());
        assert!(decode_page_cursor(&BASE64.encode("page:0")).is_err());
        assert!(decode_page_cursor(&BASE64.encode("page:x")).is_err());
        assert!(decode_page_cursor(&BASE64.encode("offset:2")).is_err());
    }
}
