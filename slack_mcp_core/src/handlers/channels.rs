//! `channels_list` tool and the channel directory resource.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::handlers::{to_csv, ChannelRow};
use crate::provider::{
    filter_channels_by_kinds, paginate_channels, ApiProvider, Channel, ChannelKind,
};
use crate::text;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 999;

#[derive(Debug, Deserialize)]
struct ChannelsListInput {
    #[serde(default)]
    channel_types: String,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    cursor: String,
}

pub struct ChannelsHandler {
    provider: Arc<ApiProvider>,
}

impl ChannelsHandler {
    pub fn new(provider: Arc<ApiProvider>) -> Self {
        Self { provider }
    }

    pub async fn channels_list(&self, args: Value) -> Result<String> {
        let input: ChannelsListInput =
            serde_json::from_value(args).map_err(|e| Error::BadRequest(e.to_string()))?;

        self.provider.is_ready()?;

        let mut kinds: Vec<ChannelKind> = input
            .channel_types
            .split(',')
            .map(str::trim)
            .filter_map(ChannelKind::from_type_str)
            .collect();
        if kinds.is_empty() {
            kinds = vec![ChannelKind::Public, ChannelKind::Private];
        }

        let limit = match input.limit {
            Some(0) | None => DEFAULT_LIMIT,
            Some(n) => (n as usize).min(MAX_LIMIT),
        };

        let index = self.provider.channels_index().await;
        let filtered = filter_channels_by_kinds(&index, &kinds);
        let (page, next_cursor) = paginate_channels(filtered, &input.cursor, limit);

        let mut rows: Vec<ChannelRow> = page.into_iter().map(channel_row).collect();

        // Popularity sorting applies to the served page, after id-ordered
        // pagination, so cursors stay stable across calls.
        if input.sort.as_deref().unwrap_or("popularity") == "popularity" {
            rows.sort_by(|a, b| b.member_count.cmp(&a.member_count));
        }

        if let Some(last) = rows.last_mut() {
            if !next_cursor.is_empty() {
                last.cursor = next_cursor;
            }
        }

        to_csv(&rows)
    }

    /// The full directory as one CSV document, served as
    /// `slack://{workspace}/channels`.
    pub async fn channels_directory(&self) -> Result<(String, String)> {
        self.provider.is_ready()?;

        let workspace = text::workspace(&self.provider.gateway().auth_snapshot().url)?;

        let index = self.provider.channels_index().await;
        let mut channels: Vec<Channel> = index.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));

        let rows: Vec<ChannelRow> = channels.into_iter().map(channel_row).collect();
        Ok((workspace, to_csv(&rows)?))
    }
}

fn channel_row(ch: Channel) -> ChannelRow {
    ChannelRow {
        id: ch.id,
        name: ch.name,
        topic: ch.topic,
        purpose: ch.purpose,
        member_count: ch.member_count,
        cursor: String::new(),
    }
}
