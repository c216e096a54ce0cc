//! Wire types shared by the Web and Edge clients.
//!
//! Deserialization is forward-compatible: unknown fields are ignored and
//! missing ones default, so Slack payload drift never breaks a refresh.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicOrPurpose {
    #[serde(default)]
    pub value: String,
}

/// A conversation as Slack returns it, before rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_normalized: String,
    #[serde(default)]
    pub is_im: bool,
    #[serde(default)]
    pub is_mpim: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub is_ext_shared: bool,
    /// IM counterparty user id.
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub num_members: i64,
    #[serde(default)]
    pub topic: TopicOrPurpose,
    #[serde(default)]
    pub purpose: TopicOrPurpose,
}

/// Attachment timestamps arrive as either a number or a string.
fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub pretext: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub footer: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub ts: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub thread_ts: String,
    /// Non-empty for activity messages (joins, leaves, renames...).
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchChannel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchMatch {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub channel: SearchChannel,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SearchPagination {
    #[serde(default)]
    pub total_count: i64,
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub page_count: i64,
    #[serde(default)]
    pub per_page: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

/// One page of messages plus its continuation state.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<WireMessage>,
    pub has_more: bool,
    pub next_cursor: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub matches: Vec<SearchMatch>,
    pub pagination: SearchPagination,
}

/// An IM entry from the Edge `client.userBoot` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootIm {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub is_ext_shared: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_ignored() {
        let user: User = serde_json::from_str(
            r#"{"id":"U1","name":"alice","real_name":"Alice","tz":"UTC","profile":{}}"#,
        )
        .unwrap();
        assert_eq!(user.name, "alice");
    }

    #[test]
    fn missing_fields_default() {
        let ch: WireChannel = serde_json::from_str(r#"{"id":"C1"}"#).unwrap();
        assert!(!ch.is_im);
        assert_eq!(ch.num_members, 0);
        assert_eq!(ch.topic.value, "");
    }

    #[test]
    fn attachment_ts_accepts_number_and_string() {
        let att: Attachment = serde_json::from_str(r#"{"ts":1716932719}"#).unwrap();
        assert_eq!(att.ts, "1716932719");
        let att: Attachment = serde_json::from_str(r#"{"ts":"1716932719"}"#).unwrap();
        assert_eq!(att.ts, "1716932719");
    }
}
