//! Public Slack Web API client.
//!
//! Thin typed wrapper over the shared outbound HTTP client. Rate-limit (429)
//! responses honor `Retry-After`; server errors back off exponentially. A
//! response is only Ok when Slack's own `ok` field says so.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::warn;

use crate::error::{Error, Result};
use crate::slack::types::{
    MessagePage, ResponseMetadata, SearchMatch, SearchPage, SearchPagination, User, WireChannel,
    WireMessage,
};

const SLACK_API_BASE: &str = "https://slack.com/api";

// Total attempts = 1 + MAX_RETRIES.
const MAX_RETRIES: usize = 4;

#[derive(Clone)]
pub struct WebClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryParams {
    pub channel: String,
    pub limit: Option<u32>,
    pub oldest: Option<String>,
    pub latest: Option<String>,
    pub cursor: Option<String>,
    pub inclusive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    pub thread_ts: Option<String>,
    /// Rich blocks win over `text` when present.
    pub blocks: Option<Value>,
    pub text: String,
    pub unfurl_links: bool,
    pub unfurl_media: bool,
}

impl WebClient {
    pub fn new(http: reqwest::Client, token: String) -> Self {
        Self {
            http,
            token,
            base_url: SLACK_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(http: reqwest::Client, token: String, base_url: String) -> Self {
        Self {
            http,
            token,
            base_url,
        }
    }

    async fn api_get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let value = self
            .send_with_backoff(method, |client| {
                client.get(&url).bearer_auth(&self.token).query(&params)
            })
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    async fn api_post<T: DeserializeOwned>(&self, method: &'static str, body: Value) -> Result<T> {
        let url = format!("{}/{}", self.base_url, method);
        let value = self
            .send_with_backoff(method, |client| {
                client.post(&url).bearer_auth(&self.token).json(&body)
            })
            .await?;
        serde_json::from_value(value).map_err(Error::from)
    }

    async fn send_with_backoff<F>(&self, op: &'static str, build: F) -> Result<Value>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut delay_ms = 800u64;

        for attempt in 0..=MAX_RETRIES {
            let resp = build(&self.http).send().await;

            match resp {
                Ok(r) => {
                    let status = r.status();
                    if status.as_u16() == 429 {
                        if attempt == MAX_RETRIES {
                            return Err(Error::upstream(
                                op,
                                format!("rate limited (429) after {} attempts", attempt + 1),
                            ));
                        }
                        let retry_after = r
                            .headers()
                            .get("Retry-After")
                            .and_then(|h| h.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| Duration::from_millis(delay_ms));
                        warn!(op, ?retry_after, "rate limited by Slack, backing off");
                        sleep(retry_after).await;
                        delay_ms = (delay_ms as f64 * 1.8) as u64;
                        continue;
                    }
                    if status.is_server_error() {
                        if attempt == MAX_RETRIES {
                            let body = r.text().await.unwrap_or_default();
                            return Err(Error::upstream(
                                op,
                                format!("server error {}: {}", status.as_u16(), body),
                            ));
                        }
                        sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms as f64 * 1.6) as u64;
                        continue;
                    }

                    let v: Value = r.json().await?;
                    if v.get("ok").and_then(Value::as_bool) == Some(true) {
                        return Ok(v);
                    }
                    let err = v
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown_error");
                    return Err(Error::upstream(op, err.to_string()));
                }
                Err(e) => {
                    if attempt == MAX_RETRIES {
                        return Err(Error::from(e));
                    }
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms as f64 * 1.6) as u64;
                    continue;
                }
            }
        }

        Err(Error::upstream(op, "request failed after retries"))
    }

    pub async fn auth_test(&self) -> Result<AuthTestResponse> {
        self.api_get("auth.test", &[]).await
    }

    pub async fn users_list(&self, limit: u32, cursor: &str) -> Result<(Vec<User>, String)> {
        let mut params = vec![("limit", limit.to_string())];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }
        let resp: UsersListResponse = self.api_get("users.list", &params).await?;
        Ok((resp.members, resp.response_metadata.next_cursor))
    }

    pub async fn users_info(&self, ids: &[String]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = vec![("users", ids.join(","))];
        let resp: UsersInfoResponse = self.api_get("users.info", &params).await?;
        Ok(resp.users)
    }

    pub async fn conversations_list(
        &self,
        types: &str,
        exclude_archived: bool,
        limit: u32,
        cursor: &str,
    ) -> Result<(Vec<WireChannel>, String)> {
        let mut params = vec![
            ("types", types.to_string()),
            ("limit", limit.to_string()),
            ("exclude_archived", exclude_archived.to_string()),
        ];
        if !cursor.is_empty() {
            params.push(("cursor", cursor.to_string()));
        }
        let resp: ConversationsListResponse = self.api_get("conversations.list", &params).await?;
        Ok((resp.channels, resp.response_metadata.next_cursor))
    }

    pub async fn conversations_history(&self, params: &HistoryParams) -> Result<MessagePage> {
        let query = history_query(params, None);
        let resp: HistoryResponse = self.api_get("conversations.history", &query).await?;
        Ok(MessagePage {
            messages: resp.messages,
            has_more: resp.has_more,
            next_cursor: resp.response_metadata.next_cursor,
        })
    }

    pub async fn conversations_replies(
        &self,
        params: &HistoryParams,
        thread_ts: &str,
    ) -> Result<MessagePage> {
        let query = history_query(params, Some(thread_ts));
        let resp: HistoryResponse = self.api_get("conversations.replies", &query).await?;
        Ok(MessagePage {
            messages: resp.messages,
            has_more: resp.has_more,
            next_cursor: resp.response_metadata.next_cursor,
        })
    }

    pub async fn search_messages(&self, query: &str, count: u32, page: u32) -> Result<SearchPage> {
        let params = vec![
            ("query", query.to_string()),
            ("count", count.to_string()),
            ("page", page.to_string()),
            ("sort", "score".to_string()),
            ("sort_dir", "desc".to_string()),
            ("highlight", "false".to_string()),
        ];
        let resp: SearchResponse = self.api_get("search.messages", &params).await?;
        Ok(SearchPage {
            matches: resp.messages.matches,
            pagination: resp.messages.pagination,
        })
    }

    pub async fn post_message(&self, channel: &str, opts: &PostOptions) -> Result<(String, String)> {
        let mut body = serde_json::json!({
            "channel": channel,
            "unfurl_links": opts.unfurl_links,
            "unfurl_media": opts.unfurl_media,
        });
        if let Some(blocks) = &opts.blocks {
            body["blocks"] = blocks.clone();
            // Slack uses `text` as the notification fallback next to blocks.
            body["text"] = Value::String(opts.text.clone());
        } else {
            body["text"] = Value::String(opts.text.clone());
            body["mrkdwn"] = Value::Bool(false);
        }
        if let Some(ts) = &opts.thread_ts {
            body["thread_ts"] = Value::String(ts.clone());
        }

        let resp: PostMessageResponse = self.api_post("chat.postMessage", body).await?;
        Ok((resp.channel, resp.ts))
    }

    pub async fn conversations_mark(&self, channel: &str, ts: &str) -> Result<()> {
        let body = serde_json::json!({ "channel": channel, "ts": ts });
        let _: Value = self.api_post("conversations.mark", body).await?;
        Ok(())
    }
}

fn history_query(params: &HistoryParams, thread_ts: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![("channel", params.channel.clone())];
    if let Some(ts) = thread_ts {
        query.push(("ts", ts.to_string()));
    }
    if let Some(limit) = params.limit {
        query.push(("limit", limit.to_string()));
    }
    if let Some(oldest) = &params.oldest {
        query.push(("oldest", oldest.clone()));
    }
    if let Some(latest) = &params.latest {
        query.push(("latest", latest.clone()));
    }
    if let Some(cursor) = &params.cursor {
        if !cursor.is_empty() {
            query.push(("cursor", cursor.clone()));
        }
    }
    if params.inclusive {
        query.push(("inclusive", "1".to_string()));
    }
    query
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuthTestResponse {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub team: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub enterprise_id: String,
    #[serde(default)]
    pub bot_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<User>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, serde::Deserialize)]
struct UsersInfoResponse {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, serde::Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<WireChannel>,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, serde::Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    messages: Vec<WireMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: ResponseMetadata,
}

#[derive(Debug, Default, serde::Deserialize)]
struct SearchMessages {
    #[serde(default)]
    matches: Vec<SearchMatch>,
    #[serde(default)]
    pagination: SearchPagination,
}

#[derive(Debug, serde::Deserialize)]
struct SearchResponse {
    #[serde(default)]
    messages: SearchMessages,
}

#[derive(Debug, serde::Deserialize)]
struct PostMessageResponse {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
}

#[cfg(test)]
mod http_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::sync::Mutex;

    use super::*;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> WebClient {
        WebClient::with_base_url(reqwest::Client::new(), "xoxc-test".into(), base_url)
    }

    #[tokio::test]
    async fn slack_level_errors_surface_as_upstream() {
        let app = Router::new().route(
            "/auth.test",
            get(|| async { Json(json!({"ok": false, "error": "invalid_auth"})) }),
        );
        let base = spawn(app).await;

        let err = client(base).auth_test().await.unwrap_err();
        assert_eq!(err.code_str(), "upstream");
        assert!(err.to_string().contains("invalid_auth"));
        assert!(err.to_string().contains("auth.test"));
    }

    #[tokio::test]
    async fn users_list_parses_members_and_cursor() {
        let app = Router::new().route(
            "/users.list",
            get(|| async {
                Json(json!({
                    "ok": true,
                    "members": [
                        {"id": "U1", "name": "alice", "real_name": "Alice Doe"},
                        {"id": "U2", "name": "bob", "real_name": "Bob Roe"}
                    ],
                    "response_metadata": {"next_cursor": "dXNlcjpVMg=="}
                }))
            }),
        );
        let base = spawn(app).await;

        let (users, cursor) = client(base).users_list(1000, "").await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].name, "alice");
        assert_eq!(cursor, "dXNlcjpVMg==");
    }

    #[tokio::test]
    async fn rate_limited_requests_retry_until_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new().route(
            "/auth.test",
            get({
                let hits = hits.clone();
                move || {
                    let hits = hits.clone();
                    async move {
                        if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                            (
                                StatusCode::TOO_MANY_REQUESTS,
                                [(header::RETRY_AFTER, "0")],
                                Json(json!({"ok": false, "error": "ratelimited"})),
                            )
                                .into_response()
                        } else {
                            Json(json!({
                                "ok": true,
                                "url": "https://acme.slack.com/",
                                "team": "acme",
                                "user": "alice",
                                "team_id": "T1",
                                "user_id": "U1"
                            }))
                            .into_response()
                        }
                    }
                }
            }),
        );
        let base = spawn(app).await;

        let probe = client(base).auth_test().await.unwrap();
        assert_eq!(probe.team, "acme");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn history_passes_window_and_channel_as_query() {
        let seen: Arc<Mutex<Option<std::collections::HashMap<String, String>>>> =
            Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/conversations.history",
                get(
                    |State(seen): State<Arc<Mutex<Option<std::collections::HashMap<String, String>>>>>,
                     Query(params): Query<std::collections::HashMap<String, String>>| async move {
                        *seen.lock().await = Some(params);
                        Json(json!({"ok": true, "messages": [], "has_more": false}))
                    },
                ),
            )
            .with_state(seen.clone());
        let base = spawn(app).await;

        let params = HistoryParams {
            channel: "C1".into(),
            limit: Some(100),
            oldest: Some("100.000000".into()),
            latest: Some("200.000000".into()),
            cursor: None,
            inclusive: false,
        };
        let page = client(base).conversations_history(&params).await.unwrap();
        assert!(!page.has_more);

        let seen = seen.lock().await.clone().unwrap();
        assert_eq!(seen["channel"], "C1");
        assert_eq!(seen["limit"], "100");
        assert_eq!(seen["oldest"], "100.000000");
        assert_eq!(seen["latest"], "200.000000");
        assert!(!seen.contains_key("cursor"));
    }

    #[tokio::test]
    async fn post_message_carries_thread_and_unfurl_flags() {
        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let app = Router::new()
            .route(
                "/chat.postMessage",
                post(
                    |State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                        *seen.lock().await = Some(body);
                        Json(json!({"ok": true, "channel": "C1", "ts": "123.000456"}))
                    },
                ),
            )
            .with_state(seen.clone());
        let base = spawn(app).await;

        let opts = PostOptions {
            thread_ts: Some("100.000001".into()),
            blocks: None,
            text: "hello".into(),
            unfurl_links: false,
            unfurl_media: false,
        };
        let (channel, ts) = client(base).post_message("C1", &opts).await.unwrap();
        assert_eq!((channel.as_str(), ts.as_str()), ("C1", "123.000456"));

        let body = seen.lock().await.clone().unwrap();
        assert_eq!(body["thread_ts"], "100.000001");
        assert_eq!(body["unfurl_links"], false);
        assert_eq!(body["mrkdwn"], false);
        assert_eq!(body["text"], "hello");
    }
}
