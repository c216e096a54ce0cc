//! Workspace-internal "Edge" API client.
//!
//! Enterprise Grid workspaces do not expose their full conversation set
//! through `conversations.list`, so channel listing goes the way the Slack
//! web client does it: `client.counts` yields every conversation id the user
//! can see, and `conversations.genericInfo` hydrates them in batches. These
//! are form-encoded POSTs against the workspace endpoint carrying the
//! web-client marker fields.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::limiter::TIER2_BOOST;
use crate::slack::types::{BootIm, WireChannel};

/// `conversations.genericInfo` accepts at most this many ids per call.
const GENERIC_INFO_BATCH: usize = 249;

#[derive(Clone)]
pub struct EdgeClient {
    http: reqwest::Client,
    token: String,
    /// Workspace URL from the auth probe, e.g. `https://acme.slack.com/`.
    team_endpoint: String,
}

impl EdgeClient {
    pub fn new(http: reqwest::Client, token: String, team_endpoint: String) -> Self {
        Self {
            http,
            token,
            team_endpoint,
        }
    }

    async fn post_form(
        &self,
        method: &'static str,
        extra: &[(&str, String)],
    ) -> Result<Value> {
        let url = format!("{}api/{}", self.team_endpoint, method);

        let mut form: Vec<(&str, String)> = vec![
            ("token", self.token.clone()),
            ("_x_reason", "guided-search-people-empty-state".to_string()),
            ("_x_mode", "online".to_string()),
            ("_x_sonic", "true".to_string()),
            ("_x_app_name", "client".to_string()),
        ];
        form.extend(extra.iter().map(|(k, v)| (*k, v.clone())));

        let resp = self.http.post(&url).form(&form).send().await?;
        let v: Value = resp.json().await?;

        if v.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(v);
        }
        let err = v
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        Err(Error::upstream(method, err.to_string()))
    }

    /// The web client's boot payload; the only place Slack Connect DM
    /// counterparties show up.
    pub async fn client_user_boot(&self) -> Result<Vec<BootIm>> {
        let v = self
            .post_form(
                "client.userBoot",
                &[
                    ("get_latest", "true".to_string()),
                    ("get_read_state", "true".to_string()),
                ],
            )
            .await?;

        let ims = v.get("ims").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(ims).map_err(Error::from)
    }

    /// List every conversation visible to the user. Paginates internally
    /// (counts, then batched hydration) and therefore ignores the standard
    /// cursor protocol; callers get the complete set in one call.
    pub async fn list_channels(&self, exclude_archived: bool) -> Result<Vec<WireChannel>> {
        let counts = self.post_form("client.counts", &[]).await?;

        let mut ids: Vec<String> = Vec::new();
        for key in ["channels", "mpims", "ims"] {
            if let Some(entries) = counts.get(key).and_then(Value::as_array) {
                ids.extend(
                    entries
                        .iter()
                        .filter_map(|e| e.get("id").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
        }

        let lim = TIER2_BOOST.limiter();
        let mut channels: Vec<WireChannel> = Vec::with_capacity(ids.len());

        for batch in ids.chunks(GENERIC_INFO_BATCH) {
            let updated: serde_json::Map<String, Value> = batch
                .iter()
                .map(|id| (id.clone(), Value::from(0)))
                .collect();
            let updated = Value::Object(updated);

            let v = self
                .post_form(
                    "conversations.genericInfo",
                    &[("updated_channels", updated.to_string())],
                )
                .await?;

            if let Some(page) = v.get("channels").cloned() {
                let page: Vec<WireChannel> = serde_json::from_value(page)?;
                channels.extend(
                    page.into_iter()
                        .filter(|ch| !(exclude_archived && ch.is_archived)),
                );
            }

            lim.wait().await;
        }

        Ok(channels)
    }
}
