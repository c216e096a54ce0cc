//! One capability set over two underlying clients.
//!
//! Every operation dispatches to the public Web API or the Edge API based on
//! the workspace's enterprise flag, discovered once at the auth probe. The
//! demo sentinel short-circuits the probe with a stubbed identity so the
//! server can run without live credentials.

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::slack::edge::EdgeClient;
use crate::slack::types::{BootIm, MessagePage, SearchPage, User, WireChannel};
use crate::slack::web::{HistoryParams, PostOptions, WebClient};

/// Identity discovered at the first successful auth probe.
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub url: String,
    pub team: String,
    pub user: String,
    pub team_id: String,
    pub user_id: String,
    pub enterprise_id: String,
    pub bot_id: String,
}

impl AuthSnapshot {
    pub fn is_enterprise(&self) -> bool {
        !self.enterprise_id.is_empty()
    }
}

pub struct SlackGateway {
    web: WebClient,
    edge: EdgeClient,
    snapshot: AuthSnapshot,
    demo: bool,
}

impl SlackGateway {
    /// Probe auth and wire both clients. A probe failure here is fatal to the
    /// caller; nothing else works without an identity.
    pub async fn connect(config: &Config, http: reqwest::Client) -> Result<Self> {
        let token = config.credentials.token().to_string();

        if config.is_demo() {
            info!("demo credentials detected, using stubbed Slack identity");
            let snapshot = AuthSnapshot {
                url: "https://demo.slack.com/".to_string(),
                team: "demo".to_string(),
                user: "demo".to_string(),
                team_id: "T0000000000".to_string(),
                user_id: "U0000000000".to_string(),
                ..Default::default()
            };
            let edge = EdgeClient::new(http.clone(), token.clone(), snapshot.url.clone());
            return Ok(Self {
                web: WebClient::new(http, token),
                edge,
                snapshot,
                demo: true,
            });
        }

        let web = WebClient::new(http.clone(), token.clone());
        let probe = web.auth_test().await?;
        let snapshot = AuthSnapshot {
            url: probe.url,
            team: probe.team,
            user: probe.user,
            team_id: probe.team_id,
            user_id: probe.user_id,
            enterprise_id: probe.enterprise_id,
            bot_id: probe.bot_id,
        };
        info!(
            team = %snapshot.team,
            user = %snapshot.user,
            enterprise = snapshot.is_enterprise(),
            "authenticated against Slack"
        );

        let edge = EdgeClient::new(http, token, snapshot.url.clone());
        Ok(Self {
            web,
            edge,
            snapshot,
            demo: false,
        })
    }

    pub fn auth_snapshot(&self) -> &AuthSnapshot {
        &self.snapshot
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    pub async fn list_users_page(&self, limit: u32, cursor: &str) -> Result<(Vec<User>, String)> {
        if self.demo {
            return Ok((Vec::new(), String::new()));
        }
        self.web.users_list(limit, cursor).await
    }

    pub async fn lookup_users(&self, ids: &[String]) -> Result<Vec<User>> {
        if self.demo {
            return Ok(Vec::new());
        }
        self.web.users_info(ids).await
    }

    /// One page of conversations. Enterprise Grid workspaces route to the
    /// Edge client, which returns the complete set at once (no cursor);
    /// everyone else pages through `conversations.list`.
    pub async fn list_channels_page(
        &self,
        types: &str,
        exclude_archived: bool,
        limit: u32,
        cursor: &str,
    ) -> Result<(Vec<WireChannel>, String)> {
        if self.demo {
            return Ok((Vec::new(), String::new()));
        }
        if self.snapshot.is_enterprise() {
            let channels = self.edge.list_channels(exclude_archived).await?;
            return Ok((channels, String::new()));
        }
        self.web
            .conversations_list(types, exclude_archived, limit, cursor)
            .await
    }

    pub async fn conversation_history(&self, params: &HistoryParams) -> Result<MessagePage> {
        if self.demo {
            return Ok(MessagePage::default());
        }
        self.web.conversations_history(params).await
    }

    pub async fn conversation_replies(
        &self,
        params: &HistoryParams,
        thread_ts: &str,
    ) -> Result<MessagePage> {
        if self.demo {
            return Ok(MessagePage::default());
        }
        self.web.conversations_replies(params, thread_ts).await
    }

    pub async fn search(&self, query: &str, count: u32, page: u32) -> Result<SearchPage> {
        if self.demo {
            return Ok(SearchPage::default());
        }
        self.web.search_messages(query, count, page).await
    }

    pub async fn post_message(
        &self,
        channel: &str,
        opts: &PostOptions,
    ) -> Result<(String, String)> {
        if self.demo {
            return Ok((channel.to_string(), "0000000000.000000".to_string()));
        }
        self.web.post_message(channel, opts).await
    }

    pub async fn mark_read(&self, channel: &str, ts: &str) -> Result<()> {
        if self.demo {
            return Ok(());
        }
        self.web.conversations_mark(channel, ts).await
    }

    /// Edge-only: the boot payload listing the user's IMs.
    pub async fn client_user_boot(&self) -> Result<Vec<BootIm>> {
        if self.demo {
            return Ok(Vec::new());
        }
        self.edge.client_user_boot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enterprise_flag_follows_enterprise_id() {
        let mut snapshot = AuthSnapshot::default();
        assert!(!snapshot.is_enterprise());
        snapshot.enterprise_id = "E012345".to_string();
        assert!(snapshot.is_enterprise());
    }
}
