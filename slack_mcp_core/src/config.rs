use crate::error::{Error, Result};
use crate::policy::{PostingPolicy, UnfurlPolicy};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 13080;

/// Browser-like default, matching what the Slack web client sends.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

pub const DEFAULT_USERS_CACHE: &str = ".users_cache.json";
pub const DEFAULT_CHANNELS_CACHE: &str = ".channels_cache_v2.json";
/// Pre-v2 schema kept its own filename so a version skew never parses.
pub const LEGACY_CHANNELS_CACHE: &str = ".channels_cache.json";

pub const DEMO_SENTINEL: &str = "demo";

/// How the server authenticates against Slack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// User OAuth token (`xoxp-...`).
    OAuth { token: String },
    /// Browser-extracted workspace token (`xoxc-...`) plus session cookie (`xoxd-...`).
    Session { token: String, cookie: String },
}

impl Credentials {
    pub fn token(&self) -> &str {
        match self {
            Credentials::OAuth { token } => token,
            Credentials::Session { token, .. } => token,
        }
    }

    pub fn session_cookie(&self) -> Option<&str> {
        match self {
            Credentials::OAuth { .. } => None,
            Credentials::Session { cookie, .. } => Some(cookie),
        }
    }

    pub fn is_demo(&self) -> bool {
        match self {
            Credentials::OAuth { token } => token == DEMO_SENTINEL,
            Credentials::Session { token, cookie } => {
                token == DEMO_SENTINEL && cookie == DEMO_SENTINEL
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Auto,
    Json,
    Console,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,

    pub host: String,
    pub port: u16,
    /// Bearer key for SSE/HTTP transports; `None` disables the auth gate.
    pub api_key: Option<String>,

    pub proxy: Option<String>,
    pub user_agent: String,
    pub custom_tls: bool,
    pub server_ca: Option<String>,
    pub ca_toolkit: bool,
    pub ca_insecure: bool,

    pub add_message_tool: String,
    pub add_message_mark: bool,
    pub add_message_unfurling: String,

    pub users_cache: String,
    pub channels_cache: String,

    pub log_level: String,
    pub log_format: LogFormat,
    pub log_color: Option<bool>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> bool {
    matches!(
        env_opt(name).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let credentials = match env_opt("SLACK_MCP_XOXP_TOKEN") {
            Some(token) => Credentials::OAuth { token },
            None => {
                let token = env_opt("SLACK_MCP_XOXC_TOKEN");
                let cookie = env_opt("SLACK_MCP_XOXD_TOKEN");
                match (token, cookie) {
                    (Some(token), Some(cookie)) => Credentials::Session { token, cookie },
                    _ => {
                        return Err(Error::Config(
                            "authentication required: either SLACK_MCP_XOXP_TOKEN (User OAuth) \
                             or both SLACK_MCP_XOXC_TOKEN and SLACK_MCP_XOXD_TOKEN (session-based) \
                             must be provided"
                                .into(),
                        ))
                    }
                }
            }
        };

        let api_key = env_opt("SLACK_MCP_API_KEY").or_else(|| {
            let legacy = env_opt("SLACK_MCP_SSE_API_KEY");
            if legacy.is_some() {
                tracing::warn!("SLACK_MCP_SSE_API_KEY is deprecated, please use SLACK_MCP_API_KEY");
            }
            legacy
        });

        let port = match env_opt("SLACK_MCP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                Error::Config(format!("invalid SLACK_MCP_PORT: {raw:?} is not a port number"))
            })?,
            None => DEFAULT_PORT,
        };

        // The v1 channel snapshot predates IM/MPIM rendering, so session auth
        // writes to a v2 file and OAuth keeps the legacy name.
        let default_channels_cache = match &credentials {
            Credentials::OAuth { .. } => LEGACY_CHANNELS_CACHE,
            Credentials::Session { .. } => DEFAULT_CHANNELS_CACHE,
        };

        let log_format = match env_opt("SLACK_MCP_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("console") | Some("text") => LogFormat::Console,
            _ => LogFormat::Auto,
        };

        let log_color = env_opt("SLACK_MCP_LOG_COLOR")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes" | "on"));

        Ok(Config {
            credentials,
            host: env_opt("SLACK_MCP_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            api_key,
            proxy: env_opt("SLACK_MCP_PROXY"),
            user_agent: env_opt("SLACK_MCP_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            custom_tls: env_bool("SLACK_MCP_CUSTOM_TLS"),
            server_ca: env_opt("SLACK_MCP_SERVER_CA"),
            ca_toolkit: env_opt("SLACK_MCP_SERVER_CA_TOOLKIT").is_some(),
            ca_insecure: env_opt("SLACK_MCP_SERVER_CA_INSECURE").is_some(),
            add_message_tool: env_opt("SLACK_MCP_ADD_MESSAGE_TOOL").unwrap_or_default(),
            add_message_mark: env_bool("SLACK_MCP_ADD_MESSAGE_MARK"),
            add_message_unfurling: env_opt("SLACK_MCP_ADD_MESSAGE_UNFURLING").unwrap_or_default(),
            users_cache: env_opt("SLACK_MCP_USERS_CACHE")
                .unwrap_or_else(|| DEFAULT_USERS_CACHE.to_string()),
            channels_cache: env_opt("SLACK_MCP_CHANNELS_CACHE")
                .unwrap_or_else(|| default_channels_cache.to_string()),
            log_level: env_opt("SLACK_MCP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            log_color,
        })
    }

    /// Startup-fatal checks. Everything here is a `config` error per the
    /// error taxonomy: bad policy grammar, conflicting transport options.
    pub fn validate(&self) -> Result<()> {
        PostingPolicy::parse(&self.add_message_tool)?;
        UnfurlPolicy::parse(&self.add_message_unfurling);

        if self.proxy.is_some() && self.custom_tls {
            return Err(Error::Config(
                "SLACK_MCP_PROXY and SLACK_MCP_CUSTOM_TLS are mutually exclusive: \
                 a TLS fingerprint is meaningless through a proxy"
                    .into(),
            ));
        }

        if self.ca_insecure && self.server_ca.is_some() {
            return Err(Error::Config(
                "SLACK_MCP_SERVER_CA cannot be combined with SLACK_MCP_SERVER_CA_INSECURE".into(),
            ));
        }

        Ok(())
    }

    pub fn posting_policy(&self) -> PostingPolicy {
        // validate() ran at startup, so the grammar is known-good here.
        PostingPolicy::parse(&self.add_message_tool).unwrap_or(PostingPolicy::Disabled)
    }

    pub fn unfurl_policy(&self) -> UnfurlPolicy {
        UnfurlPolicy::parse(&self.add_message_unfurling)
    }

    pub fn is_demo(&self) -> bool {
        self.credentials.is_demo()
    }
}
