//! Outbound HTTP client factory.
//!
//! One `reqwest::Client` is built at startup and shared process-wide. The
//! builder layers: proxy resolution, root-CA extensions, an optional
//! browser-matching TLS profile, and default headers carrying the
//! `User-Agent` plus (for session auth) the `d=` cookie pair on every request.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, COOKIE, USER_AGENT};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Browser family inferred from the configured User-Agent, used to shape the
/// TLS handshake when `SLACK_MCP_CUSTOM_TLS` is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    Chrome,
    Firefox,
    Safari,
    Edge,
}

impl BrowserFamily {
    /// Order matters: Edge and Safari UAs both contain competitor tokens.
    pub fn detect(user_agent: &str) -> Self {
        if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
            BrowserFamily::Edge
        } else if user_agent.contains("Firefox/") {
            BrowserFamily::Firefox
        } else if user_agent.contains("Chrome/") {
            BrowserFamily::Chrome
        } else if user_agent.contains("Safari/") {
            BrowserFamily::Safari
        } else {
            BrowserFamily::Chrome
        }
    }
}

/// Build the process-wide outbound client per the configuration.
///
/// Conflicting options (proxy + custom TLS, CA + insecure) were already
/// rejected by `Config::validate`, so this only fails on unreadable inputs.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .default_headers(default_headers(config)?);

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| Error::Config(format!("invalid SLACK_MCP_PROXY {proxy_url:?}: {e}")))?;
        builder = builder.proxy(proxy);
    }

    if let Some(ca_path) = &config.server_ca {
        builder = builder.add_root_certificate(read_pem(ca_path)?);
        info!(path = %ca_path, "added custom root CA");
    }

    if config.ca_toolkit {
        // Local debugging proxies install their CA under the mitmproxy
        // convention; trusting it lets traffic be inspected during setup.
        match toolkit_ca_path() {
            Some(path) if path.exists() => {
                builder = builder.add_root_certificate(read_pem(&path.to_string_lossy())?);
                info!(path = %path.display(), "added debugging-proxy CA");
            }
            _ => warn!("SLACK_MCP_SERVER_CA_TOOLKIT is set but no debugging-proxy CA was found"),
        }
    }

    if config.ca_insecure {
        warn!("TLS certificate verification is disabled (SLACK_MCP_SERVER_CA_INSECURE)");
        builder = builder.danger_accept_invalid_certs(true);
    }

    if config.custom_tls && config.proxy.is_none() {
        let family = BrowserFamily::detect(&config.user_agent);
        info!(?family, "custom TLS profile enabled");
        builder = apply_tls_profile(builder, family);
    }

    builder.build().map_err(Error::from)
}

fn default_headers(config: &Config) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let ua = HeaderValue::from_str(&config.user_agent)
        .map_err(|_| Error::Config("SLACK_MCP_USER_AGENT contains invalid header bytes".into()))?;
    headers.insert(USER_AGENT, ua);

    if let Some(cookie) = config.credentials.session_cookie() {
        let ds = chrono::Utc::now().timestamp();
        let value = HeaderValue::from_str(&format!("d={cookie};d-s={ds}"))
            .map_err(|_| Error::Config("SLACK_MCP_XOXD_TOKEN contains invalid header bytes".into()))?;
        headers.insert(COOKIE, value);
    }

    Ok(headers)
}

fn read_pem(path: &str) -> Result<reqwest::Certificate> {
    let pem = std::fs::read(path)
        .map_err(|e| Error::Config(format!("failed to read CA bundle {path:?}: {e}")))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| Error::Config(format!("failed to parse CA bundle {path:?}: {e}")))
}

fn toolkit_ca_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".mitmproxy").join("mitmproxy-ca-cert.pem"))
}

/// Shape the handshake towards the detected browser. ALPN decides HTTP/1.1 vs
/// HTTP/2 at the connection level; all four families offer h2, so the profile
/// pins the TLS floor browsers ship with and leaves version negotiation to
/// ALPN rather than forcing a protocol.
fn apply_tls_profile(
    builder: reqwest::ClientBuilder,
    family: BrowserFamily,
) -> reqwest::ClientBuilder {
    let builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_2);
    match family {
        BrowserFamily::Chrome | BrowserFamily::Edge | BrowserFamily::Firefox => builder,
        // Safari still offers http/1.1 first on some macOS versions.
        BrowserFamily::Safari => builder.http1_title_case_headers(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    #[test]
    fn detects_chrome_from_default_ua() {
        assert_eq!(
            BrowserFamily::detect(DEFAULT_USER_AGENT),
            BrowserFamily::Chrome
        );
    }

    #[test]
    fn detects_edge_before_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                  (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0";
        assert_eq!(BrowserFamily::detect(ua), BrowserFamily::Edge);
    }

    #[test]
    fn detects_firefox() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:136.0) \
                  Gecko/20100101 Firefox/136.0";
        assert_eq!(BrowserFamily::detect(ua), BrowserFamily::Firefox);
    }

    #[test]
    fn detects_safari_without_chrome_token() {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
                  (KHTML, like Gecko) Version/16.1 Safari/605.1.15";
        assert_eq!(BrowserFamily::detect(ua), BrowserFamily::Safari);
    }

    #[test]
    fn unknown_ua_falls_back_to_chrome() {
        assert_eq!(BrowserFamily::detect("curl/8.0"), BrowserFamily::Chrome);
    }
}
