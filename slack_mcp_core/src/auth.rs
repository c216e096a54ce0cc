//! Bearer-token gate for network transports.
//!
//! Stdio is a local pipe and bypasses the check. SSE/HTTP calls must present
//! the configured key; comparison is constant-time so the gate leaks nothing
//! about prefix matches.

use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    Http,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::Http => "http",
        }
    }
}

/// Per-call auth context: the transport the call arrived on plus whatever
/// `Authorization` header it carried.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub transport: TransportKind,
    pub authorization: Option<String>,
}

impl AuthContext {
    pub fn stdio() -> Self {
        Self {
            transport: TransportKind::Stdio,
            authorization: None,
        }
    }

    pub fn network(transport: TransportKind, authorization: Option<String>) -> Self {
        Self {
            transport,
            authorization,
        }
    }
}

/// Validate a call against the configured API key. No configured key means
/// the gate is disabled.
pub fn is_authenticated(ctx: &AuthContext, api_key: Option<&str>) -> Result<()> {
    match ctx.transport {
        TransportKind::Stdio => Ok(()),
        TransportKind::Sse | TransportKind::Http => {
            let Some(expected) = api_key.filter(|k| !k.is_empty()) else {
                debug!("no API key configured, skipping authentication");
                return Ok(());
            };

            let Some(header) = ctx.authorization.as_deref() else {
                warn!(transport = ctx.transport.as_str(), "missing auth token");
                return Err(Error::Auth("unauthorized request: missing auth".into()));
            };

            let presented = header.strip_prefix("Bearer ").unwrap_or(header);
            if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
                Ok(())
            } else {
                warn!(transport = ctx.transport.as_str(), "invalid auth token");
                Err(Error::Auth("unauthorized request: invalid auth token".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_bypasses_auth() {
        assert!(is_authenticated(&AuthContext::stdio(), Some("secret")).is_ok());
    }

    #[test]
    fn no_configured_key_disables_gate() {
        let ctx = AuthContext::network(TransportKind::Http, None);
        assert!(is_authenticated(&ctx, None).is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let ctx = AuthContext::network(TransportKind::Sse, None);
        assert!(matches!(
            is_authenticated(&ctx, Some("secret")),
            Err(Error::Auth(_))
        ));
    }

    #[test]
    fn bearer_prefix_is_optional() {
        for header in ["Bearer secret", "secret"] {
            let ctx = AuthContext::network(TransportKind::Http, Some(header.into()));
            assert!(is_authenticated(&ctx, Some("secret")).is_ok());
        }
    }

    #[test]
    fn wrong_key_is_unauthorized() {
        let ctx = AuthContext::network(TransportKind::Http, Some("Bearer nope".into()));
        assert!(matches!(
            is_authenticated(&ctx, Some("secret")),
            Err(Error::Auth(_))
        ));
    }
}
