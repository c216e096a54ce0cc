use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("users cache is not ready yet, sync process is still running... please wait")]
    UsersNotReady,

    #[error("channels cache is not ready yet, sync process is still running... please wait")]
    ChannelsNotReady,

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("slack api error in {op}: {message}")]
    Upstream { op: &'static str, message: String },

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("resource not found")]
    ResourceNotFound,

    #[error("method not found")]
    MethodNotFound,
}

impl Error {
    /// Wrap an upstream failure with the gateway operation it came from.
    pub fn upstream(op: &'static str, message: impl Into<String>) -> Self {
        Error::Upstream {
            op,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::UsersNotReady => "not_ready_users",
            Error::ChannelsNotReady => "not_ready_channels",
            Error::NotFound(_) => "not_found",
            Error::BadRequest(_) => "bad_request",
            Error::Upstream { .. } | Error::Http(_) => "upstream",
            Error::Policy(_) => "policy",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ResourceNotFound => "not_found",
            Error::MethodNotFound => "method_not_found",
            Error::Io(_) | Error::SerdeJson(_) | Error::Csv(_) => "internal_error",
        }
    }

    pub fn to_jsonrpc_error(&self) -> serde_json::Value {
        let code = match self {
            Error::MethodNotFound => -32601,
            Error::BadRequest(_)
            | Error::NotFound(_)
            | Error::ToolNotFound(_)
            | Error::ResourceNotFound => -32602,
            _ => -32603,
        };

        json!({
            "code": code,
            "message": self.to_string(),
            "data": { "kind": self.code_str() },
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_kinds_are_distinct() {
        assert_eq!(Error::UsersNotReady.code_str(), "not_ready_users");
        assert_eq!(Error::ChannelsNotReady.code_str(), "not_ready_channels");
    }

    #[test]
    fn not_found_names_the_reference() {
        let err = Error::NotFound("channel \"#missing\"".into());
        assert!(err.to_string().contains("#missing"));
    }

    #[test]
    fn jsonrpc_projection_carries_kind() {
        let err = Error::upstream("conversations.history", "ratelimited");
        let v = err.to_jsonrpc_error();
        assert_eq!(v["data"]["kind"], "upstream");
        assert!(v["message"].as_str().unwrap().contains("ratelimited"));
    }
}
