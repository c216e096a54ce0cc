// src/lib.rs
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod logging;
pub mod markdown;
pub mod mcp_server;
pub mod policy;
pub mod provider;
pub mod query;
pub mod server;
pub mod slack;
pub mod text;
pub mod transport;

// Re-export the rmcp model types downstream users of this library need.
pub use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, InitializeRequestParam,
    InitializeResult, ListResourcesResult, ListToolsResult, ProtocolVersion,
    ReadResourceRequestParam, ReadResourceResult, ServerCapabilities, Tool,
};

pub use crate::auth::{AuthContext, TransportKind};
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::mcp_server::{JsonRpcHandler, McpServer};
pub use crate::provider::ApiProvider;
pub use crate::slack::gateway::SlackGateway;
