//! MCP server: tool registration and JSON-RPC dispatch.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::auth::{is_authenticated, AuthContext};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::handlers::channels::ChannelsHandler;
use crate::handlers::conversations::ConversationsHandler;
use crate::provider::ApiProvider;

const SERVER_NAME: &str = "Slack MCP Server";

fn schema(value: Value) -> Arc<Map<String, Value>> {
    Arc::new(
        value
            .as_object()
            .expect("tool schema must be an object")
            .clone(),
    )
}

pub struct McpServer {
    config: Arc<Config>,
    provider: Arc<ApiProvider>,
    channels: ChannelsHandler,
    conversations: ConversationsHandler,
}

impl McpServer {
    pub fn new(provider: Arc<ApiProvider>, config: Arc<Config>) -> Self {
        Self {
            channels: ChannelsHandler::new(provider.clone()),
            conversations: ConversationsHandler::new(provider.clone(), config.clone()),
            provider,
            config,
        }
    }

    pub async fn handle_initialize(
        &self,
        _request: InitializeRequestParam,
    ) -> Result<InitializeResult> {
        info!("MCP server initializing");

        Ok(InitializeResult {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                resources: Some(Default::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-oriented Slack tools: list channels, fetch history and thread replies, \
                 search messages, and (when enabled by policy) post a message. Paginated \
                 responses carry the next cursor in the last CSV row."
                    .to_string(),
            ),
        })
    }

    pub fn handle_list_tools(&self) -> ListToolsResult {
        let tools = vec![
            Tool {
                name: Cow::Borrowed("conversations_history"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Get messages from the channel by channel_id; the last row's 'cursor' column \
                     is the pagination cursor when non-empty.",
                )),
                input_schema: schema(json!({
                    "type": "object",
                    "properties": {
                        "channel_id": {"type": "string", "description": "ID of the channel (Cxxxxxxxxxx) or its #name/@name form"},
                        "include_activity_messages": {"type": "boolean", "default": false, "description": "Include activity messages such as channel_join/channel_leave"},
                        "cursor": {"type": "string", "description": "Cursor for pagination, taken from the last row of the previous response"},
                        "limit": {"type": "string", "default": "1d", "description": "Time window (1d, 2w, 3m) or message count (50). Must be empty when 'cursor' is provided."}
                    },
                    "required": ["channel_id"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("conversations_replies"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Get a thread of messages by channel_id and thread_ts; the last row's \
                     'cursor' column is the pagination cursor when non-empty.",
                )),
                input_schema: schema(json!({
                    "type": "object",
                    "properties": {
                        "channel_id": {"type": "string", "description": "ID of the channel (Cxxxxxxxxxx) or its #name/@name form"},
                        "thread_ts": {"type": "string", "description": "Timestamp of the thread parent in format 1234567890.123456"},
                        "include_activity_messages": {"type": "boolean", "default": false},
                        "cursor": {"type": "string"},
                        "limit": {"type": "string", "default": "1d", "description": "Time window (1d, 2w, 3m) or message count (50). Must be empty when 'cursor' is provided."}
                    },
                    "required": ["channel_id", "thread_ts"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("conversations_search_messages"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Search messages in channels, DMs and group DMs with Slack search operators \
                     expressed as structured filters.",
                )),
                input_schema: schema(json!({
                    "type": "object",
                    "properties": {
                        "search_query": {"type": "string", "description": "Free text to search; may already contain is:/in:/from: style operators"},
                        "filter_threads_only": {"type": "boolean", "default": false, "description": "Only return messages that are part of a thread"},
                        "filter_in_channel": {"type": "string", "description": "Restrict to a channel by #name or Cxxxxxxxxxx id"},
                        "filter_in_im_or_mpim": {"type": "string", "description": "Restrict to a DM/group DM by @handle or Uxxxxxxxxxx id"},
                        "filter_users_with": {"type": "string", "description": "Conversations that include this user"},
                        "filter_users_from": {"type": "string", "description": "Messages authored by this user"},
                        "filter_date_before": {"type": "string", "description": "Flexible date, e.g. 2025-07-01, July 2025, yesterday"},
                        "filter_date_after": {"type": "string"},
                        "filter_date_on": {"type": "string"},
                        "filter_date_during": {"type": "string"},
                        "limit": {"type": "integer", "default": 100, "minimum": 1, "maximum": 100},
                        "cursor": {"type": "string"}
                    }
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("conversations_add_message"),
                title: None,
                description: Some(Cow::Borrowed(
                    "Post a message to a channel or thread. Disabled unless the posting policy \
                     allows the target channel.",
                )),
                input_schema: schema(json!({
                    "type": "object",
                    "properties": {
                        "channel_id": {"type": "string", "description": "ID of the channel (Cxxxxxxxxxx) or its #name/@name form"},
                        "thread_ts": {"type": "string", "description": "Reply in the thread with this parent timestamp; omit for a channel message"},
                        "payload": {"type": "string", "description": "Message body"},
                        "content_type": {"type": "string", "default": "text/markdown", "enum": ["text/plain", "text/markdown"]}
                    },
                    "required": ["channel_id", "payload"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            },
            Tool {
                name: Cow::Borrowed("channels_list"),
                title: None,
                description: Some(Cow::Borrowed("Get the list of channels")),
                input_schema: schema(json!({
                    "type": "object",
                    "properties": {
                        "channel_types": {"type": "string", "description": "Comma-separated channel types: 'mpim', 'im', 'public_channel', 'private_channel'"},
                        "sort": {"type": "string", "description": "'popularity' sorts by member count descending"},
                        "limit": {"type": "integer", "default": 100, "maximum": 999},
                        "cursor": {"type": "string"}
                    },
                    "required": ["channel_types"]
                })),
                output_schema: None,
                annotations: None,
                icons: None,
                meta: None,
            },
        ];

        ListToolsResult {
            tools,
            next_cursor: None,
        }
    }

    pub async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
        ctx: &AuthContext,
    ) -> Result<CallToolResult> {
        is_authenticated(ctx, self.config.api_key.as_deref())?;

        let args = Value::Object(request.arguments.unwrap_or_default());

        let csv = match request.name.as_ref() {
            "conversations_history" => self.conversations.history(args).await?,
            "conversations_replies" => self.conversations.replies(args).await?,
            "conversations_search_messages" => self.conversations.search(args).await?,
            "conversations_add_message" => self.conversations.add_message(args).await?,
            "channels_list" => self.channels.channels_list(args).await?,
            other => return Err(Error::ToolNotFound(other.to_string())),
        };

        Ok(CallToolResult {
            content: vec![Content::text(csv)],
            structured_content: None,
            is_error: Some(false),
            meta: None,
        })
    }

    pub async fn handle_list_resources(&self) -> Result<ListResourcesResult> {
        let workspace = crate::text::workspace(&self.provider.gateway().auth_snapshot().url)?;

        serde_json::from_value(json!({
            "resources": [{
                "uri": format!("slack://{workspace}/channels"),
                "name": "channels",
                "description": "Directory of channels, DMs and group DMs as CSV",
                "mimeType": "text/csv"
            }]
        }))
        .map_err(Error::from)
    }

    pub async fn handle_read_resource(
        &self,
        request: ReadResourceRequestParam,
        ctx: &AuthContext,
    ) -> Result<ReadResourceResult> {
        is_authenticated(ctx, self.config.api_key.as_deref())?;

        let (workspace, csv) = self.channels.channels_directory().await?;
        let uri = format!("slack://{workspace}/channels");

        if request.uri != uri {
            return Err(Error::ResourceNotFound);
        }

        serde_json::from_value(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "text/csv",
                "text": csv
            }]
        }))
        .map_err(Error::from)
    }
}

/// JSON-RPC message handler shared by every transport.
pub struct JsonRpcHandler {
    server: McpServer,
}

impl JsonRpcHandler {
    pub fn new(server: McpServer) -> Self {
        Self { server }
    }

    /// Process one JSON-RPC message. Notifications yield no response.
    pub async fn handle_request(&self, request: Value, ctx: &AuthContext) -> Option<Value> {
        debug!(?request, "handling JSON-RPC request");

        let id = request.get("id").cloned();
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or(json!({}));

        if id.is_none() {
            // Notifications (e.g. notifications/initialized) are fire-and-forget.
            debug!(method, "ignoring notification");
            return None;
        }

        let result = match method {
            "initialize" => match serde_json::from_value::<InitializeRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_initialize(req)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(Error::from))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(Error::from(e).to_jsonrpc_error()),
            },
            "ping" => Ok(json!({})),
            "tools/list" => serde_json::to_value(self.server.handle_list_tools())
                .map_err(|e| Error::from(e).to_jsonrpc_error()),
            "tools/call" => match serde_json::from_value::<CallToolRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_call_tool(req, ctx)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(Error::from))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(Error::from(e).to_jsonrpc_error()),
            },
            "resources/list" => self
                .server
                .handle_list_resources()
                .await
                .and_then(|r| serde_json::to_value(r).map_err(Error::from))
                .map_err(|e| e.to_jsonrpc_error()),
            "resources/read" => match serde_json::from_value::<ReadResourceRequestParam>(params) {
                Ok(req) => self
                    .server
                    .handle_read_resource(req, ctx)
                    .await
                    .and_then(|r| serde_json::to_value(r).map_err(Error::from))
                    .map_err(|e| e.to_jsonrpc_error()),
                Err(e) => Err(Error::from(e).to_jsonrpc_error()),
            },
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(Error::MethodNotFound.to_jsonrpc_error()),
        };

        Some(match result {
            Ok(result) => json!({
                "jsonrpc": "2.0",
                "result": result,
                "id": id,
            }),
            Err(error) => json!({
                "jsonrpc": "2.0",
                "error": error,
                "id": id,
            }),
        })
    }
}
