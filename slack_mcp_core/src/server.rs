//! Transports: stdio, SSE and plain HTTP.
//!
//! Stdio reads one JSON-RPC message per line and answers on stdout, so all
//! logging must stay on stderr. The network transports share the same
//! dispatcher; the bearer gate sees the `Authorization` header through the
//! per-call [`AuthContext`].

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::auth::{AuthContext, TransportKind};
use crate::error::Result;
use crate::mcp_server::JsonRpcHandler;

/// Stdio transport: one JSON-RPC message per line.
pub struct StdioTransport {
    handler: Arc<JsonRpcHandler>,
}

impl StdioTransport {
    pub fn new(handler: Arc<JsonRpcHandler>) -> Self {
        Self { handler }
    }

    pub async fn run(&self) -> std::io::Result<()> {
        info!("starting stdio transport");

        let ctx = AuthContext::stdio();
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("EOF reached on stdin");
                    break;
                }
                Ok(_) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = self.process_line(&line, &ctx).await {
                        error!(error = %e, "error processing line");
                    }
                }
                Err(e) => {
                    error!(error = %e, "error reading from stdin");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn process_line(&self, line: &str, ctx: &AuthContext) -> std::io::Result<()> {
        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handler.handle_request(request, ctx).await,
            Err(e) => {
                error!(error = %e, "failed to parse JSON-RPC request");
                Some(serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": { "code": -32700, "message": "Parse error", "data": e.to_string() },
                    "id": null
                }))
            }
        };

        if let Some(response) = response {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(response.to_string().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        Ok(())
    }
}

fn auth_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Plain HTTP transport: request/response JSON-RPC on `POST /mcp`.
pub async fn serve_http(handler: Arc<JsonRpcHandler>, host: &str, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/mcp", post(http_handler))
        .with_state(handler);

    let addr = format!("{host}:{port}");
    info!(%addr, "HTTP server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn http_handler(
    State(handler): State<Arc<JsonRpcHandler>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let ctx = AuthContext::network(TransportKind::Http, auth_header(&headers));
    match handler.handle_request(body, &ctx).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

#[derive(Clone)]
struct SseState {
    handler: Arc<JsonRpcHandler>,
    sessions: Arc<RwLock<HashMap<String, mpsc::Sender<Value>>>>,
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_session_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let seq = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{seq:x}-{nanos:08x}")
}

/// SSE transport: `GET /sse` opens the event stream and advertises the
/// message endpoint; `POST /message?sessionId=...` submits requests whose
/// responses are pushed back over the stream.
pub async fn serve_sse(handler: Arc<JsonRpcHandler>, host: &str, port: u16) -> Result<()> {
    let state = SseState {
        handler,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/sse", get(sse_handler))
        .route("/message", post(sse_message_handler))
        .with_state(state);

    let addr = format!("{host}:{port}");
    info!(%addr, "SSE server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn sse_handler(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let session_id = next_session_id();
    let (tx, rx) = mpsc::channel::<Value>(32);
    state
        .sessions
        .write()
        .await
        .insert(session_id.clone(), tx);
    info!(session = %session_id, "SSE session opened");

    let endpoint =
        Event::default().event("endpoint").data(format!("/message?sessionId={session_id}"));

    let stream = futures::stream::once(async move { Ok(endpoint) }).chain(
        ReceiverStream::new(rx)
            .map(|response| Ok(Event::default().event("message").data(response.to_string()))),
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn sse_message_handler(
    State(state): State<SseState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let Some(session_id) = params.get("sessionId") else {
        return StatusCode::BAD_REQUEST;
    };
    let Some(tx) = state.sessions.read().await.get(session_id).cloned() else {
        return StatusCode::NOT_FOUND;
    };

    let ctx = AuthContext::network(TransportKind::Sse, auth_header(&headers));
    if let Some(response) = state.handler.handle_request(body, &ctx).await {
        if tx.send(response).await.is_err() {
            // Stream side is gone; drop the session.
            state.sessions.write().await.remove(session_id);
            return StatusCode::GONE;
        }
    }

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = next_session_id();
        let b = next_session_id();
        assert_ne!(a, b);
    }
}
