use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};

use slack_mcp_core::mcp_server::{JsonRpcHandler, McpServer};
use slack_mcp_core::provider::ApiProvider;
use slack_mcp_core::server::{serve_http, serve_sse, StdioTransport};
use slack_mcp_core::slack::gateway::SlackGateway;
use slack_mcp_core::{transport, Config};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Sse,
    Http,
}

#[derive(Parser)]
#[command(name = "slack-mcp-server")]
#[command(about = "Slack MCP server: read-oriented Slack tools over stdio, SSE or HTTP")]
#[command(version)]
struct Cli {
    /// Transport to serve on
    #[arg(short = 't', long = "transport", value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    slack_mcp_core::logging::init(&config);

    if let Err(e) = config.validate() {
        error!("{e}");
        std::process::exit(1);
    }

    let http = match transport::build_http_client(&config) {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // The auth probe is the identity everything else hangs off; failing it
    // is fatal.
    let gateway = match SlackGateway::connect(&config, http).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "failed to authenticate against Slack");
            std::process::exit(1);
        }
    };

    let config = Arc::new(config);
    let provider = Arc::new(ApiProvider::new(gateway, &config));

    spawn_cache_warmers(provider.clone());

    let server = McpServer::new(provider, config.clone());
    let handler = Arc::new(JsonRpcHandler::new(server));

    info!(transport = ?cli.transport, "MCP server ready");

    let result = match cli.transport {
        Transport::Stdio => StdioTransport::new(handler).run().await.map_err(Into::into),
        Transport::Sse => serve_sse(handler, &config.host, config.port).await,
        Transport::Http => serve_http(handler, &config.host, config.port).await,
    };

    if let Err(e) = result {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}

/// Fire-and-forget hydration at startup. Handlers re-check readiness per
/// call; a live-refresh failure is fatal because handler correctness would
/// otherwise degrade silently.
fn spawn_cache_warmers(provider: Arc<ApiProvider>) {
    tokio::spawn(async move {
        info!("caching users collection...");
        if let Err(e) = provider.refresh_users().await {
            error!(error = %e, "error booting users cache");
            std::process::exit(1);
        }
        info!("users cached successfully");

        info!("caching channels collection...");
        if let Err(e) = provider.refresh_channels().await {
            error!(error = %e, "error booting channels cache");
            std::process::exit(1);
        }
        info!("channels cached successfully");
    });
}
