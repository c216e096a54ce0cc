//! Logging initialization.
//!
//! Logs always go to stderr: on the stdio transport, stdout carries JSON-RPC
//! frames. Level, format and color come from the `SLACK_MCP_LOG_*` surface.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

pub fn init(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_is_tty = std::io::stderr().is_terminal();
    let json = match config.log_format {
        LogFormat::Json => true,
        LogFormat::Console => false,
        LogFormat::Auto => !stderr_is_tty,
    };
    let ansi = config.log_color.unwrap_or(stderr_is_tty);

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(ansi)
            .init();
    }
}
