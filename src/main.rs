//! Bitbucket MCP Server
//!
//! Serves the Model Context Protocol over stdio and HTTP in front of a
//! Bitbucket REST API.
//!
//! # Architecture Overview
//!
//! ```text
//!   stdio ──┐                    ┌──────────────────────────────────────┐
//!           ├──▶ protocol ──────▶│ McpProtocol ──▶ operation search      │
//!   /mcp ───┘    (JSON-RPC)      │            └──▶ UpstreamConnection-   │──▶ Bitbucket
//!     ▲                          │                 Manager (+breaker)    │
//!     └── auth fallback chain    └──────────────────┬───────────────────┘
//!                                                   │ ConnectionEvent
//!   /health ◀── ConnectionState ◀───────────────────┤
//!   /transports/sse ◀── EventBridge ◀───────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use bitbucket_mcp_server::config::{load_config, validation::validate_config, ConfigError};
use bitbucket_mcp_server::lifecycle::signals::wait_for_signal;
use bitbucket_mcp_server::observability::{logging, metrics};
use bitbucket_mcp_server::TransportServer;

#[derive(Parser)]
#[command(name = "bitbucket-mcp-server", version)]
#[command(about = "MCP server for the Bitbucket REST API", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port (overrides config and MCP_HTTP_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (overrides config and LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Disable the stdio transport
    #[arg(long)]
    no_stdio: bool,
}

#[tokio::main]
async fn main() {
    let code = match run(Cli::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // Tokio's stdin reader blocks on a thread that cannot be cancelled, and
    // runtime teardown would wait for it while stdin stays open.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if cli.no_stdio {
        config.transports.stdio_enabled = false;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bitbucket-mcp-server starting");

    tracing::info!(
        upstream = %config.upstream.host,
        bind_address = %config.listener.bind_address(),
        stdio = config.transports.stdio_enabled,
        auth = config.auth.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = TransportServer::new(config)?;
    server.start().await?;

    tokio::select! {
        signal = wait_for_signal() => {
            tracing::info!(signal, "Signal received, shutting down");
            server.stop().await;
        }
        _ = server.stopped() => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
