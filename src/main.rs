//! CockroachDB MCP Server - Main entry point.
//!
//! Exposes CockroachDB administration and query tools to AI assistants over MCP.

use crdb_mcp_server::config::{Config, TransportMode};
use crdb_mcp_server::context::AppContext;
use crdb_mcp_server::transport::{HttpTransport, StdioTransport, Transport};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so they never interleave with the stdio JSON-RPC stream.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config);

    let options = config.pool_options();
    if let Err(e) = options.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    let descriptor = match config.connection_descriptor() {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Usage: crdb-mcp-server --url <connection_uri>");
            eprintln!("       crdb-mcp-server --host <host> [--port <port>] [--db <database>]");
            eprintln!();
            eprintln!("Examples:");
            eprintln!("  crdb-mcp-server --url postgresql://root@localhost:26257/defaultdb?sslmode=disable");
            eprintln!("  crdb-mcp-server --host localhost --username root --ssl-mode disable");
            std::process::exit(1);
        }
    };

    info!(
        transport = %config.transport,
        dsn = %descriptor.masked_url(),
        "Starting CockroachDB MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // The pool itself is created lazily on the first tool call.
    let ctx = AppContext::new(Some(descriptor), options);

    let result = match config.transport {
        TransportMode::Stdio => {
            info!("Using stdio transport");
            StdioTransport::new(ctx).run().await
        }
        TransportMode::Http => {
            info!(
                host = %config.http_host,
                port = config.http_port,
                endpoint = %config.mcp_endpoint,
                "Using HTTP transport"
            );
            let transport = HttpTransport::new(
                ctx,
                config.http_host.clone(),
                config.http_port,
                config.mcp_endpoint.clone(),
            );
            transport.run().await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
