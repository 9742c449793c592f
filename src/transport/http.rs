//! Streamable HTTP transport.
//!
//! Every MCP session gets its own [`CrdbService`]; all sessions share one [`AppContext`],
//! so the pool and the query history are process-wide.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::mcp::CrdbService;
use crate::transport::{Transport, wait_for_signal};
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// How long open streams may hold the server after the first shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpTransport {
    ctx: AppContext,
    host: String,
    port: u16,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(ctx: AppContext, host: impl Into<String>, port: u16, endpoint: impl Into<String>) -> Self {
        Self {
            ctx,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn router(&self) -> Router {
        let ctx = self.ctx.clone();
        let service = StreamableHttpService::new(
            move || Ok(CrdbService::new(ctx.clone())),
            LocalSessionManager::default().into(),
            Default::default(),
        );
        mount(service, &self.endpoint)
    }

    async fn serve(&self, listener: TcpListener) -> DbResult<()> {
        let draining = Arc::new(Notify::new());
        let signal_draining = draining.clone();
        let server = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            wait_for_signal().await;
            signal_draining.notify_one();
        });

        tokio::select! {
            result = server => result.map_err(|e| {
                error!(error = %e, "HTTP server error");
                DbError::internal(format!("HTTP server error: {}", e))
            }),
            _ = drain_deadline(&draining) => Ok(()),
        }
    }
}

/// Mount the MCP service at `endpoint`. `nest_service` rejects "/", so the root uses the
/// fallback.
fn mount(service: StreamableHttpService<CrdbService, LocalSessionManager>, endpoint: &str) -> Router {
    if endpoint == "/" {
        Router::new().fallback_service(service)
    } else {
        Router::new().nest_service(endpoint, service)
    }
}

/// Resolves once draining has gone on too long or a second signal arrives.
async fn drain_deadline(draining: &Notify) {
    draining.notified().await;
    info!(
        timeout_secs = DRAIN_TIMEOUT.as_secs(),
        "Draining open streams (send signal again to force exit)"
    );
    tokio::select! {
        _ = tokio::time::sleep(DRAIN_TIMEOUT) => warn!("Drain timeout reached, forcing exit"),
        _ = wait_for_signal() => warn!("Received second signal, forcing exit"),
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;
        info!(addr = %bind_addr, endpoint = %self.endpoint, "MCP HTTP endpoint ready");

        let outcome = self.serve(listener).await;
        if outcome.is_ok() {
            info!("HTTP server stopped");
        }

        self.ctx.shutdown().await;
        outcome
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;

    fn transport(host: &str, port: u16, endpoint: &str) -> HttpTransport {
        HttpTransport::new(AppContext::new(None, PoolOptions::default()), host, port, endpoint)
    }

    #[test]
    fn test_http_transport_creation() {
        let transport = transport("127.0.0.1", 8080, "/mcp");
        assert_eq!(transport.name(), "http");
        assert_eq!(transport.bind_addr(), "127.0.0.1:8080");
        assert_eq!(transport.endpoint(), "/mcp");
    }

    #[tokio::test]
    async fn test_bind_failure_is_connection_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = transport("127.0.0.1", port, "/").run().await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }
}
