//! HTTP server.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// HTTP server hosting a governed router.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Routes to serve
    router: Router,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    ///
    /// Peer addresses are made available as `ConnectInfo<SocketAddr>` for
    /// client identification.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let router = Router::new().route("/", get(|| async { "ok" }));
        let server = HttpServer::new(SocketAddr::from(([127, 0, 0, 1], 0)), router);

        let result = server
            .serve_with_shutdown(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_bind_failure_is_io_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let server = HttpServer::new(addr, Router::new());

        let result = server.serve_with_shutdown(async {}).await;
        assert!(matches!(result, Err(crate::error::TollgateError::Io(_))));
    }
}
