//! HTTP server implementation.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;

/// HTTP server for the rate limit service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    app: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, app: Router) -> Self {
        Self { addr, app }
    }

    /// Bind the listener. Separate from serving so callers can learn the
    /// local address when binding port 0.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e.into()
        })
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind().await?;
        self.serve_on(listener, signal).await
    }

    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        info!(addr = %listener.local_addr()?, "Starting HTTP server with graceful shutdown");

        axum::serve(listener, self.app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e.into()
            })
    }
}
