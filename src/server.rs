//! Gateway HTTP server
//!
//! Owns the listening socket and hands every accepted connection to
//! [`SnapshotGateway::handle`]. One task per connection; body streaming
//! continues inside the connection task while the accept loop moves on.

use crate::gateway::SnapshotGateway;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// HTTP front end for the snapshot gateway
pub struct GatewayServer {
    gateway: Arc<SnapshotGateway>,
}

impl GatewayServer {
    /// Create a server around a configured gateway
    pub fn new(gateway: Arc<SnapshotGateway>) -> Self {
        Self { gateway }
    }

    /// Bind the configured listen address and serve until terminated
    ///
    /// The gateway never fails a request (errors become error responses),
    /// so the per-connection service is infallible; only the bind and
    /// accept calls can return an error here.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.gateway.config().listen_address).await?;
        info!(
            "Snapshot gateway listening on http://{}",
            self.gateway.config().listen_address
        );
        info!("Serving snapshots of {}", self.gateway.config().origin_url);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let gateway = Arc::clone(&self.gateway);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(gateway.handle(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    // Disconnects mid-download are routine for a gateway
                    debug!("connection from {} ended with error: {:?}", peer, err);
                }
            });
        }
    }
}
