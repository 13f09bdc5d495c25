use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::{Connection, ConnectionSettings, Handler, HandlerRegistry};
use crate::server::shutdown::ShutdownSignal;

/// HTTP server: handler registration, accept loop and graceful shutdown.
///
/// Handlers are registered on `&mut self` before [`run`](Self::run) consumes
/// the server, so the registry is immutable while connections are served.
pub struct Server {
    config: Config,
    registry: HandlerRegistry,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
        }
    }

    pub fn register_handler(&mut self, path: impl Into<String>, handler: impl Handler) {
        let path = path.into();
        debug!(%path, "Registered handler");
        self.registry.register(path, handler);
    }

    /// Binds `server.listen_addr` and serves until `shutdown` fires.
    pub async fn listen(self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        self.run(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// fires, then drains in-flight connections within the grace period.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> anyhow::Result<()> {
        let registry = Arc::new(self.registry);
        let settings: Arc<ConnectionSettings> = Arc::new(self.config.connection_settings());
        let poll_interval = self.config.server.accept_poll_interval();

        info!(address = %listener.local_addr()?, "Listening for incoming connections");

        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        while !shutdown.is_triggered() {
            let accepted = tokio::select! {
                _ = shutdown.recv() => break,
                res = tokio::time::timeout(poll_interval, listener.accept()) => res,
            };

            let (socket, peer) = match accepted {
                Err(_elapsed) => continue,
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    error!(error = %e, "Socket error while accepting");
                    continue;
                }
            };

            debug!(%peer, "New connection");

            let conn = Connection::new(socket, Arc::clone(&registry), Arc::clone(&settings))
                .with_peer(peer);
            in_flight.retain(|handle| !handle.is_finished());
            in_flight.push(tokio::spawn(async move {
                if let Err(e) = conn.run().await {
                    error!(%peer, error = %e, "Error closing connection");
                }
            }));
        }

        info!("Initiating server shutdown");
        drop(listener);

        in_flight.retain(|handle| !handle.is_finished());
        if !in_flight.is_empty() {
            let grace = self.config.server.shutdown_grace();
            info!(active = in_flight.len(), "Waiting for active connections to complete");

            let drained = tokio::time::timeout(grace, async {
                for handle in in_flight.iter_mut() {
                    if let Err(e) = handle.await {
                        error!(error = %e, "Connection task failed");
                    }
                }
            })
            .await;

            if drained.is_err() {
                let remaining = in_flight.iter().filter(|h| !h.is_finished()).count();
                warn!(remaining, "Connections did not complete gracefully");
            }
        }

        info!("Server shutdown complete");
        Ok(())
    }
}
