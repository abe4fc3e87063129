use super::error::Result;
use super::{create_relay_route, ConnectionHandler, MemoryStorage, RelayConfig};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A bound relay, ready to serve
pub struct RelayServer {
    listener: TcpListener,
    router: Router,
    path: String,
}

impl RelayServer {
    /// Bind the configured address with fresh in-memory storage
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let storage = Arc::new(MemoryStorage::new());
        let handler = ConnectionHandler::new(storage.clone(), storage);
        Self::bind_with(config, handler).await
    }

    pub async fn bind_with(config: &RelayConfig, handler: ConnectionHandler) -> Result<Self> {
        let listener = TcpListener::bind(config.address()).await?;
        Ok(Self {
            listener,
            router: create_relay_route(handler, config),
            path: config.route_path(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// `ws://` url peers should dial, without the uid query
    pub fn url(&self) -> Result<String> {
        Ok(format!("ws://{}{}", self.local_addr()?, self.path))
    }

    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            "🚀 Relay listening on ws://{}{}",
            self.listener.local_addr()?,
            self.path
        );
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Relay stopped");
        Ok(())
    }
}
