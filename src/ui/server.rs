//! Status HTTP server
//!
//! Serves the latest [`Snapshot`] published by the tick loop. Handlers only
//! ever take the read lock.

use axum::{routing::get, Router};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::config::UiConfig;
use crate::transport::Snapshot;
use crate::ui::handlers;
use crate::{Error, Result};

/// Snapshot shared between the tick loop (writer) and the server (readers)
pub type SharedSnapshot = Arc<RwLock<Snapshot>>;

pub fn create_shared_snapshot() -> SharedSnapshot {
    Arc::new(RwLock::new(Snapshot::default()))
}

pub struct WebServer {
    config: UiConfig,
    snapshot: SharedSnapshot,
}

impl WebServer {
    pub fn new(config: UiConfig, snapshot: SharedSnapshot) -> Self {
        Self { config, snapshot }
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.config.bind_address, self.config.http_port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid ui bind address: {}", e)))
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/hosts", get(handlers::get_hosts))
            .route("/api/streams", get(handlers::get_streams))
            .route("/api/subscriptions", get(handlers::get_subscriptions))
            .layer(cors)
            .with_state(self.snapshot.clone())
    }

    /// Bind and serve until the task is aborted
    pub async fn run(self) -> Result<()> {
        let addr = self.addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Status server listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    /// Spawn the server on the current runtime
    pub fn start_background(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Status server failed: {}", e);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_bind_address() {
        let config = UiConfig {
            bind_address: "not an ip".into(),
            ..UiConfig::default()
        };
        let server = WebServer::new(config, create_shared_snapshot());
        assert!(matches!(server.addr(), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_addr() {
        let server = WebServer::new(UiConfig::default(), create_shared_snapshot());
        assert_eq!(server.addr().unwrap().to_string(), "127.0.0.1:8080");
    }
}
