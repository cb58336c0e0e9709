//! Web server module.

mod handlers;

use crate::cache::CacheClient;
use crate::config::ServerConfig;
use crate::monitor::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub monitor: Arc<Mutex<Monitor>>,
    pub cache: CacheClient,
}

/// Web server for VitalTrail.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, monitor: Arc<Mutex<Monitor>>, cache: CacheClient) -> Self {
        Self {
            state: AppState {
                config,
                monitor,
                cache,
            },
        }
    }

    /// Build the router with all routes. Anything the API does not claim
    /// is proxied through the cache worker.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            // Telemetry API
            .route("/api/vitals", get(handlers::handle_get_vitals))
            .route("/api/alerts", get(handlers::handle_get_alerts))
            .route("/api/reports", get(handlers::handle_get_reports))
            .route("/api/session", get(handlers::handle_get_session))
            .route("/api/cache/status", get(handlers::handle_cache_status))
            // Ingest
            .route("/api/ingest/entries", post(handlers::handle_ingest_entries))
            .route(
                "/api/ingest/interactions",
                post(handlers::handle_ingest_interactions),
            )
            .route("/api/ingest/errors", post(handlers::handle_ingest_errors))
            .route("/api/ingest/memory", post(handlers::handle_ingest_memory))
            // Everything else goes through the cache worker
            .fallback(handlers::handle_proxied_fetch)
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
