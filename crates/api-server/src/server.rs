//! API server: HTTP routes for rotation and administration plus the
//! Prometheus exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use banner_core::config::AppConfig;
use banner_rotation::RotationProcessor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Build the HTTP router over the given state.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Rotation
        .route("/get_banner", post(rest::get_banner))
        .route("/show", post(rest::show))
        .route("/click", post(rest::click))
        // Administration
        .route("/slot", post(rest::add_slot).delete(rest::remove_slot))
        .route("/banner", post(rest::add_banner).delete(rest::remove_banner))
        .route("/group", post(rest::add_group).delete(rest::remove_group))
        .route("/relation", post(rest::add_relation).delete(rest::remove_relation))
        .route("/banners", get(rest::all_banners))
        .route("/groups", get(rest::all_groups))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiServer {
    config: AppConfig,
    processor: Arc<RotationProcessor>,
}

impl ApiServer {
    pub fn new(config: AppConfig, processor: Arc<RotationProcessor>) -> Self {
        Self { config, processor }
    }

    /// Serve HTTP until ctrl-c, then flush the event publisher.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let state = AppState {
            processor: self.processor.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
        };
        let app = router(state);

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, flushing publisher");
        self.processor.publisher().shutdown().await?;
        Ok(())
    }

    /// Start the metrics exporter on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
