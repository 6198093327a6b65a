//! API server: HTTP routes plus the Prometheus exporter.

use crate::rest::{self, AppState};
use crate::stream;
use axum::routing::{delete, get, post};
use axum::Router;
use rotator_core::config::AppConfig;
use rotator_core::event_bus::cancelled;
use rotator_core::Shutdown;
use rotator_orchestrator::BannerRotator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Every route, with middleware, bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Slot management
        .route(
            "/v1/slots",
            post(rest::add_slot)
                .get(rest::list_slots)
                .delete(rest::delete_all_slots),
        )
        .route("/v1/slots/:slot_id", delete(rest::delete_slot))
        // Banner management
        .route(
            "/v1/slots/:slot_id/banners",
            post(rest::add_banner)
                .get(rest::list_banners)
                .delete(rest::delete_all_banners),
        )
        .route(
            "/v1/slots/:slot_id/banners/:banner_id",
            delete(rest::delete_banner),
        )
        // Serving
        .route("/v1/next-banner", post(rest::next_banner))
        .route("/v1/clicks", post(rest::click))
        // Statistics
        .route("/v1/stats", get(rest::stats))
        .route("/v1/stats/stream", get(stream::stats_stream))
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
    rotator: Arc<BannerRotator>,
}

impl ApiServer {
    pub fn new(config: AppConfig, rotator: Arc<BannerRotator>) -> Self {
        Self { config, rotator }
    }

    /// Serve HTTP until `shutdown` fires, then finish in-flight requests.
    pub async fn start_http(&self, shutdown: Shutdown) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener. Open statistics streams end when
    /// `shutdown` fires, so graceful shutdown does not wait on them.
    pub async fn serve(&self, listener: TcpListener, mut shutdown: Shutdown) -> anyhow::Result<()> {
        let state = AppState {
            rotator: self.rotator.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
            stats_interval: Duration::from_secs(self.config.api.stats_interval_secs.max(1)),
            shutdown: shutdown.clone(),
        };
        let app = router(state);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancelled(&mut shutdown).await })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
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
