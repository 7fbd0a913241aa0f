//! Network module with deferred startup lifecycle.
//!
//! `new()` allocates shared state, `start()` binds the listener and
//! `serve()` accepts requests until the shutdown future resolves, then
//! drains and stops the service host.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    create_media_handler, create_media_v2_handler, create_status_handler, get_media_handler,
    health_handler, liveness_handler, metrics_handler, readiness_handler, update_media_handler,
    ApiError, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::service::ServiceHost;

/// Owns the HTTP listener and serves the operation routes.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    host: Arc<ServiceHost>,
    shutdown: Arc<ShutdownController>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        host: Arc<ServiceHost>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            config,
            listener: None,
            host,
            shutdown: Arc::new(ShutdownController::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router.
    ///
    /// - `POST /api/v1/statuses`
    /// - `POST /api/v1/media`
    /// - `GET|PUT /api/v1/media/{id}`
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /metrics`
    ///
    /// API routes are refused with 503 unless the transport is `Ready`;
    /// probes always answer.
    pub fn build_router(&self) -> Router {
        let state = AppState {
            host: Arc::clone(&self.host),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        let api = Router::new()
            .route("/api/v1/statuses", post(create_status_handler))
            .route("/api/v1/media", post(create_media_handler))
            .route("/api/v2/media", post(create_media_v2_handler))
            .route(
                "/api/v1/media/{id}",
                get(get_media_handler).put(update_media_handler),
            )
            .route_layer(middleware::from_fn_with_state(
                Arc::clone(&self.shutdown),
                admit,
            ));

        Router::new()
            .merge(api)
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves.
    ///
    /// On shutdown the transport moves to `Draining`, new API requests get
    /// 503, in-flight ones get up to `drain_timeout` to finish, and the
    /// service host is shut down last.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .context("start() must be called before serve()")?;
        let router = self.build_router();
        let ctrl = Arc::clone(&self.shutdown);

        ctrl.set_ready();
        info!("serving HTTP");

        let signal_ctrl = Arc::clone(&ctrl);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                signal_ctrl.trigger_shutdown();
                info!("shutdown signalled, draining");
            })
            .await;

        // A fatal serve error still drains and stops the host.
        ctrl.trigger_shutdown();
        if ctrl.wait_for_drain(self.config.drain_timeout).await {
            info!("all requests drained");
        } else {
            warn!(
                in_flight = ctrl.in_flight_count(),
                "drain timeout expired with requests in flight"
            );
        }
        self.host.shutdown().await;

        served.context("HTTP server failed")
    }
}

async fn admit(
    State(shutdown): State<Arc<ShutdownController>>,
    request: Request,
    next: Next,
) -> Response {
    match shutdown.try_admit() {
        Some(_guard) => next.run(request).await,
        None => ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("server is {}", shutdown.health_state().as_str()),
        )
        .into_response(),
    }
}
