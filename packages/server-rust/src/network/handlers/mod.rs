//! HTTP handlers and the state they share.

pub mod error;
pub mod health;
pub mod ops;

pub use error::ApiError;
pub use health::{health_handler, liveness_handler, metrics_handler, readiness_handler};
pub use ops::{
    create_media_handler, create_media_v2_handler, create_status_handler, get_media_handler,
    update_media_handler,
};

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use super::{NetworkConfig, ShutdownController};
use crate::service::ServiceHost;

/// Shared state handed to every handler through `State`.
#[derive(Clone)]
pub struct AppState {
    /// Operation entry points.
    pub host: Arc<ServiceHost>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start, for uptime.
    pub start_time: Instant,
    /// Present when a Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}
