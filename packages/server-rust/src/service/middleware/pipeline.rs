//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::admission::AdmissionLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::ServerConfig;
use crate::service::handler::OperationHandler;
use crate::service::operation::{Operation, OperationError, OperationResponse};

/// The type-erased operation pipeline.
pub type OperationPipeline = BoxCloneService<Operation, OperationResponse, OperationError>;

/// Wraps the `OperationHandler` with the middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `AdmissionLayer`: reject when overloaded, before any work
/// 2. `MetricsLayer`: record timing and outcome, including timeouts
/// 3. `TimeoutLayer`: enforce per-operation deadlines, falling back to
///    `default_operation_timeout_ms`
#[must_use]
pub fn build_operation_pipeline(handler: OperationHandler, config: &ServerConfig) -> OperationPipeline {
    BoxCloneService::new(
        ServiceBuilder::new()
            .layer(AdmissionLayer::new(config.max_concurrent_operations))
            .layer(MetricsLayer)
            .layer(TimeoutLayer::new(config.default_operation_timeout_ms))
            .service(handler),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use weft_core::{Account, StatusCreateForm};

    use super::*;
    use crate::bootstrap::{bootstrap, DefaultBackends};
    use crate::processing::{LocalProcessor, Processor};
    use crate::service::handler::ContextSource;
    use crate::service::operation::{operation_names, OperationContext};

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(ServerConfig {
            storage_root: dir.path().to_path_buf(),
            max_concurrent_operations: 100,
            ..ServerConfig::default()
        });
        let ctx = Arc::new(
            bootstrap(Arc::clone(&config), &DefaultBackends::new(), &CancellationToken::new())
                .await
                .unwrap(),
        );
        ctx.wire(LocalProcessor.lane_handlers(ctx.events()));
        let handler = OperationHandler::new(
            ContextSource::Shared(Arc::clone(&ctx)),
            Arc::new(LocalProcessor),
        );

        let svc = build_operation_pipeline(handler, &config);
        let op = Operation::CreateStatus {
            ctx: OperationContext::new(42, operation_names::CREATE_STATUS, "alice-id", 5000),
            requester: Account {
                id: "alice-id".to_string(),
                username: "alice".to_string(),
                domain: None,
                display_name: String::new(),
                created_at: 0,
            },
            application: None,
            form: StatusCreateForm {
                status: "through the pipeline".to_string(),
                ..StatusCreateForm::default()
            },
        };
        let resp = svc.clone().oneshot(op).await.unwrap();
        assert!(matches!(resp, OperationResponse::Status(s) if s.content == "through the pipeline"));
        ctx.teardown().await;
    }
}
