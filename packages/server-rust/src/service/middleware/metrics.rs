//! Metrics middleware for operations.
//!
//! Records duration and outcome on a `tracing` span and as `metrics`
//! counters and histograms labelled by operation name.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Label value for an operation result.
fn outcome(result: &Result<OperationResponse, OperationError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(OperationError::BadRequest(_) | OperationError::Unprocessable(_)) => "rejected",
        Err(OperationError::NotFound(_)) => "not_found",
        Err(OperationError::Timeout { .. }) => "timeout",
        Err(OperationError::Overloaded) => "overloaded",
        Err(OperationError::Bootstrap(_)) => "bootstrap_failed",
        Err(OperationError::UnexpectedResponse { .. } | OperationError::Internal(_)) => "error",
    }
}

impl<S> Service<Operation> for MetricsService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let name = op.ctx().name;
        let call_id = op.ctx().call_id;

        let span = info_span!(
            "operation",
            operation = name,
            call_id = call_id,
            actor = %op.ctx().actor_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!("weft_operations_total", "operation" => name, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("weft_operation_duration_seconds", "operation" => name)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Err(e) if outcome == "error" || outcome == "bootstrap_failed" => {
                        tracing::warn!(operation = name, call_id, duration_ms, error = %e, "operation failed");
                    }
                    _ => tracing::info!(operation = name, call_id, duration_ms, outcome, "operation complete"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
