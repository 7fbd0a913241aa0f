//! Per-operation deadline.
//!
//! An operation whose `call_timeout_ms` is zero runs under the layer's
//! fallback deadline instead. Expiry drops the inner future and yields
//! `OperationError::Timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    fallback_ms: u64,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(fallback_ms: u64) -> Self {
        Self { fallback_ms }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            fallback_ms: self.fallback_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    fallback_ms: u64,
}

impl<S> TimeoutService<S> {
    fn deadline_ms(&self, op: &Operation) -> u64 {
        match op.ctx().call_timeout_ms {
            0 => self.fallback_ms,
            ms => ms,
        }
    }
}

impl<S> Service<Operation> for TimeoutService<S>
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
        let timeout_ms = self.deadline_ms(&op);
        let name = op.ctx().name;
        let call_id = op.ctx().call_id;
        let inner = self.inner.call(op);
        Box::pin(async move {
            tokio::time::timeout(Duration::from_millis(timeout_ms), inner)
                .await
                .unwrap_or_else(|_| {
                    warn!(operation = name, call_id, timeout_ms, "operation deadline expired");
                    Err(OperationError::Timeout { timeout_ms })
                })
        })
    }
}
