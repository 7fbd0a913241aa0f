//! Concurrency cap for operations.
//!
//! Each admitted operation holds a slot until its future completes or is
//! dropped. With every slot taken the operation fails at once with
//! `OperationError::Overloaded`; nothing waits here. The number of held
//! slots is published as the `weft_operations_in_flight` gauge.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};
use tracing::debug;

use crate::service::operation::{Operation, OperationError, OperationResponse};

struct Slots {
    limit: usize,
    held: AtomicUsize,
}

impl Slots {
    #[allow(clippy::cast_precision_loss)]
    fn claim(self: &Arc<Self>) -> Option<Slot> {
        let claimed = self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.limit).then_some(held + 1)
            })
            .ok()?;
        metrics::gauge!("weft_operations_in_flight").set((claimed + 1) as f64);
        Some(Slot(Arc::clone(self)))
    }
}

/// Released on drop, including when a timeout abandons the operation.
struct Slot(Arc<Slots>);

impl Drop for Slot {
    #[allow(clippy::cast_precision_loss)]
    fn drop(&mut self) {
        let before = self.0.held.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("weft_operations_in_flight").set(before.saturating_sub(1) as f64);
    }
}

#[derive(Clone)]
pub struct AdmissionLayer {
    slots: Arc<Slots>,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            slots: Arc::new(Slots {
                limit: max_concurrent as usize,
                held: AtomicUsize::new(0),
            }),
        }
    }

    /// Operations currently admitted.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.held.load(Ordering::Acquire)
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            slots: Arc::clone(&self.slots),
        }
    }
}

#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    slots: Arc<Slots>,
}

impl<S> Service<Operation> for AdmissionService<S>
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
        let Some(slot) = self.slots.claim() else {
            debug!(operation = name, limit = self.slots.limit, "operation shed");
            metrics::counter!("weft_operations_shed_total", "operation" => name).increment(1);
            return Box::pin(async { Err(OperationError::Overloaded) });
        };

        let running = self.inner.call(op);
        Box::pin(async move {
            let _slot = slot;
            running.await
        })
    }
}
