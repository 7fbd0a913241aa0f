//! Tower middleware layers for the operation pipeline.
//!
//! - [`timeout`]: Per-operation timeout enforcement
//! - [`metrics`]: Operation timing and outcome via `tracing` spans and `metrics`
//! - [`admission`]: concurrency cap with immediate shedding
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod admission;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use admission::AdmissionLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;

#[cfg(test)]
pub(crate) mod testing {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use tower::Service;
    use weft_core::Attachment;

    use crate::service::operation::{
        operation_names, MediaOp, MediaPayload, Operation, OperationContext, OperationError,
        OperationResponse,
    };

    /// Service that answers with an empty attachment after `delay_ms`.
    #[derive(Clone)]
    pub(crate) struct DelayService {
        pub(crate) delay_ms: u64,
    }

    impl Service<Operation> for DelayService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            let id = op.ctx().call_id.to_string();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Attachment(Box::new(Attachment {
                    id,
                    ..Attachment::default()
                })))
            })
        }
    }

    pub(crate) fn get_media_op(call_id: u64, timeout_ms: u64) -> Operation {
        Operation::Media {
            ctx: OperationContext::new(call_id, operation_names::GET_MEDIA, "alice-id", timeout_ms),
            op: MediaOp::Get,
            payload: MediaPayload::get("m1"),
        }
    }
}
