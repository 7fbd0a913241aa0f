//! The innermost service: obtains a resource context and dispatches the
//! operation to the processor.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, Instrument};

use super::config::ServerConfig;
use super::operation::{MediaOp, Operation, OperationError, OperationResponse};
use crate::bootstrap::{bootstrap, Backends, ResourceContext};
use crate::processing::Processor;

// ---------------------------------------------------------------------------
// ContextSource
// ---------------------------------------------------------------------------

/// Where operations get their [`ResourceContext`] from.
pub enum ContextSource {
    /// One long-lived context shared by every operation.
    Shared(Arc<ResourceContext>),
    /// A fresh context per operation, torn down when it returns.
    PerInvocation {
        config: Arc<ServerConfig>,
        backends: Arc<dyn Backends>,
        cancel: CancellationToken,
    },
}

/// Counters over per-invocation contexts.
#[derive(Debug, Default)]
pub struct InvocationCounters {
    bootstraps: AtomicU64,
    teardowns: AtomicU64,
    active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InvocationStats {
    pub bootstraps: u64,
    pub teardowns: u64,
    pub active: usize,
}

impl InvocationCounters {
    #[must_use]
    pub fn snapshot(&self) -> InvocationStats {
        InvocationStats {
            bootstraps: self.bootstraps.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// OperationHandler
// ---------------------------------------------------------------------------

/// `tower::Service<Operation>` running each operation against a context.
#[derive(Clone)]
pub struct OperationHandler {
    source: Arc<ContextSource>,
    processor: Arc<dyn Processor>,
    counters: Arc<InvocationCounters>,
}

impl OperationHandler {
    #[must_use]
    pub fn new(source: ContextSource, processor: Arc<dyn Processor>) -> Self {
        Self {
            source: Arc::new(source),
            processor,
            counters: Arc::new(InvocationCounters::default()),
        }
    }

    #[must_use]
    pub fn counters(&self) -> &Arc<InvocationCounters> {
        &self.counters
    }

    async fn handle(
        source: Arc<ContextSource>,
        processor: Arc<dyn Processor>,
        counters: Arc<InvocationCounters>,
        op: Operation,
    ) -> Result<OperationResponse, OperationError> {
        match &*source {
            ContextSource::Shared(ctx) => execute(ctx, processor.as_ref(), op).await,
            ContextSource::PerInvocation {
                config,
                backends,
                cancel,
            } => {
                let call_cancel = cancel.child_token();
                // Dropping the caller's future (e.g. on timeout) cancels the
                // invocation; the spawned task still tears the context down.
                let _abort_on_drop = call_cancel.clone().drop_guard();
                let config = Arc::clone(config);
                let backends = Arc::clone(backends);
                let span = tracing::Span::current();
                let task = tokio::spawn(
                    async move {
                        let ctx = match bootstrap(config, backends.as_ref(), &call_cancel).await {
                            Ok(ctx) => ctx,
                            Err(e) => return Err(OperationError::from(e)),
                        };
                        counters.bootstraps.fetch_add(1, Ordering::Relaxed);
                        counters.active.fetch_add(1, Ordering::Relaxed);
                        ctx.wire(processor.lane_handlers(ctx.events()));

                        let result = tokio::select! {
                            biased;
                            () = call_cancel.cancelled() => Err(OperationError::Internal(
                                anyhow::anyhow!("invocation cancelled"),
                            )),
                            result = execute(&ctx, processor.as_ref(), op) => result,
                        };

                        if ctx.teardown().await {
                            counters.teardowns.fetch_add(1, Ordering::Relaxed);
                        }
                        counters.active.fetch_sub(1, Ordering::Relaxed);
                        debug!(invocation = %ctx.invocation_id(), ok = result.is_ok(), "invocation finished");
                        result
                    }
                    .instrument(span),
                );
                match task.await {
                    Ok(result) => result,
                    Err(e) => Err(OperationError::Internal(anyhow::anyhow!(
                        "invocation task failed: {e}"
                    ))),
                }
            }
        }
    }
}

impl Service<Operation> for OperationHandler {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(Self::handle(
            Arc::clone(&self.source),
            Arc::clone(&self.processor),
            Arc::clone(&self.counters),
            op,
        ))
    }
}

/// Runs `op` against `ctx`. The single dispatch point for every operation.
///
/// # Errors
///
/// [`OperationError::BadRequest`] when a media payload lacks what its
/// operation needs; otherwise whatever the processor reports.
pub async fn execute(
    ctx: &ResourceContext,
    processor: &dyn Processor,
    op: Operation,
) -> Result<OperationResponse, OperationError> {
    match op {
        Operation::CreateStatus {
            requester,
            application,
            form,
            ..
        } => {
            let status = processor
                .status()
                .create(ctx, &requester, application.as_ref(), &form)
                .await?;
            Ok(OperationResponse::Status(Box::new(status)))
        }
        Operation::Media {
            ctx: op_ctx,
            op,
            payload,
        } => {
            let missing = |what: &str| {
                OperationError::BadRequest(format!("{} requires {what}", op.name()))
            };
            let media = processor.media();
            let attachment = match op {
                MediaOp::Create => {
                    let envelope = payload.envelope.ok_or_else(|| missing("a file envelope"))?;
                    media.create(ctx, &op_ctx.actor_id, envelope).await?
                }
                MediaOp::Update => {
                    let media_id = payload.media_id.ok_or_else(|| missing("a media id"))?;
                    let update = payload.update.ok_or_else(|| missing("an update form"))?;
                    media
                        .update(ctx, &op_ctx.actor_id, &media_id, &update)
                        .await?
                }
                MediaOp::Get => {
                    let media_id = payload.media_id.ok_or_else(|| missing("a media id"))?;
                    media.get(ctx, &op_ctx.actor_id, &media_id).await?
                }
            };
            Ok(OperationResponse::Attachment(Box::new(attachment)))
        }
    }
}

#[cfg(test)]
mod tests {
    use tower::ServiceExt;
    use weft_core::{Account, StatusCreateForm};

    use super::*;
    use crate::bootstrap::DefaultBackends;
    use crate::processing::LocalProcessor;
    use crate::service::operation::{operation_names, MediaPayload, OperationContext};

    fn per_invocation(root: &std::path::Path) -> OperationHandler {
        let config = Arc::new(ServerConfig {
            storage_root: root.to_path_buf(),
            ..ServerConfig::default()
        });
        OperationHandler::new(
            ContextSource::PerInvocation {
                config,
                backends: Arc::new(DefaultBackends::new()),
                cancel: CancellationToken::new(),
            },
            Arc::new(LocalProcessor),
        )
    }

    fn status_op(text: &str) -> Operation {
        Operation::CreateStatus {
            ctx: OperationContext::new(1, operation_names::CREATE_STATUS, "alice-id", 5_000),
            requester: Account {
                id: "alice-id".to_string(),
                username: "alice".to_string(),
                domain: None,
                display_name: String::new(),
                created_at: 0,
            },
            application: None,
            form: StatusCreateForm {
                status: text.to_string(),
                ..StatusCreateForm::default()
            },
        }
    }

    #[tokio::test]
    async fn per_invocation_tears_down_on_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let handler = per_invocation(dir.path());

        let resp = handler.clone().oneshot(status_op("hi")).await.unwrap();
        assert!(matches!(resp, OperationResponse::Status(_)));
        let err = handler.clone().oneshot(status_op("")).await.unwrap_err();
        assert!(matches!(err, OperationError::BadRequest(_)));

        let stats = handler.counters().snapshot();
        assert_eq!(stats.bootstraps, 2);
        assert_eq!(stats.teardowns, 2);
        assert_eq!(stats.active, 0);
        let leftover_locks = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".lock"))
            .count();
        assert_eq!(leftover_locks, 0);
    }

    #[tokio::test]
    async fn media_payload_must_match_operation() {
        let dir = tempfile::tempdir().unwrap();
        let handler = per_invocation(dir.path());
        let op = Operation::Media {
            ctx: OperationContext::new(2, operation_names::UPDATE_MEDIA, "alice-id", 5_000),
            op: MediaOp::Update,
            payload: MediaPayload::get("m1"),
        };
        let err = handler.oneshot(op).await.unwrap_err();
        assert!(matches!(err, OperationError::BadRequest(msg) if msg.contains("update form")));
    }
}
