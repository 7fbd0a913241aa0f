//! `ServiceHost`: the operation entry points.
//!
//! In [`ContextMode::Shared`] the host bootstraps one context at startup and
//! every call runs against it. In [`ContextMode::PerInvocation`] each call
//! bootstraps and tears down its own context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::info;
use weft_core::{Account, Application, Attachment, Status, StatusCreateForm};

use super::config::{ContextMode, ServerConfig};
use super::handler::{ContextSource, InvocationCounters, InvocationStats, OperationHandler};
use super::middleware::{build_operation_pipeline, OperationPipeline};
use super::operation::{
    operation_names, MediaOp, MediaPayload, Operation, OperationContext, OperationError,
    OperationResponse,
};
use crate::bootstrap::{bootstrap, Backends, BootstrapError, ResourceContext};
use crate::cache::CacheOccupancy;
use crate::processing::Processor;
use crate::worker::LaneDepths;

/// Point-in-time view for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub mode: &'static str,
    /// Lane depths of the shared context; absent in per-invocation mode.
    pub lanes: Option<LaneDepths>,
    pub caches: Vec<CacheOccupancy>,
    pub invocations: InvocationStats,
}

pub struct ServiceHost {
    config: Arc<ServerConfig>,
    shared: Option<Arc<ResourceContext>>,
    pipeline: Mutex<OperationPipeline>,
    counters: Arc<InvocationCounters>,
    cancel: CancellationToken,
    call_ids: AtomicU64,
}

impl ServiceHost {
    /// Builds the host. In shared mode this bootstraps the long-lived context.
    ///
    /// # Errors
    ///
    /// [`BootstrapError`] if the shared context cannot be built.
    pub async fn start(
        config: Arc<ServerConfig>,
        backends: Arc<dyn Backends>,
        processor: Arc<dyn Processor>,
        cancel: CancellationToken,
    ) -> Result<Self, BootstrapError> {
        let (source, shared) = match config.context_mode {
            ContextMode::Shared => {
                let ctx = Arc::new(bootstrap(Arc::clone(&config), backends.as_ref(), &cancel).await?);
                ctx.wire(processor.lane_handlers(ctx.events()));
                (ContextSource::Shared(Arc::clone(&ctx)), Some(ctx))
            }
            ContextMode::PerInvocation => (
                ContextSource::PerInvocation {
                    config: Arc::clone(&config),
                    backends,
                    cancel: cancel.clone(),
                },
                None,
            ),
        };
        let handler = OperationHandler::new(source, processor);
        let counters = Arc::clone(handler.counters());
        let pipeline = build_operation_pipeline(handler, &config);
        info!(mode = mode_name(config.context_mode), "service host started");
        Ok(Self {
            config,
            shared,
            pipeline: Mutex::new(pipeline),
            counters,
            cancel,
            call_ids: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The long-lived context, in shared mode.
    #[must_use]
    pub fn shared_context(&self) -> Option<&Arc<ResourceContext>> {
        self.shared.as_ref()
    }

    fn op_ctx(&self, name: &'static str, actor_id: &str) -> OperationContext {
        OperationContext::new(
            self.call_ids.fetch_add(1, Ordering::Relaxed),
            name,
            actor_id,
            self.config.default_operation_timeout_ms,
        )
    }

    async fn dispatch(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        let svc = self.pipeline.lock().clone();
        svc.oneshot(op).await
    }

    /// Creates a status for `requester`.
    ///
    /// # Errors
    ///
    /// See [`OperationError`].
    pub async fn create_status(
        &self,
        requester: Account,
        application: Option<Application>,
        form: StatusCreateForm,
    ) -> Result<Status, OperationError> {
        let op = Operation::CreateStatus {
            ctx: self.op_ctx(operation_names::CREATE_STATUS, &requester.id),
            requester,
            application,
            form,
        };
        match self.dispatch(op).await? {
            OperationResponse::Status(status) => Ok(*status),
            OperationResponse::Attachment(_) => Err(OperationError::UnexpectedResponse {
                operation: operation_names::CREATE_STATUS,
            }),
        }
    }

    /// Runs a media create, update or get on behalf of `actor_id`.
    ///
    /// # Errors
    ///
    /// See [`OperationError`].
    pub async fn do_media_operation(
        &self,
        op: MediaOp,
        actor_id: &str,
        payload: MediaPayload,
    ) -> Result<Attachment, OperationError> {
        let operation = Operation::Media {
            ctx: self.op_ctx(op.name(), actor_id),
            op,
            payload,
        };
        match self.dispatch(operation).await? {
            OperationResponse::Attachment(attachment) => Ok(*attachment),
            OperationResponse::Status(_) => Err(OperationError::UnexpectedResponse {
                operation: op.name(),
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> HostStats {
        HostStats {
            mode: mode_name(self.config.context_mode),
            lanes: self.shared.as_ref().map(|ctx| ctx.workers().depths()),
            caches: self
                .shared
                .as_ref()
                .map(|ctx| ctx.caches().occupancy())
                .unwrap_or_default(),
            invocations: self.counters.snapshot(),
        }
    }

    /// Whether operations can currently be served.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.cancel.is_cancelled() && self.shared.as_ref().map_or(true, |ctx| !ctx.is_torn_down())
    }

    /// Cancels pending per-invocation bootstraps and tears down the shared
    /// context. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(ctx) = &self.shared {
            ctx.teardown().await;
        }
        info!("service host stopped");
    }
}

fn mode_name(mode: ContextMode) -> &'static str {
    match mode {
        ContextMode::Shared => "shared",
        ContextMode::PerInvocation => "per-invocation",
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use weft_core::{Envelope, FileRecord, MimeHeader};

    use super::*;
    use crate::bootstrap::DefaultBackends;
    use crate::processing::LocalProcessor;

    fn alice() -> Account {
        Account {
            id: "alice-id".to_string(),
            username: "alice".to_string(),
            domain: None,
            display_name: "Alice".to_string(),
            created_at: 0,
        }
    }

    fn upload() -> MediaPayload {
        let mut header = MimeHeader::new();
        header.set("Content-Type", "image/jpeg");
        MediaPayload::create(Envelope {
            file: Some(FileRecord::new("pic.jpg", header, vec![0xff, 0xd8, 0xff])),
            description: String::new(),
            focus: String::new(),
        })
    }

    async fn host(root: &std::path::Path, mode: ContextMode) -> ServiceHost {
        host_with(ServerConfig {
            host: "weft.example".to_string(),
            storage_root: root.to_path_buf(),
            context_mode: mode,
            ..ServerConfig::default()
        })
        .await
    }

    async fn host_with(config: ServerConfig) -> ServiceHost {
        let config = Arc::new(config);
        ServiceHost::start(
            config,
            Arc::new(DefaultBackends::new()),
            Arc::new(LocalProcessor),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn shared_mode_serves_media_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path(), ContextMode::Shared).await;

        let created = host
            .do_media_operation(MediaOp::Create, "alice-id", upload())
            .await
            .unwrap();
        let fetched = host
            .do_media_operation(MediaOp::Get, "alice-id", MediaPayload::get(&created.id))
            .await
            .unwrap();
        assert_eq!(created, fetched);

        let stats = host.stats();
        assert_eq!(stats.mode, "shared");
        assert!(stats.lanes.is_some());
        assert_eq!(stats.caches.len(), 4);
        assert!(host.is_ready());

        host.shutdown().await;
        host.shutdown().await;
        assert!(!host.is_ready());
    }

    #[tokio::test]
    async fn per_invocation_create_status_tears_down_once() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path(), ContextMode::PerInvocation).await;

        let status = host
            .create_status(alice(), None, StatusCreateForm {
                status: "per invocation".to_string(),
                ..StatusCreateForm::default()
            })
            .await
            .unwrap();
        assert_eq!(status.account_id, "alice-id");

        let stats = host.stats();
        assert_eq!(stats.mode, "per-invocation");
        assert_eq!(stats.invocations.bootstraps, 1);
        assert_eq!(stats.invocations.teardowns, 1);
        assert_eq!(stats.invocations.active, 0);
        assert!(stats.lanes.is_none());
        host.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_invocations_do_not_share_a_lock() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(host(dir.path(), ContextMode::PerInvocation).await);

        let calls: Vec<_> = (0..4)
            .map(|i| {
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    host.create_status(alice(), None, StatusCreateForm {
                        status: format!("concurrent {i}"),
                        ..StatusCreateForm::default()
                    })
                    .await
                })
            })
            .collect();

        let finished = tokio::time::timeout(Duration::from_secs(10), async {
            for call in calls {
                call.await.unwrap().unwrap();
            }
        })
        .await;
        assert!(finished.is_ok(), "an invocation was blocked by another's lock");

        let stats = host.stats();
        assert_eq!(stats.invocations.bootstraps, 4);
        assert_eq!(stats.invocations.teardowns, 4);
        host.shutdown().await;
    }

    #[cfg(feature = "redb")]
    #[tokio::test]
    async fn concurrent_invocations_share_the_redb_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(
            host_with(ServerConfig {
                host: "weft.example".to_string(),
                storage_root: dir.path().join("media"),
                database: crate::service::DatabaseConfig::Redb {
                    path: dir.path().join("db").join("weft.redb"),
                },
                context_mode: ContextMode::PerInvocation,
                ..ServerConfig::default()
            })
            .await,
        );

        let calls: Vec<_> = (0..4)
            .map(|i| {
                let host = Arc::clone(&host);
                tokio::spawn(async move {
                    host.create_status(alice(), None, StatusCreateForm {
                        status: format!("redb {i}"),
                        ..StatusCreateForm::default()
                    })
                    .await
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        let created = host
            .do_media_operation(MediaOp::Create, "alice-id", upload())
            .await
            .unwrap();
        let fetched = host
            .do_media_operation(MediaOp::Get, "alice-id", MediaPayload::get(&created.id))
            .await
            .unwrap();
        assert_eq!(created, fetched);

        let stats = host.stats();
        assert_eq!(stats.invocations.bootstraps, 6);
        assert_eq!(stats.invocations.teardowns, 6);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn bootstrap_failure_surfaces_as_operation_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let host = host(&blocker, ContextMode::PerInvocation).await;

        let err = host
            .do_media_operation(MediaOp::Create, "alice-id", upload())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Bootstrap(ref e) if e.stage == crate::bootstrap::Stage::StorageOpen
        ));
        assert_eq!(host.stats().invocations.teardowns, 0);
    }
}
