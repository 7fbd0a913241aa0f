//! Staged construction of a [`ResourceContext`].
//!
//! Stages run strictly in order: `cache-init`, `db-open`, `storage-open`,
//! `worker-start`, `scheduler-register`. The first failure is wrapped with
//! its stage label, later stages are skipped, and every completed stage is
//! torn down in reverse before [`bootstrap`] returns.

mod context;

pub use context::ResourceContext;

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::cache::Caches;
use crate::db::SharedStores;
use crate::service::config::{CacheConfig, DatabaseConfig, ServerConfig};
use crate::storage::{lock_file_name, LocalStorage};
use crate::traits::{BlobStorage, Database};
use crate::worker::{Start, TaskCallback, WorkerPool, CACHE_SWEEP_TASK_ID};

// ---------------------------------------------------------------------------
// Stages and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CacheInit,
    DbOpen,
    StorageOpen,
    WorkerStart,
    SchedulerRegister,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheInit => "cache-init",
            Self::DbOpen => "db-open",
            Self::StorageOpen => "storage-open",
            Self::WorkerStart => "worker-start",
            Self::SchedulerRegister => "scheduler-register",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bootstrap failed at `stage`. Completed stages have already been torn down.
#[derive(Debug, thiserror::Error)]
#[error("bootstrap failed at {stage}: {source:#}")]
pub struct BootstrapError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl BootstrapError {
    /// Whether the caller's cancellation aborted the stage.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.source.downcast_ref::<Cancelled>().is_some()
    }
}

/// Marker source of a [`BootstrapError`] caused by cancellation.
#[derive(Debug, thiserror::Error)]
#[error("cancelled")]
pub struct Cancelled;

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// Constructors for the pluggable resources.
#[async_trait]
pub trait Backends: Send + Sync {
    /// Builds the cache families, not yet started.
    ///
    /// # Errors
    ///
    /// Invalid cache configuration.
    fn init_caches(&self, config: &CacheConfig) -> anyhow::Result<Arc<Caches>> {
        Ok(Arc::new(Caches::init(config)?))
    }

    async fn open_database(&self, config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Database>>;

    /// Opens storage under `root`, exclusively holding `root/lock_name`.
    async fn open_storage(
        &self,
        root: &Path,
        lock_name: &str,
        lock_timeout: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Arc<dyn BlobStorage>>;
}

/// The configured database backend and local filesystem storage.
///
/// Database stores are opened once per `DefaultBackends` and shared by
/// every context it bootstraps.
#[derive(Default)]
pub struct DefaultBackends {
    stores: SharedStores,
}

impl DefaultBackends {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backends for DefaultBackends {
    async fn open_database(&self, config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Database>> {
        self.stores.open(config).await
    }

    async fn open_storage(
        &self,
        root: &Path,
        lock_name: &str,
        lock_timeout: Duration,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Arc<dyn BlobStorage>> {
        let storage = LocalStorage::open(root, lock_name, lock_timeout, cancel).await?;
        Ok(Arc::new(storage))
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Resources acquired so far, released in reverse on failure.
#[derive(Default)]
struct Partial {
    caches: Option<Arc<Caches>>,
    db: Option<Arc<dyn Database>>,
    storage: Option<Arc<dyn BlobStorage>>,
    workers: Option<WorkerPool>,
}

impl Partial {
    async fn unwind(self) {
        release(
            self.workers.as_ref(),
            self.storage.as_deref(),
            self.db.as_deref(),
            self.caches.as_deref(),
        )
        .await;
    }
}

/// Stops whatever is present: workers, storage, database, caches.
pub(crate) async fn release(
    workers: Option<&WorkerPool>,
    storage: Option<&dyn BlobStorage>,
    db: Option<&dyn Database>,
    caches: Option<&Caches>,
) {
    if let Some(workers) = workers {
        workers.stop().await;
    }
    if let Some(storage) = storage {
        if let Err(e) = storage.close().await {
            warn!(error = %e, "storage close failed");
        }
    }
    if let Some(db) = db {
        if let Err(e) = db.close().await {
            warn!(error = %e, "database close failed");
        }
    }
    if let Some(caches) = caches {
        caches.stop();
    }
}

async fn run_stage<T, F>(stage: Stage, cancel: &CancellationToken, fut: F) -> Result<T, BootstrapError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = std::time::Instant::now();
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(anyhow::Error::new(Cancelled)),
        res = fut => res,
    };
    finish_stage(stage, started, result)
}

/// Runs a stage that watches `cancel` itself and is never dropped midway,
/// so anything it creates is owned by its result.
async fn run_owned_stage<T, F>(stage: Stage, cancel: &CancellationToken, fut: F) -> Result<T, BootstrapError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = std::time::Instant::now();
    let result = fut
        .await
        .map_err(|e| if cancel.is_cancelled() { e.context(Cancelled) } else { e });
    finish_stage(stage, started, result)
}

fn finish_stage<T>(
    stage: Stage,
    started: std::time::Instant,
    result: anyhow::Result<T>,
) -> Result<T, BootstrapError> {
    debug!(stage = %stage, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "bootstrap stage");
    result.map_err(|source| BootstrapError { stage, source })
}

async fn abort(partial: Partial, err: BootstrapError) -> BootstrapError {
    warn!(stage = %err.stage, error = %err.source, "bootstrap failed, unwinding");
    partial.unwind().await;
    err
}

/// Builds a [`ResourceContext`] for one invocation.
///
/// `cancel` aborts the stage in progress; completed stages are torn down
/// before the error is returned. The returned context owns a child of
/// `cancel`.
///
/// # Errors
///
/// [`BootstrapError`] naming the failed stage.
pub async fn bootstrap(
    config: Arc<ServerConfig>,
    backends: &dyn Backends,
    cancel: &CancellationToken,
) -> Result<ResourceContext, BootstrapError> {
    let invocation_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!("bootstrap", invocation = %invocation_id);
    build(invocation_id, config, backends, cancel)
        .instrument(span)
        .await
}

async fn build(
    invocation_id: String,
    config: Arc<ServerConfig>,
    backends: &dyn Backends,
    cancel: &CancellationToken,
) -> Result<ResourceContext, BootstrapError> {
    let mut partial = Partial::default();
    let context_cancel = cancel.child_token();

    let caches = match run_stage(Stage::CacheInit, cancel, async {
        let caches = backends.init_caches(&config.cache)?;
        caches.start();
        Ok(caches)
    })
    .await
    {
        Ok(caches) => caches,
        Err(e) => return Err(abort(partial, e).await),
    };
    partial.caches = Some(Arc::clone(&caches));

    let db = match run_stage(Stage::DbOpen, cancel, async {
        tokio::time::timeout(config.db_open_timeout, backends.open_database(&config.database))
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", config.db_open_timeout))?
    })
    .await
    {
        Ok(db) => db,
        Err(e) => return Err(abort(partial, e).await),
    };
    partial.db = Some(Arc::clone(&db));

    let (instance_account, instance) = match run_stage(Stage::DbOpen, cancel, async {
        let account = db.upsert_instance_account(&config.host).await?;
        let instance = db.upsert_instance(&config.host, &config.instance_title).await?;
        Ok((account, instance))
    })
    .await
    {
        Ok(records) => records,
        Err(e) => return Err(abort(partial, e).await),
    };

    let lock_name = match lock_file_name(config.lock_naming, &invocation_id) {
        Ok(name) => name,
        Err(e) => {
            let err = BootstrapError {
                stage: Stage::StorageOpen,
                source: e.into(),
            };
            return Err(abort(partial, err).await);
        }
    };
    let storage = match run_owned_stage(
        Stage::StorageOpen,
        cancel,
        backends.open_storage(&config.storage_root, &lock_name, config.lock_timeout, cancel),
    )
    .await
    {
        Ok(storage) => storage,
        Err(e) => return Err(abort(partial, e).await),
    };
    partial.storage = Some(Arc::clone(&storage));

    let workers = match run_stage(Stage::WorkerStart, cancel, async {
        Ok(WorkerPool::start(&config.lanes, &context_cancel)?)
    })
    .await
    {
        Ok(workers) => workers,
        Err(e) => return Err(abort(partial, e).await),
    };
    partial.workers = Some(workers);

    let registered = run_stage(Stage::SchedulerRegister, cancel, async {
        let Some(workers) = partial.workers.as_ref() else {
            anyhow::bail!("worker pool missing");
        };
        workers.scheduler().add_reserved(
            CACHE_SWEEP_TASK_ID,
            Start::Immediately,
            config.sweep_interval,
            sweep_callback(Arc::clone(&caches), config.sweep_threshold_pct),
        )?;
        Ok(())
    })
    .await;
    if let Err(e) = registered {
        return Err(abort(partial, e).await);
    }

    let Some(workers) = partial.workers.take() else {
        return Err(abort(
            partial,
            BootstrapError {
                stage: Stage::WorkerStart,
                source: anyhow::anyhow!("worker pool missing"),
            },
        )
        .await);
    };

    info!(
        host = %config.host,
        lock = %lock_name,
        "resource context ready"
    );
    Ok(ResourceContext::new(
        invocation_id,
        config,
        caches,
        db,
        storage,
        workers,
        instance_account,
        instance,
        context_cancel,
    ))
}

fn sweep_callback(caches: Arc<Caches>, threshold_pct: u8) -> TaskCallback {
    Arc::new(move |_cancel: CancellationToken, _due: Instant| {
        let caches = Arc::clone(&caches);
        async move {
            let report = caches.sweep(threshold_pct);
            if report.total() > 0 {
                debug!(evicted = report.total(), threshold_pct, "cache sweep");
            }
        }
        .boxed()
    })
}
