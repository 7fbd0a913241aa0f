use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weft_core::{Account, Instance};

use super::release;
use crate::cache::Caches;
use crate::service::config::ServerConfig;
use crate::traits::{BlobStorage, Database};
use crate::worker::{EventHandles, LaneHandlers, WorkerPool};

/// Everything an operation runs against.
///
/// Built by [`bootstrap`](super::bootstrap); released by
/// [`teardown`](Self::teardown) in reverse order of construction. After
/// teardown every component refuses work.
pub struct ResourceContext {
    invocation_id: String,
    config: Arc<ServerConfig>,
    caches: Arc<Caches>,
    db: Arc<dyn Database>,
    storage: Arc<dyn BlobStorage>,
    workers: WorkerPool,
    events: EventHandles,
    instance_account: Account,
    instance: Instance,
    cancel: CancellationToken,
    torn_down: AtomicBool,
}

impl ResourceContext {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        invocation_id: String,
        config: Arc<ServerConfig>,
        caches: Arc<Caches>,
        db: Arc<dyn Database>,
        storage: Arc<dyn BlobStorage>,
        workers: WorkerPool,
        instance_account: Account,
        instance: Instance,
        cancel: CancellationToken,
    ) -> Self {
        let events = workers.event_handles(&cancel);
        Self {
            invocation_id,
            config,
            caches,
            db,
            storage,
            workers,
            events,
            instance_account,
            instance,
            cancel,
            torn_down: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    #[must_use]
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn BlobStorage> {
        &self.storage
    }

    #[must_use]
    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Enqueue/process references for both lanes.
    #[must_use]
    pub fn events(&self) -> &EventHandles {
        &self.events
    }

    #[must_use]
    pub fn instance_account(&self) -> &Account {
        &self.instance_account
    }

    #[must_use]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Cancelled on teardown; aborts enqueues still waiting for space.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Installs the lane handlers of the processor serving this context.
    pub fn wire(&self, handlers: LaneHandlers) {
        self.workers.wire(handlers);
    }

    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Stops the worker pool (and its scheduler), releases storage, closes
    /// the database, then stops the caches.
    ///
    /// Returns `true` for the call that performed the teardown; later calls
    /// are no-ops returning `false`.
    pub async fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.cancel.cancel();
        release(
            Some(&self.workers),
            Some(self.storage.as_ref()),
            Some(self.db.as_ref()),
            Some(&self.caches),
        )
        .await;
        metrics::counter!("weft_context_teardowns_total").increment(1);
        info!(invocation = %self.invocation_id, "resource context torn down");
        true
    }
}

impl Drop for ResourceContext {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::Acquire) {
            warn!(invocation = %self.invocation_id, "resource context dropped without teardown");
            self.cancel.cancel();
            self.caches.stop();
        }
    }
}
