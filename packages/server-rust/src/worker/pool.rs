//! The worker pool: client lane, federation lane, and the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::dispatcher::LaneDispatcher;
use super::lane::{DispatchError, Lane, LaneHandler, QueueItem};
use super::scheduler::Scheduler;
use crate::service::config::LaneConfig;

/// Errors from starting the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{lane} lane configured with zero workers")]
    ZeroWorkers { lane: Lane },
    #[error("lane queue capacity must be non-zero")]
    ZeroCapacity,
}

/// A function reference that submits or processes one item.
pub type LaneFn = Arc<dyn Fn(QueueItem) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;

/// The four entry points business code uses to publish work.
///
/// `enqueue_*` queue the item for the lane's workers; `process_*` run it on
/// the caller's task.
#[derive(Clone)]
pub struct EventHandles {
    pub enqueue_client: LaneFn,
    pub enqueue_federation: LaneFn,
    pub process_client: LaneFn,
    pub process_federation: LaneFn,
}

/// Business handlers for both lanes.
#[derive(Clone)]
pub struct LaneHandlers {
    pub client: LaneHandler,
    pub federation: LaneHandler,
}

/// Queue depths, as exposed on the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneDepths {
    pub client: usize,
    pub federation: usize,
}

/// Owns both lanes and the scheduler.
pub struct WorkerPool {
    client: Arc<LaneDispatcher>,
    federation: Arc<LaneDispatcher>,
    scheduler: Scheduler,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Starts both lanes and an empty scheduler whose tasks end when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] if a lane has no workers or no queue capacity.
    pub fn start(config: &LaneConfig, cancel: &CancellationToken) -> Result<Self, PoolError> {
        if config.queue_capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        for (lane, workers) in [
            (Lane::Client, config.client_workers),
            (Lane::Federation, config.federation_workers),
        ] {
            if workers == 0 {
                return Err(PoolError::ZeroWorkers { lane });
            }
        }

        let pool = Self {
            client: Arc::new(LaneDispatcher::start(
                Lane::Client,
                config.client_workers,
                config.queue_capacity,
                config.enqueue_timeout,
            )),
            federation: Arc::new(LaneDispatcher::start(
                Lane::Federation,
                config.federation_workers,
                config.queue_capacity,
                config.enqueue_timeout,
            )),
            scheduler: Scheduler::with_parent(cancel),
            stopped: AtomicBool::new(false),
        };
        info!(
            client_workers = config.client_workers,
            federation_workers = config.federation_workers,
            queue_capacity = config.queue_capacity,
            "worker pool started"
        );
        Ok(pool)
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn lane(&self, lane: Lane) -> &Arc<LaneDispatcher> {
        match lane {
            Lane::Client => &self.client,
            Lane::Federation => &self.federation,
        }
    }

    /// Installs the processor's handlers on both lanes.
    pub fn wire(&self, handlers: LaneHandlers) {
        self.client.wire(handlers.client);
        self.federation.wire(handlers.federation);
    }

    /// Builds the four function references. Enqueues give up when `cancel`
    /// fires.
    #[must_use]
    pub fn event_handles(&self, cancel: &CancellationToken) -> EventHandles {
        EventHandles {
            enqueue_client: enqueue_fn(&self.client, cancel),
            enqueue_federation: enqueue_fn(&self.federation, cancel),
            process_client: process_fn(&self.client),
            process_federation: process_fn(&self.federation),
        }
    }

    #[must_use]
    pub fn depths(&self) -> LaneDepths {
        LaneDepths {
            client: self.client.depth(),
            federation: self.federation.depth(),
        }
    }

    /// Stops the scheduler, then drains the client lane (whose items may
    /// still publish to the federation lane), then the federation lane.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.stop().await;
        self.client.stop().await;
        self.federation.stop().await;
        info!("worker pool stopped");
    }
}

fn enqueue_fn(dispatcher: &Arc<LaneDispatcher>, cancel: &CancellationToken) -> LaneFn {
    let dispatcher = Arc::clone(dispatcher);
    let cancel = cancel.clone();
    Arc::new(move |item| {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.enqueue(item, &cancel).await }.boxed()
    })
}

fn process_fn(dispatcher: &Arc<LaneDispatcher>) -> LaneFn {
    let dispatcher = Arc::clone(dispatcher);
    Arc::new(move |item| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.process(item).await }.boxed()
    })
}
