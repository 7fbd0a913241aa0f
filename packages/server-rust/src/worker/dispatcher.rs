//! One lane of the dual-lane dispatcher: a set of sharded background workers
//! draining bounded queues through a late-bound handler.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::background::{BackgroundRunnable, BackgroundWorker};
use super::lane::{run_item, DispatchError, HandlerSlot, Lane, LaneHandler, QueueItem, Queued, Receipt};

// ---------------------------------------------------------------------------
// LaneRunnable
// ---------------------------------------------------------------------------

/// Drains one shard of a lane.
struct LaneRunnable {
    lane: Lane,
    shard: usize,
    handler: Arc<HandlerSlot>,
}

#[async_trait]
impl BackgroundRunnable for LaneRunnable {
    type Task = Queued;

    async fn run(&mut self, task: Queued) {
        let Queued { item, receipt } = task;
        let activity = format!("{}/{}", item.activity_type, item.object_type);
        let started = Instant::now();

        let result = run_item(self.lane, &self.handler, item).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "weft_lane_items_total",
            "lane" => self.lane.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("weft_lane_item_duration_seconds", "lane" => self.lane.as_str())
            .record(started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(lane = %self.lane, shard = self.shard, activity, error = %e, "lane item failed");
        }
        if let Some(tx) = receipt {
            let _ = tx.send(result);
        }
    }

    async fn shutdown(&mut self) {
        debug!(lane = %self.lane, shard = self.shard, "lane worker drained");
    }
}

// ---------------------------------------------------------------------------
// LaneDispatcher
// ---------------------------------------------------------------------------

/// Queues items for one lane and runs them on that lane's workers.
///
/// Items are sharded by origin actor so one producer's items stay in one
/// FIFO queue. A failing item is logged and reported through its receipt;
/// it never blocks the items behind it.
pub struct LaneDispatcher {
    lane: Lane,
    senders: Vec<mpsc::Sender<Queued>>,
    workers: Mutex<Vec<BackgroundWorker<LaneRunnable>>>,
    handler: Arc<HandlerSlot>,
    enqueue_timeout: Duration,
}

impl LaneDispatcher {
    /// Spawns `workers` shards, each with a queue of `capacity` items.
    ///
    /// Callers validate that both are non-zero.
    #[must_use]
    pub fn start(lane: Lane, workers: usize, capacity: usize, enqueue_timeout: Duration) -> Self {
        let handler = Arc::new(HandlerSlot::default());
        let workers: Vec<_> = (0..workers)
            .map(|shard| {
                BackgroundWorker::start(
                    LaneRunnable {
                        lane,
                        shard,
                        handler: Arc::clone(&handler),
                    },
                    capacity,
                    None,
                )
            })
            .collect();
        let senders = workers.iter().filter_map(BackgroundWorker::sender).collect();
        Self {
            lane,
            senders,
            workers: Mutex::new(workers),
            handler,
            enqueue_timeout,
        }
    }

    #[must_use]
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Installs the business handler for this lane.
    pub fn wire(&self, handler: LaneHandler) {
        self.handler.set(handler);
    }

    /// Items queued across all shards.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.senders
            .iter()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .sum()
    }

    fn shard_for(&self, key: &str) -> &mpsc::Sender<Queued> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() % self.senders.len() as u64) as usize;
        &self.senders[idx]
    }

    /// Queues `item`, waiting at most the enqueue timeout for space.
    ///
    /// # Errors
    ///
    /// [`DispatchError::WrongLane`] for an item tagged for the other lane,
    /// [`DispatchError::Closed`] after stop, [`DispatchError::Backpressure`]
    /// when the queue stays full, [`DispatchError::Cancelled`] when `cancel`
    /// fires while waiting.
    pub async fn enqueue(&self, item: QueueItem, cancel: &CancellationToken) -> Result<(), DispatchError> {
        self.push(Queued { item, receipt: None }, cancel).await
    }

    /// Like [`enqueue`](Self::enqueue), also returning a receipt that
    /// resolves with the item's processing outcome.
    ///
    /// # Errors
    ///
    /// See [`enqueue`](Self::enqueue).
    pub async fn enqueue_with_receipt(
        &self,
        item: QueueItem,
        cancel: &CancellationToken,
    ) -> Result<Receipt, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.push(
            Queued {
                item,
                receipt: Some(tx),
            },
            cancel,
        )
        .await?;
        Ok(rx)
    }

    async fn push(&self, queued: Queued, cancel: &CancellationToken) -> Result<(), DispatchError> {
        let lane = self.lane;
        if queued.item.lane != lane {
            return Err(DispatchError::WrongLane {
                expected: lane,
                got: queued.item.lane,
            });
        }
        if self.senders.is_empty() {
            return Err(DispatchError::Closed { lane });
        }
        let tx = self.shard_for(queued.item.ordering_key());

        let queued = match tx.try_send(queued) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Closed(_)) => return Err(DispatchError::Closed { lane }),
            Err(TrySendError::Full(queued)) => queued,
        };

        metrics::counter!("weft_lane_backpressure_total", "lane" => lane.as_str()).increment(1);
        let started = Instant::now();
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DispatchError::Cancelled { lane }),
            sent = tokio::time::timeout(self.enqueue_timeout, tx.send(queued)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(DispatchError::Closed { lane }),
                Err(_) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let waited_ms = started.elapsed().as_millis() as u64;
                    Err(DispatchError::Backpressure { lane, waited_ms })
                }
            },
        }
    }

    /// Processes `item` on the caller's task, bypassing the queue.
    ///
    /// # Errors
    ///
    /// [`DispatchError::WrongLane`], or whatever the handler reports.
    pub async fn process(&self, item: QueueItem) -> Result<(), DispatchError> {
        if item.lane != self.lane {
            return Err(DispatchError::WrongLane {
                expected: self.lane,
                got: item.lane,
            });
        }
        run_item(self.lane, &self.handler, item).await
    }

    /// Stops every shard after its queue drains. Idempotent.
    pub async fn stop(&self) {
        let mut workers = std::mem::take(&mut *self.workers.lock());
        for worker in &mut workers {
            worker.stop().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording_handler(log: Log, delay: Duration) -> LaneHandler {
        Arc::new(move |item: QueueItem| {
            let log = Arc::clone(&log);
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if item.activity_type == "Fail" {
                    anyhow::bail!("rejected {}", item.object_type);
                }
                log.lock().push(format!("{}:{}", item.origin_actor, item.object_type));
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn per_producer_fifo() {
        let log: Log = Arc::default();
        let dispatcher = LaneDispatcher::start(Lane::Client, 4, 64, Duration::from_secs(1));
        dispatcher.wire(recording_handler(log.clone(), Duration::ZERO));
        let cancel = CancellationToken::new();

        for object in ["A", "B", "C"] {
            dispatcher
                .enqueue(QueueItem::client("alice", "Create", object), &cancel)
                .await
                .unwrap();
        }
        dispatcher.stop().await;

        let seen: Vec<String> = log.lock().clone();
        assert_eq!(seen, vec!["alice:A", "alice:B", "alice:C"]);
    }

    #[tokio::test]
    async fn producer_key_orders_items_across_actors() {
        let log: Log = Arc::default();
        let dispatcher = LaneDispatcher::start(Lane::Client, 4, 64, Duration::from_secs(1));
        dispatcher.wire(recording_handler(log.clone(), Duration::from_millis(2)));
        let cancel = CancellationToken::new();

        let expected: Vec<String> = (0..12).map(|i| format!("actor{i}:N{i}")).collect();
        for i in 0..12 {
            let item = QueueItem::client(format!("actor{i}"), "Create", format!("N{i}"))
                .with_producer("import-job");
            assert_eq!(item.ordering_key(), "import-job");
            dispatcher.enqueue(item, &cancel).await.unwrap();
        }
        dispatcher.stop().await;

        assert_eq!(*log.lock(), expected);
    }

    #[tokio::test]
    async fn failing_item_does_not_block_later_items() {
        let log: Log = Arc::default();
        let dispatcher = LaneDispatcher::start(Lane::Client, 1, 8, Duration::from_secs(1));
        dispatcher.wire(recording_handler(log.clone(), Duration::ZERO));
        let cancel = CancellationToken::new();

        let bad = dispatcher
            .enqueue_with_receipt(QueueItem::client("bob", "Fail", "X"), &cancel)
            .await
            .unwrap();
        let good = dispatcher
            .enqueue_with_receipt(QueueItem::client("bob", "Create", "Y"), &cancel)
            .await
            .unwrap();

        assert!(matches!(bad.await.unwrap(), Err(DispatchError::Processing { .. })));
        assert!(good.await.unwrap().is_ok());
        assert_eq!(*log.lock(), vec!["bob:Y"]);
        dispatcher.stop().await;
    }

    #[tokio::test]
    async fn wrong_lane_is_rejected() {
        let dispatcher = LaneDispatcher::start(Lane::Federation, 1, 8, Duration::from_secs(1));
        let err = dispatcher
            .enqueue(QueueItem::client("a", "Create", "Note"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::WrongLane {
                expected: Lane::Federation,
                got: Lane::Client
            }
        ));
        dispatcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_times_out_with_backpressure() {
        let dispatcher = LaneDispatcher::start(Lane::Client, 1, 1, Duration::from_millis(200));
        dispatcher.wire(recording_handler(Arc::default(), Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        // First item is picked up by the worker, second fills the queue.
        dispatcher.enqueue(QueueItem::client("a", "Create", "1"), &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        dispatcher.enqueue(QueueItem::client("a", "Create", "2"), &cancel).await.unwrap();

        let err = dispatcher
            .enqueue(QueueItem::client("a", "Create", "3"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Backpressure { lane: Lane::Client, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_waiting_enqueue() {
        let dispatcher = LaneDispatcher::start(Lane::Client, 1, 1, Duration::from_secs(3600));
        dispatcher.wire(recording_handler(Arc::default(), Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        dispatcher.enqueue(QueueItem::client("a", "Create", "1"), &cancel).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        dispatcher.enqueue(QueueItem::client("a", "Create", "2"), &cancel).await.unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });
        let err = dispatcher
            .enqueue(QueueItem::client("a", "Create", "3"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn enqueue_after_stop_is_closed() {
        let dispatcher = LaneDispatcher::start(Lane::Client, 2, 8, Duration::from_secs(1));
        dispatcher.stop().await;
        dispatcher.stop().await;
        let err = dispatcher
            .enqueue(QueueItem::client("a", "Create", "Note"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Closed { .. }));
    }

    #[tokio::test]
    async fn process_runs_inline() {
        let log: Log = Arc::default();
        let dispatcher = LaneDispatcher::start(Lane::Federation, 1, 8, Duration::from_secs(1));
        dispatcher.wire(recording_handler(log.clone(), Duration::ZERO));
        dispatcher
            .process(QueueItem::federation("remote", "Create", "Note"))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["remote:Note"]);
        dispatcher.stop().await;
    }
}
