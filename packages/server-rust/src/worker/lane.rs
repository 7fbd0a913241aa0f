//! Lane-tagged queue items and per-item dispatch errors.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::oneshot;

/// The two independent processing lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Side effects of local client API calls.
    Client,
    /// Activities exchanged with remote instances.
    Federation,
}

impl Lane {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Federation => "federation",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of asynchronous work.
///
/// The payload is opaque to the dispatcher; routing uses the producer key
/// when set and the origin actor otherwise. Items sharing that key are
/// processed in enqueue order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub lane: Lane,
    /// Account that produced the activity.
    pub origin_actor: String,
    /// Groups items that must stay in order regardless of origin actor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Activity type, e.g. `Create`.
    pub activity_type: String,
    /// Object type, e.g. `Note`.
    pub object_type: String,
    /// Id of the affected object, when it has one.
    pub object_ref: Option<String>,
    pub payload: serde_json::Value,
}

impl QueueItem {
    #[must_use]
    pub fn client(
        origin_actor: impl Into<String>,
        activity_type: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self::new(Lane::Client, origin_actor, activity_type, object_type)
    }

    #[must_use]
    pub fn federation(
        origin_actor: impl Into<String>,
        activity_type: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self::new(Lane::Federation, origin_actor, activity_type, object_type)
    }

    fn new(
        lane: Lane,
        origin_actor: impl Into<String>,
        activity_type: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            lane,
            origin_actor: origin_actor.into(),
            producer: None,
            activity_type: activity_type.into(),
            object_type: object_type.into(),
            object_ref: None,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = Some(producer.into());
        self
    }

    /// Key the dispatcher orders by.
    #[must_use]
    pub fn ordering_key(&self) -> &str {
        self.producer.as_deref().unwrap_or(&self.origin_actor)
    }

    #[must_use]
    pub fn with_object_ref(mut self, object_ref: impl Into<String>) -> Self {
        self.object_ref = Some(object_ref.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Failure of a single item. Never affects sibling items.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{got} item enqueued on the {expected} lane")]
    WrongLane { expected: Lane, got: Lane },
    #[error("{lane} lane is closed")]
    Closed { lane: Lane },
    #[error("{lane} lane stayed full for {waited_ms}ms")]
    Backpressure { lane: Lane, waited_ms: u64 },
    #[error("enqueue on the {lane} lane was cancelled")]
    Cancelled { lane: Lane },
    #[error("no processor wired to the {lane} lane")]
    NotWired { lane: Lane },
    #[error("{lane} lane processor panicked")]
    Panicked { lane: Lane },
    #[error("{lane} lane processing failed: {source}")]
    Processing {
        lane: Lane,
        #[source]
        source: anyhow::Error,
    },
}

/// Business-side handler for one lane.
pub type LaneHandler = Arc<dyn Fn(QueueItem) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Outcome reported back to a producer that asked for a receipt.
pub type Receipt = oneshot::Receiver<Result<(), DispatchError>>;

/// An item as it sits in a lane queue.
pub(crate) struct Queued {
    pub(crate) item: QueueItem,
    pub(crate) receipt: Option<oneshot::Sender<Result<(), DispatchError>>>,
}

/// Late-bound handler shared by a lane's workers.
///
/// Lanes start before the processor exists, so the handler is wired in
/// afterwards. Items that arrive first fail with [`DispatchError::NotWired`].
#[derive(Default)]
pub(crate) struct HandlerSlot {
    handler: RwLock<Option<LaneHandler>>,
}

impl HandlerSlot {
    pub(crate) fn set(&self, handler: LaneHandler) {
        *self.handler.write() = Some(handler);
    }

    pub(crate) fn get(&self) -> Option<LaneHandler> {
        self.handler.read().clone()
    }
}

/// Runs one item through the lane's handler on its own task, so a panic is
/// contained to that item.
pub(crate) async fn run_item(lane: Lane, slot: &HandlerSlot, item: QueueItem) -> Result<(), DispatchError> {
    let Some(handler) = slot.get() else {
        return Err(DispatchError::NotWired { lane });
    };
    match tokio::spawn(handler(item)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(DispatchError::Processing { lane, source }),
        Err(join) if join.is_panic() => Err(DispatchError::Panicked { lane }),
        Err(_) => Err(DispatchError::Cancelled { lane }),
    }
}
