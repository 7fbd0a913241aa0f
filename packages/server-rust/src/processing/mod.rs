//! Business processing behind the operation entry points.
//!
//! Processors are stateless: every call receives the [`ResourceContext`] it
//! runs against, so one processor serves shared and per-invocation contexts
//! alike.

mod events;
mod media;
mod status;

pub use events::{client_handler, federation_handler};

use async_trait::async_trait;
use weft_core::{
    Account, Application, Attachment, AttachmentUpdateRequest, Envelope, Status, StatusCreateForm,
};

use crate::bootstrap::ResourceContext;
use crate::worker::{EventHandles, LaneHandlers};

/// Failure of a business operation, classified for the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait StatusProcessor: Send + Sync {
    /// Creates a status owned by `requester` and publishes it on the client lane.
    async fn create(
        &self,
        ctx: &ResourceContext,
        requester: &Account,
        application: Option<&Application>,
        form: &StatusCreateForm,
    ) -> Result<Status, ProcessingError>;
}

#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Stores the uploaded file and records an attachment owned by `account_id`.
    async fn create(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        envelope: Envelope,
    ) -> Result<Attachment, ProcessingError>;

    /// Applies the fields present in `request`.
    async fn update(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        media_id: &str,
        request: &AttachmentUpdateRequest,
    ) -> Result<Attachment, ProcessingError>;

    async fn get(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        media_id: &str,
    ) -> Result<Attachment, ProcessingError>;
}

/// Entry point the operation handler dispatches to.
pub trait Processor: Send + Sync {
    fn status(&self) -> &dyn StatusProcessor;

    fn media(&self) -> &dyn MediaProcessor;

    /// Handlers consuming the client and federation lanes of a context.
    fn lane_handlers(&self, events: &EventHandles) -> LaneHandlers;
}

/// Processor backed by the context's database, storage and caches.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessor;

impl Processor for LocalProcessor {
    fn status(&self) -> &dyn StatusProcessor {
        self
    }

    fn media(&self) -> &dyn MediaProcessor {
        self
    }

    fn lane_handlers(&self, events: &EventHandles) -> LaneHandlers {
        LaneHandlers {
            client: client_handler(events),
            federation: federation_handler(),
        }
    }
}
