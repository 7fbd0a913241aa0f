//! Operation types flowing through the pipeline.

use weft_core::{
    Account, Application, Attachment, AttachmentUpdateRequest, Envelope, Status, StatusCreateForm,
};

use crate::bootstrap::BootstrapError;
use crate::processing::ProcessingError;

/// Operation names, as used in spans and metric labels.
pub mod operation_names {
    pub const CREATE_STATUS: &str = "create_status";
    pub const CREATE_MEDIA: &str = "create_media";
    pub const UPDATE_MEDIA: &str = "update_media";
    pub const GET_MEDIA: &str = "get_media";
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub name: &'static str,
    /// Account on whose behalf the operation runs.
    pub actor_id: String,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, name: &'static str, actor_id: impl Into<String>, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            name,
            actor_id: actor_id.into(),
            call_timeout_ms,
        }
    }
}

/// Which media operation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOp {
    Create,
    Update,
    Get,
}

impl MediaOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Create => operation_names::CREATE_MEDIA,
            Self::Update => operation_names::UPDATE_MEDIA,
            Self::Get => operation_names::GET_MEDIA,
        }
    }
}

/// Inputs of a media operation. Which fields are required depends on the
/// [`MediaOp`]: `Create` needs `envelope`, `Update` needs `media_id` and
/// `update`, `Get` needs `media_id`.
#[derive(Debug, Clone, Default)]
pub struct MediaPayload {
    pub envelope: Option<Envelope>,
    pub media_id: Option<String>,
    pub update: Option<AttachmentUpdateRequest>,
}

impl MediaPayload {
    #[must_use]
    pub fn create(envelope: Envelope) -> Self {
        Self {
            envelope: Some(envelope),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn update(media_id: impl Into<String>, update: AttachmentUpdateRequest) -> Self {
        Self {
            media_id: Some(media_id.into()),
            update: Some(update),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn get(media_id: impl Into<String>) -> Self {
        Self {
            media_id: Some(media_id.into()),
            ..Self::default()
        }
    }
}

/// Typed operations dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    CreateStatus {
        ctx: OperationContext,
        requester: Account,
        application: Option<Application>,
        form: StatusCreateForm,
    },
    Media {
        ctx: OperationContext,
        op: MediaOp,
        payload: MediaPayload,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::CreateStatus { ctx, .. } | Self::Media { ctx, .. } => ctx,
        }
    }
}

/// Successful response from the operation handler.
#[derive(Debug)]
pub enum OperationResponse {
    Status(Box<Status>),
    Attachment(Box<Attachment>),
}

/// Errors returned by the entry points.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("unexpected response for {operation}")]
    UnexpectedResponse { operation: &'static str },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ProcessingError> for OperationError {
    fn from(e: ProcessingError) -> Self {
        match e {
            ProcessingError::BadRequest(msg) => Self::BadRequest(msg),
            ProcessingError::NotFound(msg) => Self::NotFound(msg),
            ProcessingError::Unprocessable(msg) => Self::Unprocessable(msg),
            ProcessingError::Internal(e) => Self::Internal(e),
        }
    }
}
