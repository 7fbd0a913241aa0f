//! Status and media endpoints over the `ServiceHost` entry points.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use weft_core::{
    Account, Application, Attachment, AttachmentUpdateRequest, Envelope, Status, StatusCreateForm,
};

use super::{ApiError, AppState};
use crate::service::{MediaOp, MediaPayload};

/// Header naming the account a media request acts for.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Body of `POST /api/v1/statuses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateStatusRequest {
    pub requester: Account,
    #[serde(default)]
    pub application: Option<Application>,
    pub form: StatusCreateForm,
}

fn actor_id(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| ApiError::bad_request(format!("missing {ACTOR_HEADER} header")))?;
    let actor = value
        .to_str()
        .map_err(|_| ApiError::bad_request(format!("{ACTOR_HEADER} is not valid ASCII")))?
        .trim();
    if actor.is_empty() {
        return Err(ApiError::bad_request(format!("empty {ACTOR_HEADER} header")));
    }
    Ok(actor.to_string())
}

/// `POST /api/v1/statuses`
pub async fn create_status_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateStatusRequest>,
) -> Result<Json<Status>, ApiError> {
    let status = state
        .host
        .create_status(request.requester, request.application, request.form)
        .await?;
    Ok(Json(status))
}

async fn create_media(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<Attachment, ApiError> {
    let actor = actor_id(headers)?;
    let envelope = Envelope::decode(body)
        .map_err(|e| ApiError::bad_request(format!("invalid envelope: {e}")))?;
    Ok(state
        .host
        .do_media_operation(MediaOp::Create, &actor, MediaPayload::create(envelope))
        .await?)
}

/// `POST /api/v1/media` with an encoded envelope as the body.
pub async fn create_media_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Attachment>, ApiError> {
    Ok(Json(create_media(&state, &headers, &body).await?))
}

/// `POST /api/v2/media`: as v1, but `url` stays null until the file has
/// been processed.
pub async fn create_media_v2_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Attachment>, ApiError> {
    let mut attachment = create_media(&state, &headers, &body).await?;
    attachment.url = None;
    Ok(Json(attachment))
}

/// `PUT /api/v1/media/{id}`
pub async fn update_media_handler(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    headers: HeaderMap,
    Json(update): Json<AttachmentUpdateRequest>,
) -> Result<Json<Attachment>, ApiError> {
    let actor = actor_id(&headers)?;
    let attachment = state
        .host
        .do_media_operation(MediaOp::Update, &actor, MediaPayload::update(media_id, update))
        .await?;
    Ok(Json(attachment))
}

/// `GET /api/v1/media/{id}`
pub async fn get_media_handler(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Attachment>, ApiError> {
    let actor = actor_id(&headers)?;
    let attachment = state
        .host
        .do_media_operation(MediaOp::Get, &actor, MediaPayload::get(media_id))
        .await?;
    Ok(Json(attachment))
}
