use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};
use weft_core::{Account, Application, Language, Status, StatusCreateForm};

use super::{LocalProcessor, ProcessingError, StatusProcessor};
use crate::bootstrap::ResourceContext;
use crate::db::now_millis;
use crate::worker::QueueItem;

const MAX_STATUS_CHARS: usize = 5_000;
const MAX_MEDIA_ATTACHMENTS: usize = 6;

fn validate(form: &StatusCreateForm) -> Result<(), ProcessingError> {
    if form.status.trim().is_empty() && form.media_ids.is_empty() {
        return Err(ProcessingError::BadRequest(
            "status must contain text or media".to_string(),
        ));
    }
    let chars = form.status.chars().count();
    if chars > MAX_STATUS_CHARS {
        return Err(ProcessingError::BadRequest(format!(
            "status is {chars} characters, the limit is {MAX_STATUS_CHARS}"
        )));
    }
    if form.media_ids.len() > MAX_MEDIA_ATTACHMENTS {
        return Err(ProcessingError::BadRequest(format!(
            "at most {MAX_MEDIA_ATTACHMENTS} attachments per status"
        )));
    }
    Ok(())
}

#[async_trait]
impl StatusProcessor for LocalProcessor {
    async fn create(
        &self,
        ctx: &ResourceContext,
        requester: &Account,
        application: Option<&Application>,
        form: &StatusCreateForm,
    ) -> Result<Status, ProcessingError> {
        validate(form)?;

        let language = form
            .language
            .as_deref()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Language::parse(l).map(|lang| lang.tag_str))
            .transpose()
            .map_err(|e| ProcessingError::BadRequest(e.to_string()))?;

        if let Some(parent) = &form.in_reply_to_id {
            if ctx.db().get_status(parent).await?.is_none() {
                return Err(ProcessingError::BadRequest(format!(
                    "status {parent} to reply to does not exist"
                )));
            }
        }

        let mut media_attachments = Vec::with_capacity(form.media_ids.len());
        for media_id in &form.media_ids {
            let stored = ctx
                .db()
                .get_attachment(media_id)
                .await?
                .filter(|s| s.account_id == requester.id)
                .ok_or_else(|| {
                    ProcessingError::BadRequest(format!("attachment {media_id} is not usable"))
                })?;
            let mut attachment = stored.attachment;
            attachment.sensitive = form.sensitive;
            media_attachments.push(attachment);
        }

        let id = uuid::Uuid::new_v4().simple().to_string();
        let status = Status {
            uri: format!(
                "https://{}/users/{}/statuses/{id}",
                ctx.config().host,
                requester.username
            ),
            id,
            created_at: now_millis(),
            account_id: requester.id.clone(),
            content: form.status.clone(),
            spoiler_text: form.spoiler_text.clone(),
            sensitive: form.sensitive,
            visibility: form.visibility.unwrap_or_default(),
            language,
            in_reply_to_id: form.in_reply_to_id.clone(),
            media_attachments,
            application: application.cloned(),
        };

        ctx.db().put_status(&status).await?;
        ctx.caches().statuses.put(status.id.clone(), status.clone());
        ctx.caches().accounts.put(requester.id.clone(), requester.clone());

        let item = QueueItem::client(&requester.id, "Create", "Note")
            .with_object_ref(&status.id)
            .with_payload(json!({
                "uri": status.uri,
                "visibility": status.visibility,
            }));
        if let Err(e) = (ctx.events().enqueue_client)(item).await {
            warn!(status = %status.id, error = %e, "status created but its event was not queued");
        }

        debug!(status = %status.id, account = %requester.id, "status created");
        Ok(status)
    }
}
