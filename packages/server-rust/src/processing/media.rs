use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use weft_core::{
    parse_focus, Attachment, AttachmentUpdateRequest, Envelope, MediaDimensions, MediaMeta,
    MediaType,
};

use super::{LocalProcessor, MediaProcessor, ProcessingError};
use crate::bootstrap::ResourceContext;
use crate::db::StoredAttachment;
use crate::service::MediaLimits;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn check_description(limits: &MediaLimits, description: &str) -> Result<(), ProcessingError> {
    let chars = description.chars().count();
    if chars < limits.description_min_chars || chars > limits.description_max_chars {
        return Err(ProcessingError::BadRequest(format!(
            "image description length must be between {} and {} characters (inclusive), \
             but provided image description was {chars} chars",
            limits.description_min_chars, limits.description_max_chars
        )));
    }
    Ok(())
}

fn check_size(limits: &MediaLimits, media_type: MediaType, size: u64) -> Result<(), ProcessingError> {
    let limit = match media_type {
        MediaType::Video | MediaType::Audio => limits.video_max_bytes,
        _ => limits.image_max_bytes,
    };
    if size > limit {
        return Err(ProcessingError::BadRequest(format!(
            "file size limit exceeded: limit is {limit} bytes but attachment was {size} bytes"
        )));
    }
    Ok(())
}

fn focus(input: &str) -> Result<weft_core::MediaFocus, ProcessingError> {
    parse_focus(input).map_err(|e| {
        ProcessingError::BadRequest(format!("could not parse focus value {input:?}: {e}"))
    })
}

/// `.png` from `cat.png`; empty when the name has no usable extension.
fn extension(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Looks up `media_id`, hiding attachments owned by someone else.
async fn owned(
    ctx: &ResourceContext,
    account_id: &str,
    media_id: &str,
) -> Result<StoredAttachment, ProcessingError> {
    ctx.db()
        .get_attachment(media_id)
        .await?
        .filter(|stored| stored.account_id == account_id)
        .ok_or_else(|| ProcessingError::NotFound(format!("attachment {media_id}")))
}

#[async_trait]
impl MediaProcessor for LocalProcessor {
    async fn create(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        envelope: Envelope,
    ) -> Result<Attachment, ProcessingError> {
        let Some(file) = envelope.file else {
            return Err(ProcessingError::BadRequest("no file provided".to_string()));
        };
        let limits = &ctx.config().media;
        let focus = focus(&envelope.focus)?;
        check_description(limits, &envelope.description)?;

        let content_type = file
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let media_type = MediaType::from_content_type(&content_type);
        if media_type == MediaType::Unknown {
            return Err(ProcessingError::Unprocessable(format!(
                "could not process uploaded file with content type {content_type}"
            )));
        }
        if file.content.is_empty() {
            return Err(ProcessingError::Unprocessable(
                "uploaded file is empty".to_string(),
            ));
        }
        check_size(limits, media_type, file.content.len() as u64)?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let ext = extension(&file.filename);
        let storage_key = format!("{account_id}/attachment/original/{id}{ext}");
        let preview_key = format!("{account_id}/attachment/small/{id}{ext}");
        let host = &ctx.config().host;
        let file_size = file.content.len() as u64;

        ctx.storage()
            .put(&storage_key, Bytes::from(file.content))
            .await?;

        let attachment = Attachment {
            id: id.clone(),
            media_type,
            url: Some(format!("https://{host}/fileserver/{storage_key}")),
            text_url: Some(format!("https://{host}/fileserver/{storage_key}")),
            preview_url: Some(format!("https://{host}/fileserver/{preview_key}")),
            remote_url: None,
            preview_remote_url: None,
            meta: Some(MediaMeta {
                original: MediaDimensions {
                    file_size: Some(file_size),
                    ..MediaDimensions::default()
                },
                small: MediaDimensions::default(),
                focus: Some(focus),
            }),
            description: Some(envelope.description).filter(|d| !d.is_empty()),
            blurhash: None,
            sensitive: false,
        };
        let stored = StoredAttachment {
            attachment: attachment.clone(),
            account_id: account_id.to_string(),
            storage_key,
            content_type,
        };
        ctx.db().put_attachment(&stored).await?;
        ctx.caches().attachments.put(id.clone(), attachment.clone());

        debug!(attachment = %id, account = account_id, size = file_size, "attachment created");
        Ok(attachment)
    }

    async fn update(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        media_id: &str,
        request: &AttachmentUpdateRequest,
    ) -> Result<Attachment, ProcessingError> {
        let mut stored = owned(ctx, account_id, media_id).await?;

        if let Some(description) = &request.description {
            check_description(&ctx.config().media, description)?;
            stored.attachment.description = Some(description.clone()).filter(|d| !d.is_empty());
        }
        if let Some(input) = &request.focus {
            let focus = focus(input)?;
            stored
                .attachment
                .meta
                .get_or_insert_with(MediaMeta::default)
                .focus = Some(focus);
        }

        ctx.db().put_attachment(&stored).await?;
        ctx.caches()
            .attachments
            .put(media_id.to_string(), stored.attachment.clone());
        Ok(stored.attachment)
    }

    async fn get(
        &self,
        ctx: &ResourceContext,
        account_id: &str,
        media_id: &str,
    ) -> Result<Attachment, ProcessingError> {
        let stored = owned(ctx, account_id, media_id).await?;
        ctx.caches()
            .attachments
            .put(media_id.to_string(), stored.attachment.clone());
        Ok(stored.attachment)
    }
}

#[cfg(test)]
mod tests {
    use weft_core::{FileRecord, MediaFocus, MimeHeader};

    use super::*;
    use crate::processing::testing::{context, context_with};
    use crate::service::ServerConfig;

    fn upload(content_type: &str, focus: &str) -> Envelope {
        let mut header = MimeHeader::new();
        header.set("Content-Type", content_type);
        Envelope {
            file: Some(FileRecord::new("Cat.PNG", header, b"\x89PNG....".to_vec())),
            description: "a cat".to_string(),
            focus: focus.to_string(),
        }
    }

    #[tokio::test]
    async fn create_stores_file_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        let attachment = LocalProcessor
            .create(&ctx, "alice-id", upload("image/png", "-0.5,0.25"))
            .await
            .unwrap();

        assert_eq!(attachment.media_type, MediaType::Image);
        assert_eq!(attachment.description.as_deref(), Some("a cat"));
        let meta = attachment.meta.clone().unwrap();
        assert_eq!(meta.focus, Some(MediaFocus { x: -0.5, y: 0.25 }));
        assert_eq!(meta.original.file_size, Some(8));
        assert!(attachment.url.as_deref().unwrap().ends_with(".png"));

        let stored = ctx.db().get_attachment(&attachment.id).await.unwrap().unwrap();
        assert_eq!(stored.account_id, "alice-id");
        assert_eq!(stored.content_type, "image/png");
        let bytes = ctx.storage().get(&stored.storage_key).await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"\x89PNG....");
        assert!(ctx.caches().attachments.get(&attachment.id).is_some());
        ctx.teardown().await;
    }

    #[tokio::test]
    async fn create_validates_input() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;

        let no_file = Envelope::default();
        let err = LocalProcessor.create(&ctx, "a", no_file).await.unwrap_err();
        assert!(matches!(err, ProcessingError::BadRequest(_)));

        let err = LocalProcessor
            .create(&ctx, "a", upload("image/png", "2,0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::BadRequest(_)));

        let err = LocalProcessor
            .create(&ctx, "a", upload("application/pdf", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Unprocessable(_)));

        let gif = LocalProcessor
            .create(&ctx, "a", upload("image/gif", ""))
            .await
            .unwrap();
        assert_eq!(gif.media_type, MediaType::Gifv);
        ctx.teardown().await;
    }

    #[tokio::test]
    async fn create_enforces_media_limits() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with(ServerConfig {
            host: "weft.example".to_string(),
            storage_root: dir.path().to_path_buf(),
            media: MediaLimits {
                image_max_bytes: 4,
                video_max_bytes: 16,
                description_min_chars: 3,
                description_max_chars: 10,
            },
            ..ServerConfig::default()
        })
        .await;

        // Eight bytes: over the image limit, under the video limit.
        let err = LocalProcessor
            .create(&ctx, "a", upload("image/png", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::BadRequest(ref m) if m.contains("file size limit exceeded")));
        LocalProcessor
            .create(&ctx, "a", upload("video/mp4", ""))
            .await
            .unwrap();

        let mut short = upload("video/mp4", "");
        short.description = "ok".to_string();
        let err = LocalProcessor.create(&ctx, "a", short).await.unwrap_err();
        assert!(matches!(err, ProcessingError::BadRequest(ref m) if m.contains("between 3 and 10")));

        let mut long = upload("video/mp4", "");
        long.description = "x".repeat(11);
        let err = LocalProcessor.create(&ctx, "a", long).await.unwrap_err();
        assert!(matches!(err, ProcessingError::BadRequest(_)));
        ctx.teardown().await;
    }

    #[tokio::test]
    async fn update_applies_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let created = LocalProcessor
            .create(&ctx, "alice-id", upload("video/mp4", "0.1,0.1"))
            .await
            .unwrap();

        let only_description = AttachmentUpdateRequest {
            description: Some("a cat video".to_string()),
            focus: None,
        };
        let updated = LocalProcessor
            .update(&ctx, "alice-id", &created.id, &only_description)
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("a cat video"));
        assert_eq!(updated.meta.as_ref().unwrap().focus, Some(MediaFocus { x: 0.1, y: 0.1 }));

        let only_focus = AttachmentUpdateRequest {
            description: None,
            focus: Some("1,-1".to_string()),
        };
        let updated = LocalProcessor
            .update(&ctx, "alice-id", &created.id, &only_focus)
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("a cat video"));
        assert_eq!(updated.meta.unwrap().focus, Some(MediaFocus { x: 1.0, y: -1.0 }));

        let fetched = LocalProcessor.get(&ctx, "alice-id", &created.id).await.unwrap();
        assert_eq!(fetched.description.as_deref(), Some("a cat video"));
        ctx.teardown().await;
    }

    #[tokio::test]
    async fn other_accounts_cannot_see_or_edit() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let created = LocalProcessor
            .create(&ctx, "alice-id", upload("audio/ogg", ""))
            .await
            .unwrap();

        let err = LocalProcessor.get(&ctx, "bob-id", &created.id).await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));
        let err = LocalProcessor
            .update(&ctx, "bob-id", &created.id, &AttachmentUpdateRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));
        let err = LocalProcessor.get(&ctx, "alice-id", "missing").await.unwrap_err();
        assert!(matches!(err, ProcessingError::NotFound(_)));
        ctx.teardown().await;
    }

    #[test]
    fn extension_is_sanitized() {
        assert_eq!(extension("Cat.PNG"), ".png");
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("weird.p/g"), "");
    }
}
