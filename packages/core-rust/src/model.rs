//! API-facing models exchanged by the operation entry points.
//!
//! Timestamps are wall-clock milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Accounts, applications, instance
// ---------------------------------------------------------------------------

/// A local or remote account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    /// `None` for local accounts.
    pub domain: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub created_at: i64,
}

impl Account {
    /// The instance actor: username equals the instance host.
    #[must_use]
    pub fn instance_actor(id: impl Into<String>, host: &str, now: i64) -> Self {
        Self {
            id: id.into(),
            username: host.to_string(),
            domain: None,
            display_name: host.to_string(),
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.domain.is_none()
    }
}

/// The client application a request was made through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub website: Option<String>,
}

/// The record describing this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub domain: String,
    pub title: String,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Unlisted,
    Private,
    Direct,
}

/// Parameters for creating a status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCreateForm {
    /// Text content of the status.
    pub status: String,
    /// Attachments previously uploaded by the requester.
    pub media_ids: Vec<String>,
    pub sensitive: bool,
    pub spoiler_text: String,
    /// Defaults to [`Visibility::Public`].
    pub visibility: Option<Visibility>,
    /// BCP47 language tag.
    pub language: Option<String>,
    pub in_reply_to_id: Option<String>,
}

/// A created status as returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub id: String,
    pub created_at: i64,
    pub account_id: String,
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub visibility: Visibility,
    pub language: Option<String>,
    pub in_reply_to_id: Option<String>,
    pub media_attachments: Vec<Attachment>,
    pub uri: String,
    pub application: Option<Application>,
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Coarse media category derived from the uploaded file's content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Unknown,
    Image,
    Gifv,
    Video,
    Audio,
}

impl MediaType {
    /// Maps a `Content-Type` value to a media type. GIFs are `gifv`.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.split_once('/') {
            Some(("image", "gif")) => Self::Gifv,
            Some(("image", _)) => Self::Image,
            Some(("video", _)) => Self::Video,
            Some(("audio", _)) => Self::Audio,
            _ => Self::Unknown,
        }
    }
}

/// A media attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: Option<String>,
    pub text_url: Option<String>,
    pub preview_url: Option<String>,
    pub remote_url: Option<String>,
    pub preview_remote_url: Option<String>,
    pub meta: Option<MediaMeta>,
    pub description: Option<String>,
    pub blurhash: Option<String>,
    /// Parent status is sensitive. Internal only.
    #[serde(skip)]
    pub sensitive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMeta {
    pub original: MediaDimensions,
    #[serde(default)]
    pub small: MediaDimensions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<MediaFocus>,
}

/// Focal point, both axes in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFocus {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaDimensions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect: Option<f32>,
    /// Size of the stored file in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// Partial update of an attachment. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentUpdateRequest {
    pub description: Option<String>,
    pub focus: Option<String>,
}
