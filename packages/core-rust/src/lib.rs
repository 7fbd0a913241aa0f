//! `weft` core: attachment envelope and language wire codecs, API models.

pub mod envelope;
pub mod focus;
pub mod header;
pub mod language;
pub mod model;
pub mod wire;

pub use envelope::{Envelope, FileRecord};
pub use focus::{parse_focus, FocusError};
pub use header::MimeHeader;
pub use language::{Language, LanguageError};
pub use model::{
    Account, Application, Attachment, AttachmentUpdateRequest, Instance, MediaDimensions,
    MediaFocus, MediaMeta, MediaType, Status, StatusCreateForm, Visibility,
};
pub use wire::CodecError;
