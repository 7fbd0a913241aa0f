//! Blob storage for uploaded media.
//!
//! - [`lock`]: exclusive lock files naming a storage root's holder
//! - [`local`]: filesystem-backed [`BlobStorage`](crate::traits::BlobStorage)

pub mod local;
pub mod lock;

pub use local::{LocalStorage, StorageError};
pub use lock::{lock_file_name, LockError, LockFile, MIN_LOCK_TOKEN_LEN};
