use async_trait::async_trait;
use bytes::Bytes;
use weft_core::{Account, Instance, Status};

use crate::db::StoredAttachment;

/// Persistent store for accounts, statuses, attachments and the instance
/// record. Implementations: `redb`, memory (tests, ephemeral runs).
///
/// Every method fails once [`close`](Self::close) has run.
#[async_trait]
pub trait Database: Send + Sync {
    /// Creates the instance actor for `host` if missing; returns the stored one.
    async fn upsert_instance_account(&self, host: &str) -> anyhow::Result<Account>;

    /// Creates the instance record for `host` if missing; returns the stored one.
    async fn upsert_instance(&self, host: &str, title: &str) -> anyhow::Result<Instance>;

    async fn get_account(&self, id: &str) -> anyhow::Result<Option<Account>>;

    async fn put_account(&self, account: &Account) -> anyhow::Result<()>;

    async fn get_status(&self, id: &str) -> anyhow::Result<Option<Status>>;

    async fn put_status(&self, status: &Status) -> anyhow::Result<()>;

    async fn get_attachment(&self, id: &str) -> anyhow::Result<Option<StoredAttachment>>;

    async fn put_attachment(&self, attachment: &StoredAttachment) -> anyhow::Result<()>;

    /// Flush and release the backend. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Blob storage for uploaded media.
///
/// Keys are relative `/`-separated paths. Every method fails once
/// [`close`](Self::close) has run.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Release the backend, including its lock. Idempotent.
    async fn close(&self) -> anyhow::Result<()>;
}
