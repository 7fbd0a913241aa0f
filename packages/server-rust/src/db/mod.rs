//! Database backends.
//!
//! Typed records are `rmp-serde` encoded and kept in named tables of a
//! [`KvStore`]; [`RecordDatabase`] layers the [`Database`] API on top.
//! [`SharedStores`] keeps one store per backend for the whole process and
//! hands every resource context its own [`RecordDatabase`] over it.

pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

#[cfg(feature = "redb")]
use std::collections::HashMap;
#[cfg(feature = "redb")]
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;
use weft_core::{Account, Attachment, Instance, Status};

pub use memory::MemoryKv;
#[cfg(feature = "redb")]
pub use redb_store::RedbKv;

use crate::service::config::DatabaseConfig;
use crate::traits::Database;

/// Tables a [`KvStore`] must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Accounts,
    Instances,
    Statuses,
    Attachments,
}

impl Table {
    pub const ALL: [Self; 4] = [Self::Accounts, Self::Instances, Self::Statuses, Self::Attachments];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Instances => "instances",
            Self::Statuses => "statuses",
            Self::Attachments => "attachments",
        }
    }
}

/// Blocking key-value backend. Called from `spawn_blocking`.
pub trait KvStore: Send + Sync + 'static {
    /// # Errors
    ///
    /// Backend read failures.
    fn get(&self, table: Table, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// # Errors
    ///
    /// Backend write failures.
    fn put(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<()>;

    /// Writes `value` only if `key` is absent; returns the stored bytes.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn put_if_absent(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// An attachment together with its owner and where its bytes live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAttachment {
    pub attachment: Attachment,
    pub account_id: String,
    pub storage_key: String,
    pub content_type: String,
}

/// Id under which the instance actor for `host` is stored.
#[must_use]
pub fn instance_account_id(host: &str) -> String {
    format!("instance-actor:{host}")
}

/// [`Database`] over any [`KvStore`].
///
/// `close` retires this handle only; the store itself lives as long as
/// any handle or [`SharedStores`] refers to it.
pub struct RecordDatabase<S> {
    store: Arc<S>,
    closed: AtomicBool,
}

impl<S: KvStore> RecordDatabase<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::shared(Arc::new(store))
    }

    /// A handle over a store other handles may also use.
    #[must_use]
    pub fn shared(store: Arc<S>) -> Self {
        Self {
            store,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("database is closed");
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> anyhow::Result<T> + Send + 'static,
    {
        self.ensure_open()?;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    async fn load<T: DeserializeOwned + Send + 'static>(
        &self,
        table: Table,
        key: &str,
    ) -> anyhow::Result<Option<T>> {
        let key = key.to_string();
        let bytes = self.blocking(move |s| s.get(table, &key)).await?;
        bytes
            .map(|b| rmp_serde::from_slice(&b).map_err(anyhow::Error::from))
            .transpose()
    }

    async fn store<T: Serialize>(&self, table: Table, key: &str, value: &T) -> anyhow::Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        let key = key.to_string();
        self.blocking(move |s| s.put(table, &key, &bytes)).await
    }

    async fn store_if_absent<T>(&self, table: Table, key: &str, value: &T) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let bytes = rmp_serde::to_vec_named(value)?;
        let key = key.to_string();
        let stored = self
            .blocking(move |s| s.put_if_absent(table, &key, &bytes))
            .await?;
        Ok(rmp_serde::from_slice(&stored)?)
    }
}

#[async_trait]
impl<S: KvStore> Database for RecordDatabase<S> {
    async fn upsert_instance_account(&self, host: &str) -> anyhow::Result<Account> {
        let id = instance_account_id(host);
        let candidate = Account::instance_actor(id.clone(), host, now_millis());
        self.store_if_absent(Table::Accounts, &id, &candidate).await
    }

    async fn upsert_instance(&self, host: &str, title: &str) -> anyhow::Result<Instance> {
        let candidate = Instance {
            id: uuid::Uuid::new_v4().to_string(),
            domain: host.to_string(),
            title: title.to_string(),
            created_at: now_millis(),
        };
        self.store_if_absent(Table::Instances, host, &candidate).await
    }

    async fn get_account(&self, id: &str) -> anyhow::Result<Option<Account>> {
        self.load(Table::Accounts, id).await
    }

    async fn put_account(&self, account: &Account) -> anyhow::Result<()> {
        self.store(Table::Accounts, &account.id, account).await
    }

    async fn get_status(&self, id: &str) -> anyhow::Result<Option<Status>> {
        self.load(Table::Statuses, id).await
    }

    async fn put_status(&self, status: &Status) -> anyhow::Result<()> {
        self.store(Table::Statuses, &status.id, status).await
    }

    async fn get_attachment(&self, id: &str) -> anyhow::Result<Option<StoredAttachment>> {
        self.load(Table::Attachments, id).await
    }

    async fn put_attachment(&self, attachment: &StoredAttachment) -> anyhow::Result<()> {
        self.store(Table::Attachments, &attachment.attachment.id, attachment)
            .await
    }

    async fn close(&self) -> anyhow::Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("database closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Process-wide stores
// ---------------------------------------------------------------------------

/// Backing stores shared by every context opened through this registry.
///
/// A `redb` file admits a single opener per process, so each path is opened
/// once and every later context gets a new handle over the same
/// [`RedbKv`]. The memory store is likewise one per registry.
#[derive(Default)]
pub struct SharedStores {
    memory: Arc<MemoryKv>,
    #[cfg(feature = "redb")]
    redb: tokio::sync::Mutex<HashMap<PathBuf, Arc<RedbKv>>>,
}

impl SharedStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh handle over the configured backend, opening it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened.
    pub async fn open(&self, config: &DatabaseConfig) -> anyhow::Result<Arc<dyn Database>> {
        match config {
            DatabaseConfig::Memory => Ok(Arc::new(RecordDatabase::shared(Arc::clone(&self.memory)))),
            #[cfg(feature = "redb")]
            DatabaseConfig::Redb { path } => {
                let mut opened = self.redb.lock().await;
                let kv = match opened.get(path) {
                    Some(kv) => Arc::clone(kv),
                    None => {
                        let target = path.clone();
                        let kv = Arc::new(tokio::task::spawn_blocking(move || RedbKv::open(&target)).await??);
                        info!(path = %path.display(), "redb store opened");
                        opened.insert(path.clone(), Arc::clone(&kv));
                        kv
                    }
                };
                Ok(Arc::new(RecordDatabase::shared(kv)))
            }
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
