//! Server-level configuration: instance identity, resource backends, lane
//! sizing and operation limits.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::EvictionKind;

/// How the lock file guarding the storage root is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockNaming {
    /// `<invocation id>.lock`, unique per context.
    InvocationId,
    /// A short random alphanumeric token, as older deployments used.
    RandomToken { len: usize },
}

/// Where a `ServiceHost` gets its `ResourceContext` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// One context is bootstrapped at startup and shared by every request.
    Shared,
    /// Every operation bootstraps and tears down its own context.
    PerInvocation,
}

/// Database backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Memory,
    #[cfg(feature = "redb")]
    Redb { path: PathBuf },
}

/// Capacities of the typed cache families.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub account_capacity: usize,
    pub status_capacity: usize,
    pub attachment_capacity: usize,
    pub instance_capacity: usize,
    pub policy: EvictionKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            account_capacity: 10_000,
            status_capacity: 50_000,
            attachment_capacity: 20_000,
            instance_capacity: 1_000,
            policy: EvictionKind::Lru,
        }
    }
}

/// Sizing for the client and federation lanes.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    pub client_workers: usize,
    pub federation_workers: usize,
    /// Bounded queue capacity of each lane worker.
    pub queue_capacity: usize,
    /// Longest an enqueue waits for queue space before failing.
    pub enqueue_timeout: Duration,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            client_workers: 2,
            federation_workers: 2,
            queue_capacity: 256,
            enqueue_timeout: Duration::from_secs(5),
        }
    }
}

/// Upload limits applied to media attachments.
#[derive(Debug, Clone)]
pub struct MediaLimits {
    /// Largest accepted `image` or `gifv` upload.
    pub image_max_bytes: u64,
    /// Largest accepted `video` or `audio` upload.
    pub video_max_bytes: u64,
    pub description_min_chars: usize,
    pub description_max_chars: usize,
}

impl Default for MediaLimits {
    fn default() -> Self {
        Self {
            image_max_bytes: 10 * 1024 * 1024,
            video_max_bytes: 40 * 1024 * 1024,
            description_min_chars: 0,
            description_max_chars: 1_500,
        }
    }
}

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Unique identifier for this server node, used in logs.
    pub node_id: String,
    /// Host name of this instance; the instance actor's username.
    pub host: String,
    /// Human-readable instance title.
    pub instance_title: String,
    pub cache: CacheConfig,
    /// Period of the `@cachesweep` task.
    pub sweep_interval: Duration,
    /// Target occupancy percentage of every sweep.
    pub sweep_threshold_pct: u8,
    pub database: DatabaseConfig,
    /// Upper bound on opening the database.
    pub db_open_timeout: Duration,
    /// Root directory of local blob storage.
    pub storage_root: PathBuf,
    pub lock_naming: LockNaming,
    /// Upper bound on acquiring the storage lock file.
    pub lock_timeout: Duration,
    pub lanes: LaneConfig,
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    pub context_mode: ContextMode,
    pub media: MediaLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            host: "localhost".to_string(),
            instance_title: "weft".to_string(),
            cache: CacheConfig::default(),
            sweep_interval: Duration::from_secs(60),
            sweep_threshold_pct: 60,
            database: DatabaseConfig::Memory,
            db_open_timeout: Duration::from_secs(10),
            storage_root: PathBuf::from("storage"),
            lock_naming: LockNaming::InvocationId,
            lock_timeout: Duration::from_secs(5),
            lanes: LaneConfig::default(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            context_mode: ContextMode::Shared,
            media: MediaLimits::default(),
        }
    }
}
