//! Typed cache families owned by a resource context.
//!
//! - [`bounded`]: the capacity-bounded cache and its sweep
//! - [`policy`]: pluggable eviction (LRU, LFU)
//! - [`entry`]: per-entry access metadata

pub mod bounded;
pub mod entry;
pub mod policy;

pub use bounded::CapacityBoundedCache;
pub use entry::EntryMetadata;
pub use policy::{EvictionKind, EvictionPolicy, LfuPolicy, LruPolicy};

use serde::Serialize;
use weft_core::{Account, Attachment, Instance, Status};

use crate::service::config::CacheConfig;

/// Errors from cache initialization.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache {name} configured with zero capacity")]
    ZeroCapacity { name: &'static str },
}

/// Entries evicted per family by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub accounts: usize,
    pub statuses: usize,
    pub attachments: usize,
    pub instances: usize,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.accounts + self.statuses + self.attachments + self.instances
    }
}

/// Occupancy of one family, as exposed on the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheOccupancy {
    pub name: &'static str,
    pub len: usize,
    pub capacity: usize,
}

/// Every cache family used by the processing layer.
pub struct Caches {
    pub accounts: CapacityBoundedCache<Account>,
    pub statuses: CapacityBoundedCache<Status>,
    pub attachments: CapacityBoundedCache<Attachment>,
    pub instances: CapacityBoundedCache<Instance>,
}

impl Caches {
    /// Builds all families with the configured capacities and policy.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ZeroCapacity`] if any family has capacity 0.
    pub fn init(config: &CacheConfig) -> Result<Self, CacheError> {
        for (name, capacity) in [
            ("accounts", config.account_capacity),
            ("statuses", config.status_capacity),
            ("attachments", config.attachment_capacity),
            ("instances", config.instance_capacity),
        ] {
            if capacity == 0 {
                return Err(CacheError::ZeroCapacity { name });
            }
        }
        let policy = config.policy.build();
        Ok(Self {
            accounts: CapacityBoundedCache::new("accounts", config.account_capacity, policy.clone()),
            statuses: CapacityBoundedCache::new("statuses", config.status_capacity, policy.clone()),
            attachments: CapacityBoundedCache::new(
                "attachments",
                config.attachment_capacity,
                policy.clone(),
            ),
            instances: CapacityBoundedCache::new("instances", config.instance_capacity, policy),
        })
    }

    pub fn start(&self) {
        self.accounts.start();
        self.statuses.start();
        self.attachments.start();
        self.instances.start();
    }

    pub fn stop(&self) {
        self.accounts.stop();
        self.statuses.stop();
        self.attachments.stop();
        self.instances.stop();
    }

    /// Sweeps every family down to `threshold_pct` of its capacity.
    pub fn sweep(&self, threshold_pct: u8) -> SweepReport {
        let report = SweepReport {
            accounts: self.accounts.sweep(threshold_pct),
            statuses: self.statuses.sweep(threshold_pct),
            attachments: self.attachments.sweep(threshold_pct),
            instances: self.instances.sweep(threshold_pct),
        };
        if report.total() > 0 {
            metrics::counter!("weft_cache_evictions_total").increment(report.total() as u64);
        }
        report
    }

    #[must_use]
    pub fn occupancy(&self) -> Vec<CacheOccupancy> {
        vec![
            CacheOccupancy {
                name: self.accounts.name(),
                len: self.accounts.len(),
                capacity: self.accounts.capacity(),
            },
            CacheOccupancy {
                name: self.statuses.name(),
                len: self.statuses.len(),
                capacity: self.statuses.capacity(),
            },
            CacheOccupancy {
                name: self.attachments.name(),
                len: self.attachments.len(),
                capacity: self.attachments.capacity(),
            },
            CacheOccupancy {
                name: self.instances.name(),
                len: self.instances.len(),
                capacity: self.instances.capacity(),
            },
        ]
    }
}
