//! Per-entry bookkeeping consulted by eviction policies.

/// Access metadata for one cached entry.
///
/// Times are ticks of the owning cache's logical clock, which advances on
/// every read and write, so ordering is exact even within one millisecond.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    pub inserted_at: u64,
    pub last_access: u64,
    pub last_update: u64,
    /// Reads since the entry was inserted.
    pub hits: u32,
}

impl EntryMetadata {
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self {
            inserted_at: now,
            last_access: now,
            last_update: now,
            hits: 0,
        }
    }

    /// Records a read.
    pub fn on_access(&mut self, now: u64) {
        self.hits = self.hits.saturating_add(1);
        self.last_access = now;
    }

    /// Records an overwrite. Hit count survives replacement of the value.
    pub fn on_update(&mut self, now: u64) {
        self.last_access = now;
        self.last_update = now;
    }
}

/// A cached value with its metadata.
#[derive(Debug, Clone)]
pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) meta: EntryMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_bumps_hits_and_recency() {
        let mut meta = EntryMetadata::new(5);
        meta.on_access(9);
        meta.on_access(12);
        assert_eq!(meta.hits, 2);
        assert_eq!(meta.last_access, 12);
        assert_eq!(meta.inserted_at, 5);
    }

    #[test]
    fn update_keeps_hits() {
        let mut meta = EntryMetadata::new(1);
        meta.on_access(2);
        meta.on_update(3);
        assert_eq!(meta.hits, 1);
        assert_eq!(meta.last_update, 3);
        assert_eq!(meta.last_access, 3);
    }

    #[test]
    fn hits_saturate() {
        let mut meta = EntryMetadata {
            hits: u32::MAX,
            ..EntryMetadata::default()
        };
        meta.on_access(1);
        assert_eq!(meta.hits, u32::MAX);
    }
}
