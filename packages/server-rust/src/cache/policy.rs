//! Pluggable victim selection for cache sweeps.

use std::sync::Arc;

use super::entry::EntryMetadata;

/// Orders entries for eviction. Entries with the smallest rank go first.
pub trait EvictionPolicy: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Eviction rank of an entry; compared lexicographically.
    fn rank(&self, meta: &EntryMetadata) -> (u64, u64);

    /// Picks up to `count` victims from `candidates`.
    fn select_victims(&self, mut candidates: Vec<(String, EntryMetadata)>, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }
        if count < candidates.len() {
            candidates.select_nth_unstable_by_key(count - 1, |(_, meta)| self.rank(meta));
            candidates.truncate(count);
        }
        candidates.into_iter().map(|(key, _)| key).collect()
    }
}

/// Least recently used.
#[derive(Debug, Clone, Copy, Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn rank(&self, meta: &EntryMetadata) -> (u64, u64) {
        (meta.last_access, meta.inserted_at)
    }
}

/// Least frequently used, ties broken by recency.
#[derive(Debug, Clone, Copy, Default)]
pub struct LfuPolicy;

impl EvictionPolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn rank(&self, meta: &EntryMetadata) -> (u64, u64) {
        (u64::from(meta.hits), meta.last_access)
    }
}

/// Built-in policies, selectable from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionKind {
    #[default]
    Lru,
    Lfu,
}

impl EvictionKind {
    #[must_use]
    pub fn build(self) -> Arc<dyn EvictionPolicy> {
        match self {
            Self::Lru => Arc::new(LruPolicy),
            Self::Lfu => Arc::new(LfuPolicy),
        }
    }
}

impl std::str::FromStr for EvictionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(last_access: u64, hits: u32) -> EntryMetadata {
        EntryMetadata {
            inserted_at: 0,
            last_access,
            last_update: 0,
            hits,
        }
    }

    fn candidates() -> Vec<(String, EntryMetadata)> {
        vec![
            ("hot-old".to_string(), meta(1, 50)),
            ("cold-new".to_string(), meta(9, 0)),
            ("warm-mid".to_string(), meta(5, 3)),
            ("cold-old".to_string(), meta(2, 0)),
        ]
    }

    #[test]
    fn lru_evicts_stalest() {
        let mut victims = LruPolicy.select_victims(candidates(), 2);
        victims.sort();
        assert_eq!(victims, vec!["cold-old", "hot-old"]);
    }

    #[test]
    fn lfu_evicts_least_hit() {
        let mut victims = LfuPolicy.select_victims(candidates(), 2);
        victims.sort();
        assert_eq!(victims, vec!["cold-new", "cold-old"]);
    }

    #[test]
    fn count_larger_than_candidates_takes_all() {
        assert_eq!(LruPolicy.select_victims(candidates(), 10).len(), 4);
        assert!(LfuPolicy.select_victims(candidates(), 0).is_empty());
    }

    #[test]
    fn kind_parses_and_builds() {
        assert_eq!("LFU".parse::<EvictionKind>().unwrap(), EvictionKind::Lfu);
        assert!("fifo".parse::<EvictionKind>().is_err());
        assert_eq!(EvictionKind::Lru.build().name(), "lru");
    }
}
