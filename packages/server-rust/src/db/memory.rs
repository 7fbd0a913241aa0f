//! In-memory [`KvStore`] backed by [`DashMap`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{KvStore, Table};

/// Ephemeral store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<(Table, String), Vec<u8>>,
}

impl MemoryKv {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, table: Table, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .get(&(table, key.to_string()))
            .map(|v| v.value().clone()))
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries.insert((table, key.to_string()), value.to_vec());
        Ok(())
    }

    fn put_if_absent(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(match self.entries.entry((table, key.to_string())) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => slot.insert(value.to_vec()).value().clone(),
        })
    }
}
