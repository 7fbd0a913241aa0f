//! On-disk [`KvStore`] backed by `redb`.

use std::path::Path;

use redb::{ReadableTable, TableDefinition, TableError};

use super::{KvStore, Table};

const ACCOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("accounts");
const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");
const ATTACHMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("attachments");

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    match table {
        Table::Accounts => ACCOUNTS,
        Table::Instances => INSTANCES,
        Table::Statuses => STATUSES,
        Table::Attachments => ATTACHMENTS,
    }
}

/// A single `redb` database file.
pub struct RedbKv {
    db: redb::Database,
}

impl RedbKv {
    /// Opens or creates the file at `path` and ensures every table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened (including when another
    /// process holds it) or the tables cannot be created.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = redb::Database::create(path)?;
        let txn = db.begin_write()?;
        for table in Table::ALL {
            txn.open_table(definition(table))?;
        }
        txn.commit()?;
        Ok(Self { db })
    }
}

impl KvStore for RedbKv {
    fn get(&self, table: Table, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let t = match txn.open_table(definition(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(t.get(key)?.map(|v| v.value().to_vec()))
    }

    fn put(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(definition(table))?;
            t.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn put_if_absent(&self, table: Table, key: &str, value: &[u8]) -> anyhow::Result<Vec<u8>> {
        let txn = self.db.begin_write()?;
        let stored = {
            let mut t = txn.open_table(definition(table))?;
            let existing = t.get(key)?.map(|v| v.value().to_vec());
            match existing {
                Some(bytes) => bytes,
                None => {
                    t.insert(key, value)?;
                    value.to_vec()
                }
            }
        };
        txn.commit()?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/weft.redb");
        {
            let kv = RedbKv::open(&path).unwrap();
            kv.put(Table::Statuses, "s1", b"payload").unwrap();
            assert_eq!(kv.put_if_absent(Table::Instances, "h", b"first").unwrap(), b"first");
        }
        let kv = RedbKv::open(&path).unwrap();
        assert_eq!(kv.get(Table::Statuses, "s1").unwrap().unwrap(), b"payload");
        assert_eq!(kv.put_if_absent(Table::Instances, "h", b"second").unwrap(), b"first");
        assert!(kv.get(Table::Accounts, "nobody").unwrap().is_none());
    }
}
