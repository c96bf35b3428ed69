//! ACID-durable resource store backed by redb.
//!
//! Documents are kept in a single `resources` table keyed by URL, so
//! attached and committed policies survive restarts.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::graph::PolicyDocument;

use super::{ResourceStore, StoreResult};

/// URL → Turtle text.
const RESOURCES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("resources");

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "resources.redb";

fn redb_error(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb {
        message: format!("{context} failed: {e}"),
    }
}

/// Resource store using redb. Writes are transactions; reads use MVCC
/// snapshots.
pub struct DurableResourceStore {
    db: Arc<Database>,
}

impl DurableResourceStore {
    /// Open or create the store in `data_dir`.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db_path = data_dir.join(DATABASE_FILE);
        let db = Database::create(&db_path).map_err(|e| StoreError::Redb {
            message: format!("failed to open redb at {}: {e}", db_path.display()),
        })?;

        // Create the table up front so read transactions never miss it.
        let txn = db.begin_write().map_err(|e| redb_error("begin_write", e))?;
        txn.open_table(RESOURCES_TABLE)
            .map_err(|e| redb_error("open_table", e))?;
        txn.commit().map_err(|e| redb_error("commit", e))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Delete a resource. Returns whether it existed.
    pub fn remove(&self, url: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(|e| redb_error("begin_write", e))?;
        let existed = {
            let mut table = txn
                .open_table(RESOURCES_TABLE)
                .map_err(|e| redb_error("open_table", e))?;
            let removed = table.remove(url).map_err(|e| redb_error("remove", e))?;
            removed.is_some()
        };
        txn.commit().map_err(|e| redb_error("commit", e))?;
        Ok(existed)
    }

    /// All stored URLs, sorted.
    pub fn urls(&self) -> StoreResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(|e| redb_error("begin_read", e))?;
        let table = txn
            .open_table(RESOURCES_TABLE)
            .map_err(|e| redb_error("open_table", e))?;
        let mut urls = Vec::new();
        for entry in table.iter().map_err(|e| redb_error("iter", e))? {
            let (key, _) = entry.map_err(|e| redb_error("iter", e))?;
            urls.push(key.value().to_string());
        }
        Ok(urls)
    }
}

impl ResourceStore for DurableResourceStore {
    fn get(&self, url: &str) -> StoreResult<Option<PolicyDocument>> {
        let txn = self.db.begin_read().map_err(|e| redb_error("begin_read", e))?;
        let table = txn
            .open_table(RESOURCES_TABLE)
            .map_err(|e| redb_error("open_table", e))?;
        let result = table.get(url).map_err(|e| redb_error("get", e))?;
        Ok(result.map(|guard| PolicyDocument::new(guard.value())))
    }

    fn put(&self, url: &str, document: &PolicyDocument) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(|e| redb_error("begin_write", e))?;
        {
            let mut table = txn
                .open_table(RESOURCES_TABLE)
                .map_err(|e| redb_error("open_table", e))?;
            table
                .insert(url, document.as_str())
                .map_err(|e| redb_error("insert", e))?;
        }
        txn.commit().map_err(|e| redb_error("commit", e))?;
        Ok(())
    }
}

impl std::fmt::Debug for DurableResourceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableResourceStore").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = DurableResourceStore::open(dir.path()).unwrap();

        assert_eq!(store.get("http://d/1.dtou").unwrap(), None);
        store.put("http://d/1.dtou", &"# p".into()).unwrap();
        assert_eq!(store.get("http://d/1.dtou").unwrap(), Some(PolicyDocument::new("# p")));

        assert!(store.remove("http://d/1.dtou").unwrap());
        assert!(!store.remove("http://d/1.dtou").unwrap());
        assert_eq!(store.get("http://d/1.dtou").unwrap(), None);
    }

    #[test]
    fn overwrite_value() {
        let dir = TempDir::new().unwrap();
        let store = DurableResourceStore::open(dir.path()).unwrap();
        store.put("u", &"v1".into()).unwrap();
        store.put("u", &"v2".into()).unwrap();
        assert_eq!(store.get("u").unwrap(), Some(PolicyDocument::new("v2")));
        assert_eq!(store.urls().unwrap(), vec!["u"]);
    }

    #[test]
    fn persistence_across_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = DurableResourceStore::open(dir.path()).unwrap();
            store.put("http://d/2.dtou", &"# kept".into()).unwrap();
        }
        let store = DurableResourceStore::open(dir.path()).unwrap();
        assert_eq!(store.get("http://d/2.dtou").unwrap(), Some(PolicyDocument::new("# kept")));
    }
}
