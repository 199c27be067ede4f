//! Database abstraction layer
//!
//! Provides a unified interface for different database backends (sled, redb,
//! in-memory). Allows switching between storage engines via feature flags.

use anyhow::Result;
use std::path::Path;

/// Database abstraction trait
///
/// Provides a unified interface for key-value storage operations
/// that can be implemented by different backends.
pub trait Database: Send + Sync {
    /// Open a named tree/table
    fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>>;

    /// Flush all pending writes
    fn flush(&self) -> Result<()>;
}

/// Tree/Table abstraction trait
///
/// Represents a named collection of key-value pairs within a database.
/// Every write is committed before the call returns.
pub trait Tree: Send + Sync {
    /// Insert a key-value pair
    fn insert(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Remove a key-value pair
    fn remove(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Atomically replace the value at `key` if it currently equals `expected`
    ///
    /// `expected == None` means "key is absent". Returns `true` if the swap
    /// happened.
    fn compare_and_swap(&self, key: &[u8], expected: Option<&[u8]>, new: &[u8]) -> Result<bool>;

    /// Get number of entries
    fn len(&self) -> Result<usize>;

    /// Check if tree is empty
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Iterate over all key-value pairs in key order
    fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_>;
}

/// Database backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sled,
    Redb,
    Memory,
}

/// Create a database instance based on backend type
pub fn create_database<P: AsRef<Path>>(
    data_dir: P,
    backend: DatabaseBackend,
) -> Result<Box<dyn Database>> {
    match backend {
        #[cfg(feature = "sled")]
        DatabaseBackend::Sled => Ok(Box::new(sled_impl::SledDatabase::new(data_dir)?)),
        #[cfg(not(feature = "sled"))]
        DatabaseBackend::Sled => Err(anyhow::anyhow!(
            "Sled backend not available (feature not enabled)"
        )),
        #[cfg(feature = "redb")]
        DatabaseBackend::Redb => Ok(Box::new(redb_impl::RedbDatabase::new(data_dir)?)),
        #[cfg(not(feature = "redb"))]
        DatabaseBackend::Redb => Err(anyhow::anyhow!(
            "Redb backend not available (feature not enabled)"
        )),
        DatabaseBackend::Memory => {
            let _ = data_dir;
            Ok(Box::new(memory_impl::MemoryDatabase::new()))
        }
    }
}

/// Get default database backend
///
/// Returns the preferred persistent backend (redb if available, otherwise
/// sled, otherwise memory).
pub fn default_backend() -> DatabaseBackend {
    #[cfg(feature = "redb")]
    {
        DatabaseBackend::Redb
    }
    #[cfg(all(not(feature = "redb"), feature = "sled"))]
    {
        DatabaseBackend::Sled
    }
    #[cfg(all(not(feature = "redb"), not(feature = "sled")))]
    {
        DatabaseBackend::Memory
    }
}

/// Get fallback database backend
///
/// Returns an alternative persistent backend if the primary fails.
/// Memory is never used as a silent fallback.
pub fn fallback_backend(primary: DatabaseBackend) -> Option<DatabaseBackend> {
    match primary {
        DatabaseBackend::Redb => {
            #[cfg(feature = "sled")]
            {
                Some(DatabaseBackend::Sled)
            }
            #[cfg(not(feature = "sled"))]
            {
                None
            }
        }
        DatabaseBackend::Sled => {
            #[cfg(feature = "redb")]
            {
                Some(DatabaseBackend::Redb)
            }
            #[cfg(not(feature = "redb"))]
            {
                None
            }
        }
        DatabaseBackend::Memory => None,
    }
}

pub use memory_impl::MemoryDatabase;

// In-memory implementation (tests and ephemeral hosts)
mod memory_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    type Map = Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>;

    pub struct MemoryDatabase {
        trees: Mutex<HashMap<String, Map>>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self {
                trees: Mutex::new(HashMap::new()),
            }
        }
    }

    impl Default for MemoryDatabase {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Database for MemoryDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let mut trees = self
                .trees
                .lock()
                .map_err(|_| anyhow::anyhow!("Memory database lock poisoned"))?;
            let map = trees
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())));
            Ok(Box::new(MemoryTree {
                map: Arc::clone(map),
            }))
        }

        fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    pub struct MemoryTree {
        map: Map,
    }

    impl MemoryTree {
        fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
            self.map
                .lock()
                .map_err(|_| anyhow::anyhow!("Memory tree lock poisoned"))
        }
    }

    impl Tree for MemoryTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.lock()?.insert(key.to_vec(), value.to_vec());
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.lock()?.get(key).cloned())
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.lock()?.remove(key);
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.lock()?.contains_key(key))
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: &[u8],
        ) -> Result<bool> {
            let mut map = self.lock()?;
            if map.get(key).map(|v| v.as_slice()) != expected {
                return Ok(false);
            }
            map.insert(key.to_vec(), new.to_vec());
            Ok(true)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.lock()?.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            match self.lock() {
                Ok(map) => {
                    let items: Vec<_> = map
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), v.clone())))
                        .collect();
                    Box::new(items.into_iter())
                }
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        }
    }
}

// Sled implementation
#[cfg(feature = "sled")]
mod sled_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use sled::Db;
    use std::path::Path;
    use std::sync::Arc;

    pub struct SledDatabase {
        db: Arc<Db>,
    }

    impl SledDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db = sled::open(data_dir.as_ref().join("sled"))?;
            Ok(Self { db: Arc::new(db) })
        }
    }

    impl Database for SledDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let tree = self.db.open_tree(name)?;
            Ok(Box::new(SledTree {
                tree: Arc::new(tree),
            }))
        }

        fn flush(&self) -> Result<()> {
            self.db.flush()?;
            Ok(())
        }
    }

    struct SledTree {
        tree: Arc<sled::Tree>,
    }

    impl Tree for SledTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            self.tree.insert(key, value)?;
            self.tree.flush()?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.tree.get(key)?.map(|v| v.to_vec()))
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            self.tree.remove(key)?;
            self.tree.flush()?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            Ok(self.tree.contains_key(key)?)
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: &[u8],
        ) -> Result<bool> {
            let swapped = self
                .tree
                .compare_and_swap(key, expected, Some(new))?
                .is_ok();
            if swapped {
                self.tree.flush()?;
            }
            Ok(swapped)
        }

        fn len(&self) -> Result<usize> {
            Ok(self.tree.len())
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            Box::new(self.tree.iter().map(|item| {
                item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                    .map_err(|e| anyhow::anyhow!("Sled iteration error: {}", e))
            }))
        }
    }
}

// Redb implementation
#[cfg(feature = "redb")]
mod redb_impl {
    use super::{Database, Tree};
    use anyhow::Result;
    use redb::{Database as RedbDb, ReadableTable, TableDefinition};
    use std::path::Path;
    use std::sync::Arc;

    // Redb requires static table definitions
    static MODULE_STATES_TABLE: TableDefinition<&[u8], &[u8]> =
        TableDefinition::new("module_states");

    pub struct RedbDatabase {
        db: Arc<RedbDb>,
    }

    impl RedbDatabase {
        pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
            let db_path = data_dir.as_ref().join("module-gate.redb");
            // `create` opens an existing file or creates a new one
            let db = RedbDb::create(&db_path)?;

            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(MODULE_STATES_TABLE)?;
            }
            write_txn.commit()?;

            Ok(Self { db: Arc::new(db) })
        }

        fn get_table_def(
            &self,
            name: &str,
        ) -> Option<&'static TableDefinition<'static, &'static [u8], &'static [u8]>> {
            match name {
                "module_states" => Some(&MODULE_STATES_TABLE),
                _ => None,
            }
        }
    }

    impl Database for RedbDatabase {
        fn open_tree(&self, name: &str) -> Result<Box<dyn Tree>> {
            let table_def = self.get_table_def(name).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown table name: {}. Redb requires pre-defined tables.",
                    name
                )
            })?;

            Ok(Box::new(RedbTree {
                db: Arc::clone(&self.db),
                table_def,
            }))
        }

        fn flush(&self) -> Result<()> {
            // Redb flushes on transaction commit
            let write_txn = self.db.begin_write()?;
            write_txn.commit()?;
            Ok(())
        }
    }

    struct RedbTree {
        db: Arc<RedbDb>,
        table_def: &'static TableDefinition<'static, &'static [u8], &'static [u8]>,
    }

    impl Tree for RedbTree {
        fn insert(&self, key: &[u8], value: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.insert(key, value)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.map(|v| v.value().to_vec());
            Ok(result)
        }

        fn remove(&self, key: &[u8]) -> Result<()> {
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_table(*self.table_def)?;
                table.remove(key)?;
            }
            write_txn.commit()?;
            Ok(())
        }

        fn contains_key(&self, key: &[u8]) -> Result<bool> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            let result = table.get(key)?.is_some();
            Ok(result)
        }

        fn compare_and_swap(
            &self,
            key: &[u8],
            expected: Option<&[u8]>,
            new: &[u8],
        ) -> Result<bool> {
            // Write transactions are serialized, so read-compare-write is atomic
            let write_txn = self.db.begin_write()?;
            let swapped = {
                let mut table = write_txn.open_table(*self.table_def)?;
                let current = table.get(key)?.map(|v| v.value().to_vec());
                if current.as_deref() == expected {
                    table.insert(key, new)?;
                    true
                } else {
                    false
                }
            };
            if swapped {
                write_txn.commit()?;
            } else {
                write_txn.abort()?;
            }
            Ok(swapped)
        }

        fn len(&self) -> Result<usize> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(*self.table_def)?;
            Ok(table.len()? as usize)
        }

        fn iter(&self) -> Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + '_> {
            // The read transaction must outlive the range, so collect eagerly
            let read_txn = match self.db.begin_read() {
                Ok(txn) => txn,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to begin read transaction: {}",
                        e
                    ))));
                }
            };

            let table = match read_txn.open_table(*self.table_def) {
                Ok(tbl) => tbl,
                Err(e) => {
                    return Box::new(std::iter::once(Err(anyhow::anyhow!(
                        "Failed to open table: {}",
                        e
                    ))));
                }
            };

            let mut items = Vec::new();
            match table.range::<&[u8]>(..) {
                Ok(range_iter) => {
                    for item_result in range_iter {
                        match item_result {
                            Ok((key, value)) => {
                                items.push(Ok((key.value().to_vec(), value.value().to_vec())));
                            }
                            Err(e) => {
                                items.push(Err(anyhow::anyhow!("Redb iteration error: {}", e)));
                            }
                        }
                    }
                }
                Err(e) => {
                    items.push(Err(anyhow::anyhow!("Failed to create range: {}", e)));
                }
            }

            Box::new(items.into_iter())
        }
    }
}
