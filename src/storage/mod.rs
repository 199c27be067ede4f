//! Storage layer for module-gate
//!
//! Provides the durable key-value store behind the module registry.
//! Supports multiple database backends via feature flags (sled, redb) plus an
//! in-memory backend for tests.

pub mod database;

use anyhow::Result;
use database::{create_database, default_backend, fallback_backend, Database, DatabaseBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{DatabaseBackendConfig, StorageConfig};

/// Name of the tree holding `module_id -> on/off` pairs
pub const MODULE_STATES_TREE: &str = "module_states";

/// Storage manager owning the database handle
pub struct Storage {
    db: Arc<dyn Database>,
    backend: DatabaseBackend,
}

impl Storage {
    /// Create a new storage instance with default backend
    ///
    /// Attempts to use the default backend (redb), and falls back to sled if
    /// redb fails and sled is available.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let default = default_backend();

        match Self::with_backend(data_dir.as_ref(), default) {
            Ok(storage) => Ok(storage),
            Err(e) => {
                if let Some(fallback) = fallback_backend(default) {
                    warn!(
                        "Failed to initialize {:?} backend: {}. Falling back to {:?}.",
                        default, e, fallback
                    );
                    Self::with_backend(data_dir, fallback)
                } else {
                    Err(anyhow::anyhow!(
                        "Failed to initialize {:?} backend: {}. No fallback backend available.",
                        default,
                        e
                    ))
                }
            }
        }
    }

    /// Create a new storage instance with specified backend
    pub fn with_backend<P: AsRef<Path>>(data_dir: P, backend: DatabaseBackend) -> Result<Self> {
        if backend != DatabaseBackend::Memory {
            std::fs::create_dir_all(data_dir.as_ref())?;
        }
        let db = Arc::from(create_database(data_dir.as_ref(), backend)?);
        info!("Opened {:?} storage at {:?}", backend, data_dir.as_ref());
        Ok(Self { db, backend })
    }

    /// Ephemeral in-memory storage
    pub fn in_memory() -> Self {
        Self {
            db: Arc::new(database::MemoryDatabase::new()),
            backend: DatabaseBackend::Memory,
        }
    }

    /// Open storage as described by configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.database_backend {
            DatabaseBackendConfig::Auto => Self::new(&config.data_dir),
            DatabaseBackendConfig::Redb => {
                Self::with_backend(&config.data_dir, DatabaseBackend::Redb)
            }
            DatabaseBackendConfig::Sled => {
                Self::with_backend(&config.data_dir, DatabaseBackend::Sled)
            }
            DatabaseBackendConfig::Memory => Ok(Self::in_memory()),
        }
    }

    /// Tree holding module states
    pub fn module_states(&self) -> Result<Arc<dyn database::Tree>> {
        Ok(Arc::from(self.db.open_tree(MODULE_STATES_TREE)?))
    }

    /// Backend in use
    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}
