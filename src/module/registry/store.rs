//! Module state registry
//!
//! Persistent `module_id -> on/off` mapping on top of a storage tree. Every
//! read goes to the tree; there is no cache layer.

use std::sync::Arc;
use tracing::debug;

use crate::module::traits::{ModuleError, ModuleState};
use crate::storage::database::{MemoryDatabase, Tree, Database};
use crate::storage::MODULE_STATES_TREE;

/// Stored registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub module_id: String,
    pub state: ModuleState,
}

/// Registry of module states
#[derive(Clone)]
pub struct ModuleRegistry {
    tree: Arc<dyn Tree>,
}

impl ModuleRegistry {
    /// Wrap an opened storage tree
    pub fn new(tree: Arc<dyn Tree>) -> Self {
        Self { tree }
    }

    /// Registry backed by a fresh in-memory tree
    pub fn in_memory() -> Result<Self, ModuleError> {
        let tree = MemoryDatabase::new().open_tree(MODULE_STATES_TREE)?;
        Ok(Self::new(Arc::from(tree)))
    }

    /// Current state; `Off` when no entry exists
    pub fn get_state(&self, module_id: &str) -> Result<ModuleState, ModuleError> {
        match self.tree.get(module_id.as_bytes())? {
            Some(bytes) => decode_state(module_id, &bytes),
            None => Ok(ModuleState::Off),
        }
    }

    /// Stored state, or `None` when the module was never registered
    pub fn stored_state(&self, module_id: &str) -> Result<Option<ModuleState>, ModuleError> {
        self.tree
            .get(module_id.as_bytes())?
            .map(|bytes| decode_state(module_id, &bytes))
            .transpose()
    }

    /// Create an `off` entry if none exists
    ///
    /// Returns `true` if this call created the entry.
    pub fn ensure_default(&self, module_id: &str) -> Result<bool, ModuleError> {
        let created =
            self.tree
                .compare_and_swap(module_id.as_bytes(), None, ModuleState::Off.as_bytes())?;
        if created {
            debug!("Registered new module {} as off", module_id);
        }
        Ok(created)
    }

    /// Overwrite the state unconditionally
    pub fn set_state(&self, module_id: &str, state: ModuleState) -> Result<(), ModuleError> {
        self.tree.insert(module_id.as_bytes(), state.as_bytes())?;
        debug!("Module {} set to {}", module_id, state);
        Ok(())
    }

    /// Replace the state only if it currently equals `expected`
    pub fn compare_and_set(
        &self,
        module_id: &str,
        expected: ModuleState,
        new: ModuleState,
    ) -> Result<bool, ModuleError> {
        Ok(self.tree.compare_and_swap(
            module_id.as_bytes(),
            Some(expected.as_bytes()),
            new.as_bytes(),
        )?)
    }

    /// All stored entries in key order, including stale ones
    pub fn entries(&self) -> Result<Vec<RegistryEntry>, ModuleError> {
        self.tree
            .iter()
            .map(|item| {
                let (key, value) = item?;
                let module_id = String::from_utf8(key).map_err(|e| {
                    ModuleError::Storage(format!("Non-UTF-8 registry key: {}", e))
                })?;
                let state = decode_state(&module_id, &value)?;
                Ok(RegistryEntry { module_id, state })
            })
            .collect()
    }
}

fn decode_state(module_id: &str, bytes: &[u8]) -> Result<ModuleState, ModuleError> {
    ModuleState::from_bytes(bytes).ok_or_else(|| {
        ModuleError::Storage(format!(
            "Invalid stored state for {}: {:?}",
            module_id,
            String::from_utf8_lossy(bytes)
        ))
    })
}
