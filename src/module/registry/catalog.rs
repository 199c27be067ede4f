//! Module catalog
//!
//! A scan collected into an ordered, collision-free list. When two modules
//! normalize to the same identifier the first one in traversal order is kept
//! and the rest are recorded as collisions.

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::warn;

use crate::module::traits::ModuleDescriptor;

/// Module excluded because its identifier was already taken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierCollision {
    pub identifier: String,
    /// Display name of the excluded module
    pub display_name: String,
    /// Entry point of the excluded module
    pub entry_point: PathBuf,
    /// Entry point of the module that kept the identifier
    pub kept_entry_point: PathBuf,
}

/// Ordered set of discovered modules, unique by identifier
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: Vec<ModuleDescriptor>,
    collisions: Vec<IdentifierCollision>,
}

impl ModuleCatalog {
    /// Build a catalog from a scan
    pub fn build<I>(scan: I) -> Self
    where
        I: IntoIterator<Item = ModuleDescriptor>,
    {
        let mut seen = HashSet::new();
        let mut catalog = ModuleCatalog::default();

        for descriptor in scan {
            if seen.insert(descriptor.identifier.clone()) {
                catalog.modules.push(descriptor);
                continue;
            }

            let kept_entry_point = catalog
                .get(&descriptor.identifier)
                .map(|kept| kept.entry_point.clone())
                .unwrap_or_default();
            warn!(
                "Module {:?} at {:?} collides with {:?} on identifier {}; ignoring it",
                descriptor.display_name,
                descriptor.entry_point,
                kept_entry_point,
                descriptor.identifier
            );
            catalog.collisions.push(IdentifierCollision {
                identifier: descriptor.identifier,
                display_name: descriptor.display_name,
                entry_point: descriptor.entry_point,
                kept_entry_point,
            });
        }

        catalog
    }

    /// Look up a module by identifier
    pub fn get(&self, identifier: &str) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.identifier == identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }

    /// Modules in traversal order
    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn collisions(&self) -> &[IdentifierCollision] {
        &self.collisions
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }
}
