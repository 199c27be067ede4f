//! Module registry and discovery
//!
//! Handles module discovery, header parsing, identifier derivation and the
//! persistent on/off registry.

pub mod catalog;
pub mod discovery;
pub mod header;
pub mod identifier;
pub mod store;

pub use catalog::{IdentifierCollision, ModuleCatalog};
pub use discovery::{ModuleDiscovery, ModuleScan};
pub use header::ModuleHeader;
pub use identifier::{module_identifier, normalize_name};
pub use store::{ModuleRegistry, RegistryEntry};
