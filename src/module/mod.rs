//! Module system for module-gate
//!
//! Feature modules are files in a modules directory that declare themselves
//! in a comment header. A module is switched on only after a sandboxed
//! test-load succeeds, and a module that later fails to load switches itself
//! off instead of taking the host down.
//!
//! ## Architecture
//!
//! - **Discovery**: header parsing and identifier derivation, no execution
//! - **Registry**: durable `identifier -> on/off` map
//! - **Process Isolation**: entry points run as child processes with resource limits
//! - **Crash Containment**: load failures and crashes deactivate only the failing module

pub mod loader;
pub mod manager;
pub mod process;
pub mod registry;
pub mod sandbox;
pub mod traits;
pub mod validation;

pub use loader::{BootstrapReport, LoadFailure, ModuleLoader};
pub use manager::{ModuleListing, ModuleManager, ModuleStatus, ToggleOutcome};
pub use process::{ModuleProcess, ModuleProcessMonitor, ModuleProcessSpawner};
pub use registry::{ModuleCatalog, ModuleDiscovery, ModuleRegistry};
pub use sandbox::{ExecutionError, ProcessSandbox, Sandbox};
pub use traits::{ModuleDescriptor, ModuleError, ModuleState, RuntimeStatus, ValidationResult};
pub use validation::ModuleValidator;
