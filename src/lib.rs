//! Module Gate - feature-module registry with safe activation
//!
//! Discovers optional feature modules in a directory tree, keeps a durable
//! on/off state per module, and refuses to enable a module whose entry point
//! fails a test-load in an isolated child process. Enabled modules are
//! loaded on every bootstrap; a module that fails at load time switches
//! itself off instead of taking the host down.
//!
//! ## Components
//!
//! 1. **Discovery** (`module::registry`): header parsing, identifiers, catalog
//! 2. **Registry** (`module::registry::store`): persisted `on`/`off` per module
//! 3. **Validator** (`module::validation`): test-load through the sandbox
//! 4. **Activator** (`module::manager`): toggles gated by validation
//! 5. **Loader** (`module::loader`): bootstrap and auto-deactivation
//! 6. **Admin** (`admin`): settings page and authenticated toggle endpoint
//!
//! ## Design Principles
//!
//! 1. **Validate before enable**: a failed test-load never changes stored state
//! 2. **Contain load failures**: a broken module disables only itself
//! 3. **Process isolation**: module code never runs inside the host process

pub mod admin;
pub mod config;
pub mod module;
pub mod storage;
pub mod utils;

pub use config::GateConfig;
pub use module::{
    BootstrapReport, ModuleDescriptor, ModuleError, ModuleManager, ModuleRegistry, ModuleState,
    ToggleOutcome, ValidationResult,
};
pub use storage::Storage;
