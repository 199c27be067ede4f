//! Module loading system
//!
//! Bootstrap loading with auto-deactivation, and per-module configuration.

pub mod loader;

pub use loader::{BootstrapReport, LoadFailure, ModuleLoader};
