//! Process management for modules
//!
//! Handles spawning and monitoring of module processes.

pub mod monitor;
pub mod spawner;

pub use monitor::{ModuleHealth, ModuleProcessMonitor};
pub use spawner::{ModuleProcess, ModuleProcessSpawner, SpawnOutcome};
