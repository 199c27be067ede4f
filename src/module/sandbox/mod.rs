//! Process sandboxing for module entry points
//!
//! Every execution of a module entry point (test-load or real load) goes
//! through a [`Sandbox`]. The production implementation runs the entry point
//! as a child process with resource limits and a deadline, and confines entry
//! points to the modules directory.

pub mod filesystem;
pub mod process;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::module::traits::ModuleDescriptor;

pub use filesystem::FileSystemSandbox;
pub use process::{ProcessSandbox, ResourceLimits, SandboxConfig};

/// Why an entry point is being executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Isolated test-load before enabling
    Validate,
    /// Real load into the running host
    Run,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Validate => "validate",
            ExecutionMode::Run => "run",
        }
    }
}

/// A single execution of a module entry point
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub module_id: String,
    pub display_name: String,
    pub entry_point: PathBuf,
    pub mode: ExecutionMode,
    /// Module-specific configuration, exported as `MODULE_CONFIG_<KEY>`
    pub config: HashMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(descriptor: &ModuleDescriptor, mode: ExecutionMode) -> Self {
        Self {
            module_id: descriptor.identifier.clone(),
            display_name: descriptor.display_name.clone(),
            entry_point: descriptor.entry_point.clone(),
            mode,
            config: HashMap::new(),
        }
    }

    pub fn with_config(mut self, config: HashMap<String, String>) -> Self {
        self.config = config;
        self
    }
}

/// Failure to execute an entry point cleanly
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("entry point not found: {}", .0.display())]
    EntryPointNotFound(PathBuf),

    #[error("entry point is not executable: {}", .0.display())]
    NotExecutable(PathBuf),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("failed to start entry point: {0}")]
    Spawn(String),

    #[error("validation timed out after {0:?}")]
    Timeout(Duration),

    /// Runtime error captured from the entry point
    #[error("{0}")]
    Failed(String),
}

/// Executes module entry points in isolation
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run the entry point to completion
    ///
    /// `Ok(())` only if it ran cleanly; the first captured error otherwise.
    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError>;
}
