//! Module system core types
//!
//! Defines the descriptor, state and error types shared by discovery, the
//! registry, the validator and the loader.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Persisted enable/disable state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Module is enabled and loaded on bootstrap
    On,
    /// Module is disabled (the default for newly discovered modules)
    Off,
}

impl ModuleState {
    /// Literal value stored in the key-value store
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::On => "on",
            ModuleState::Off => "off",
        }
    }

    /// Stored byte representation
    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Decode a stored value
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"on" => Some(ModuleState::On),
            b"off" => Some(ModuleState::Off),
            _ => None,
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, ModuleState::On)
    }
}

impl Default for ModuleState {
    fn default() -> Self {
        ModuleState::Off
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleState {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(ModuleState::On),
            "off" => Ok(ModuleState::Off),
            other => Err(ModuleError::OperationError(format!(
                "Invalid module state: {} (expected \"on\" or \"off\")",
                other
            ))),
        }
    }
}

/// Runtime status of a module that has been loaded into the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    /// Module process is still running
    Running,
    /// Module ran to completion during load (one-shot registration)
    Completed,
}

/// Module descriptor produced by discovery
///
/// Rebuilt on every scan. Only `identifier` is persisted (as a registry key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Stable identifier derived from the display name
    pub identifier: String,
    /// Human-readable name from the `Name:` header field
    pub display_name: String,
    /// Optional description from the `Description:` header field
    pub description: Option<String>,
    /// Optional version from the `Version:` header field
    pub version: Option<String>,
    /// Optional author from the `Author:` header field
    pub author: Option<String>,
    /// File executed to activate the module
    pub entry_point: PathBuf,
}

impl ModuleDescriptor {
    /// Directory containing the entry point
    pub fn source_dir(&self) -> Option<&std::path::Path> {
        self.entry_point.parent()
    }
}

/// Result of a test-load attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    /// Entry point ran cleanly
    Passed,
    /// Entry point failed; carries the first captured error
    Failed(String),
}

impl ValidationResult {
    pub fn success(&self) -> bool {
        matches!(self, ValidationResult::Passed)
    }

    /// Error message, present iff validation failed
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ValidationResult::Passed => None,
            ValidationResult::Failed(msg) => Some(msg.as_str()),
        }
    }
}

/// Module system errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Invalid module header: {0}")]
    InvalidHeader(String),

    #[error("Module initialization failed: {0}")]
    InitializationError(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("Module crashed: {0}")]
    ModuleCrashed(String),

    #[error("Registry storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out")]
    Timeout,
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::Storage(e.to_string())
    }
}
