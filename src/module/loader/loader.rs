//! Module loader implementation
//!
//! Loads every enabled module at bootstrap. Each load runs inside an error
//! boundary: a module that fails is switched off in the registry and the
//! remaining modules keep loading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::module::manager::ModuleManager;
use crate::module::registry::{ModuleCatalog, ModuleRegistry};
use crate::module::traits::{ModuleDescriptor, ModuleError, ModuleState};

/// Module that failed to load and was switched off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub identifier: String,
    pub display_name: String,
    pub error: String,
}

/// Outcome of a bootstrap pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Identifiers loaded, in discovery order
    pub loaded: Vec<String>,
    /// Modules that were auto-deactivated
    pub failures: Vec<LoadFailure>,
}

/// Module loader for loading and initializing modules
pub struct ModuleLoader;

impl ModuleLoader {
    /// Load every module whose registry state is `on`, in catalog order
    pub async fn load_enabled_modules(
        manager: &mut ModuleManager,
        catalog: &ModuleCatalog,
    ) -> Result<BootstrapReport, ModuleError> {
        let mut report = BootstrapReport::default();

        for descriptor in catalog.iter() {
            if !manager.registry().get_state(&descriptor.identifier)?.is_on() {
                debug!("Module {} is off, not loading", descriptor.identifier);
                continue;
            }

            match manager.load_module(descriptor).await {
                Ok(_) => report.loaded.push(descriptor.identifier.clone()),
                Err(e) => {
                    Self::auto_deactivate(manager.registry(), descriptor, &e)?;
                    report.failures.push(LoadFailure {
                        identifier: descriptor.identifier.clone(),
                        display_name: descriptor.display_name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Bootstrap loaded {} modules, deactivated {}",
            report.loaded.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Switch a failed module off and log it once
    ///
    /// Uses compare-and-set so a concurrent re-enable is not overwritten.
    /// Returns whether this call changed the stored state.
    pub fn auto_deactivate(
        registry: &ModuleRegistry,
        descriptor: &ModuleDescriptor,
        failure: &ModuleError,
    ) -> Result<bool, ModuleError> {
        let deactivated =
            registry.compare_and_set(&descriptor.identifier, ModuleState::On, ModuleState::Off)?;
        error!(
            "Module \"{}\" ({}) failed to load and {}: {}",
            descriptor.display_name,
            descriptor.identifier,
            if deactivated {
                "was deactivated"
            } else {
                "was already off"
            },
            failure
        );
        Ok(deactivated)
    }

    /// Configuration file read for a module: its entry point with a `.toml` extension
    pub fn module_config_path(descriptor: &ModuleDescriptor) -> PathBuf {
        descriptor.entry_point.with_extension("toml")
    }

    /// Load module configuration from file
    ///
    /// Accepts TOML (nested tables become dotted keys) or plain `key=value`
    /// lines. A missing file is an empty configuration.
    pub fn load_module_config<P: AsRef<Path>>(
        module_id: &str,
        config_path: P,
    ) -> Result<HashMap<String, String>, ModuleError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            debug!("No config file for module {}, using defaults", module_id);
            return Ok(HashMap::new());
        }

        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            ModuleError::Config(format!("Failed to read config file {:?}: {}", config_path, e))
        })?;

        let mut config = HashMap::new();
        if let Ok(table) = toml::from_str::<toml::Table>(&contents) {
            for (key, value) in &table {
                Self::flatten_toml_value(key.clone(), value, &mut config);
            }
            return Ok(config);
        }

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Ok(config)
    }

    fn flatten_toml_value(prefix: String, value: &toml::Value, result: &mut HashMap<String, String>) {
        use toml::Value;

        match value {
            Value::String(s) => {
                result.insert(prefix, s.clone());
            }
            Value::Array(arr) => {
                let values: Vec<String> = arr
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                result.insert(prefix, values.join(","));
            }
            Value::Table(table) => {
                for (key, val) in table {
                    Self::flatten_toml_value(format!("{}.{}", prefix, key), val, result);
                }
            }
            other => {
                result.insert(prefix, other.to_string());
            }
        }
    }
}
