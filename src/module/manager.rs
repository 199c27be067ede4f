//! Module manager for orchestrating all modules
//!
//! Ties discovery, the registry, the validator and the process spawner
//! together: toggles with test-load gating, bootstrap loading, runtime
//! unloading and crash handling.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::config::GateConfig;
use crate::module::loader::{BootstrapReport, ModuleLoader};
use crate::module::process::{
    ModuleHealth, ModuleProcess, ModuleProcessMonitor, ModuleProcessSpawner, SpawnOutcome,
};
use crate::module::registry::{
    IdentifierCollision, ModuleCatalog, ModuleDiscovery, ModuleRegistry,
};
use crate::module::sandbox::{ExecutionMode, ExecutionRequest, ProcessSandbox, SandboxConfig};
use crate::module::traits::{
    ModuleDescriptor, ModuleError, ModuleState, RuntimeStatus, ValidationResult,
};
use crate::module::validation::ModuleValidator;

/// Result of a toggle request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Module passed its test-load, was switched on and loaded
    Enabled,
    /// Module was switched off
    Disabled,
    /// Module stays off; carries the captured error
    Rejected(String),
}

/// Discovered module with its stored and runtime state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStatus {
    pub descriptor: ModuleDescriptor,
    pub state: ModuleState,
    /// `None` when the module is not loaded in this process
    pub runtime: Option<RuntimeStatus>,
}

/// Scan result shown to operators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleListing {
    pub modules: Vec<ModuleStatus>,
    /// Modules hidden because another module owns their identifier
    pub collisions: Vec<IdentifierCollision>,
}

/// Module manager coordinates all loaded modules
pub struct ModuleManager {
    discovery: ModuleDiscovery,
    registry: ModuleRegistry,
    validator: ModuleValidator,
    spawner: ModuleProcessSpawner,
    /// Configuration from the host config, keyed by module identifier
    module_configs: HashMap<String, HashMap<String, String>>,
    monitor_interval: Duration,
    /// Loaded modules (identifier -> module)
    modules: Arc<Mutex<HashMap<String, ManagedModule>>>,
    /// Crash notification receiver (taken by the crash handler)
    crash_rx: Option<mpsc::UnboundedReceiver<(String, ModuleError)>>,
    crash_tx: mpsc::UnboundedSender<(String, ModuleError)>,
    crash_handler: Option<JoinHandle<()>>,
}

/// Managed module instance
struct ManagedModule {
    descriptor: ModuleDescriptor,
    status: RuntimeStatus,
    /// Module process (shared with monitor via Arc<Mutex<>>)
    process: Option<Arc<Mutex<ModuleProcess>>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl ModuleManager {
    /// Create a manager that test-loads and loads through the same sandbox
    pub fn new(
        discovery: ModuleDiscovery,
        registry: ModuleRegistry,
        sandbox: Arc<ProcessSandbox>,
    ) -> Self {
        let (crash_tx, crash_rx) = mpsc::unbounded_channel();

        Self {
            discovery,
            registry,
            validator: ModuleValidator::new(sandbox.clone()),
            spawner: ModuleProcessSpawner::new(sandbox),
            module_configs: HashMap::new(),
            monitor_interval: Duration::from_secs(1),
            modules: Arc::new(Mutex::new(HashMap::new())),
            crash_rx: Some(crash_rx),
            crash_tx,
            crash_handler: None,
        }
    }

    /// Create a manager from host configuration
    pub fn from_config(config: &GateConfig, registry: ModuleRegistry) -> Self {
        let sandbox_config = SandboxConfig::from_gate_config(&config.modules, &config.sandbox);

        Self::new(
            ModuleDiscovery::from_config(&config.modules),
            registry,
            Arc::new(ProcessSandbox::new(sandbox_config)),
        )
        .with_module_configs(config.modules.module_configs.clone())
        .with_monitor_interval(Duration::from_millis(config.sandbox.monitor_interval_millis))
        .with_startup_grace(Duration::from_millis(config.sandbox.startup_grace_millis))
    }

    /// Replace the validator (tests inject fake sandboxes here)
    pub fn with_validator(mut self, validator: ModuleValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_module_configs(
        mut self,
        module_configs: HashMap<String, HashMap<String, String>>,
    ) -> Self {
        self.module_configs = module_configs;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_startup_grace(mut self, startup_grace: Duration) -> Self {
        self.spawner = self.spawner.with_startup_grace(startup_grace);
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn discovery(&self) -> &ModuleDiscovery {
        &self.discovery
    }

    /// Start the crash handler
    ///
    /// Must run inside a tokio runtime. Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some(mut crash_rx) = self.crash_rx.take() else {
            return;
        };
        info!("Starting module manager");

        let modules = Arc::clone(&self.modules);
        let registry = self.registry.clone();
        self.crash_handler = Some(tokio::spawn(async move {
            while let Some((module_id, failure)) = crash_rx.recv().await {
                let managed = modules.lock().await.remove(&module_id);
                let Some(managed) = managed else {
                    // Already unloaded
                    continue;
                };
                if let Err(e) =
                    ModuleLoader::auto_deactivate(&registry, &managed.descriptor, &failure)
                {
                    error!("Failed to deactivate crashed module {}: {}", module_id, e);
                }
            }
        }));
    }

    /// Scan the modules directory into a catalog
    pub fn catalog(&self) -> ModuleCatalog {
        ModuleCatalog::build(self.discovery.scan())
    }

    /// Scan and register every newly discovered module as off
    pub fn rescan(&self) -> Result<ModuleCatalog, ModuleError> {
        let catalog = self.catalog();
        let mut created = 0;
        for descriptor in catalog.iter() {
            if self.registry.ensure_default(&descriptor.identifier)? {
                created += 1;
            }
        }
        info!(
            "Module scan found {} modules ({} new)",
            catalog.len(),
            created
        );
        Ok(catalog)
    }

    /// Discover modules, register defaults and load every enabled module
    pub async fn bootstrap(&mut self) -> Result<BootstrapReport, ModuleError> {
        self.start();
        let catalog = self.rescan()?;
        ModuleLoader::load_enabled_modules(self, &catalog).await
    }

    /// List discovered modules with their states
    pub async fn list_modules(&self) -> Result<ModuleListing, ModuleError> {
        let catalog = self.rescan()?;
        let mut modules = Vec::with_capacity(catalog.len());
        for descriptor in catalog.iter() {
            modules.push(ModuleStatus {
                state: self.registry.get_state(&descriptor.identifier)?,
                runtime: self.runtime_status(&descriptor.identifier).await,
                descriptor: descriptor.clone(),
            });
        }
        Ok(ModuleListing {
            modules,
            collisions: catalog.collisions().to_vec(),
        })
    }

    /// Look up a module in a fresh scan
    pub fn find_module(&self, module_id: &str) -> Result<ModuleDescriptor, ModuleError> {
        self.catalog()
            .get(module_id)
            .cloned()
            .ok_or_else(|| ModuleError::ModuleNotFound(module_id.to_string()))
    }

    /// Configuration passed to a module: its sidecar file overlaid with host config
    pub fn module_config(&self, descriptor: &ModuleDescriptor) -> HashMap<String, String> {
        let path = ModuleLoader::module_config_path(descriptor);
        let mut config = ModuleLoader::load_module_config(&descriptor.identifier, &path)
            .unwrap_or_else(|e| {
                warn!("Ignoring config for {}: {}", descriptor.identifier, e);
                HashMap::new()
            });
        if let Some(overrides) = self.module_configs.get(&descriptor.identifier) {
            config.extend(overrides.clone());
        }
        config
    }

    /// Test-load a module without changing its state
    pub async fn validate_module(&self, module_id: &str) -> Result<ValidationResult, ModuleError> {
        let descriptor = self.find_module(module_id)?;
        let config = self.module_config(&descriptor);
        Ok(self.validator.validate(&descriptor, &config).await)
    }

    /// Switch a module on or off
    ///
    /// Switching on test-loads first and leaves the registry untouched on
    /// failure. Switching off never test-loads.
    pub async fn toggle(
        &mut self,
        module_id: &str,
        desired: ModuleState,
    ) -> Result<ToggleOutcome, ModuleError> {
        let descriptor = self.find_module(module_id)?;

        match desired {
            ModuleState::Off => {
                self.registry.set_state(module_id, ModuleState::Off)?;
                match self.unload_module(module_id).await {
                    Ok(()) | Err(ModuleError::ModuleNotFound(_)) => {}
                    Err(e) => warn!("Failed to stop module {}: {}", module_id, e),
                }
                info!("Module {} disabled", module_id);
                Ok(ToggleOutcome::Disabled)
            }
            ModuleState::On => {
                let config = self.module_config(&descriptor);
                if let ValidationResult::Failed(message) =
                    self.validator.validate(&descriptor, &config).await
                {
                    return Ok(ToggleOutcome::Rejected(message));
                }

                self.registry.set_state(module_id, ModuleState::On)?;
                self.start();
                match self.load_module(&descriptor).await {
                    Ok(_) => {
                        info!("Module {} enabled", module_id);
                        Ok(ToggleOutcome::Enabled)
                    }
                    Err(e) => {
                        ModuleLoader::auto_deactivate(&self.registry, &descriptor, &e)?;
                        Ok(ToggleOutcome::Rejected(e.to_string()))
                    }
                }
            }
        }
    }

    pub async fn enable_module(&mut self, module_id: &str) -> Result<ToggleOutcome, ModuleError> {
        self.toggle(module_id, ModuleState::On).await
    }

    pub async fn disable_module(&mut self, module_id: &str) -> Result<ToggleOutcome, ModuleError> {
        self.toggle(module_id, ModuleState::Off).await
    }

    /// Load a module into the running host
    ///
    /// Loading a module that is already loaded is a no-op.
    pub async fn load_module(
        &mut self,
        descriptor: &ModuleDescriptor,
    ) -> Result<RuntimeStatus, ModuleError> {
        let module_id = descriptor.identifier.clone();
        if let Some(existing) = self.modules.lock().await.get(&module_id) {
            return Ok(existing.status.clone());
        }

        info!("Loading module: {}", module_id);
        let request = ExecutionRequest::new(descriptor, ExecutionMode::Run)
            .with_config(self.module_config(descriptor));

        let managed = match self.spawner.spawn(&request).await? {
            SpawnOutcome::Completed => ManagedModule {
                descriptor: descriptor.clone(),
                status: RuntimeStatus::Completed,
                process: None,
                monitor_handle: None,
            },
            SpawnOutcome::Running(process) => {
                let shared_process = Arc::new(Mutex::new(process));
                let monitor = ModuleProcessMonitor::new(self.crash_tx.clone())
                    .with_interval(self.monitor_interval);
                let monitored_id = module_id.clone();
                let monitored_process = Arc::clone(&shared_process);
                let monitor_handle = tokio::spawn(async move {
                    if let Err(e) = monitor
                        .monitor_module_shared(monitored_id.clone(), monitored_process)
                        .await
                    {
                        warn!("Module {} monitor error: {}", monitored_id, e);
                    }
                });
                ManagedModule {
                    descriptor: descriptor.clone(),
                    status: RuntimeStatus::Running,
                    process: Some(shared_process),
                    monitor_handle: Some(monitor_handle),
                }
            }
        };

        let status = managed.status.clone();
        self.modules.lock().await.insert(module_id.clone(), managed);
        info!("Module {} loaded ({:?})", module_id, status);
        Ok(status)
    }

    /// Unload a module (stop and remove)
    pub async fn unload_module(&mut self, module_id: &str) -> Result<(), ModuleError> {
        let managed = self.modules.lock().await.remove(module_id);
        let Some(mut managed) = managed else {
            return Err(ModuleError::ModuleNotFound(module_id.to_string()));
        };
        info!("Unloading module: {}", module_id);

        // Stop monitoring first so the kill is not reported as a crash
        if let Some(handle) = managed.monitor_handle.take() {
            handle.abort();
        }
        if let Some(shared_process) = managed.process.take() {
            let mut process = shared_process.lock().await;
            if process.is_running() {
                process.kill().await?;
            }
        }

        info!("Module {} unloaded", module_id);
        Ok(())
    }

    /// Identifiers of loaded modules
    pub async fn loaded_modules(&self) -> Vec<String> {
        let modules = self.modules.lock().await;
        let mut ids: Vec<String> = modules.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Runtime status of a loaded module
    pub async fn runtime_status(&self, module_id: &str) -> Option<RuntimeStatus> {
        let process = {
            let modules = self.modules.lock().await;
            let managed = modules.get(module_id)?;
            match managed.process {
                Some(ref process) => Arc::clone(process),
                None => return Some(managed.status.clone()),
            }
        };
        let mut process = process.lock().await;
        match ModuleProcessMonitor::check_health(&mut process) {
            ModuleHealth::Running => Some(RuntimeStatus::Running),
            // Crashes are removed by the crash handler shortly
            ModuleHealth::Exited | ModuleHealth::Crashed(_) => Some(RuntimeStatus::Completed),
        }
    }

    /// Stop all modules and shutdown manager
    pub async fn shutdown(&mut self) -> Result<(), ModuleError> {
        info!("Shutting down module manager");

        let module_ids = self.loaded_modules().await;
        for module_id in module_ids {
            if let Err(e) = self.unload_module(&module_id).await {
                warn!("Error unloading module {}: {}", module_id, e);
            }
        }

        if let Some(handle) = self.crash_handler.take() {
            handle.abort();
        }

        info!("Module manager shut down");
        Ok(())
    }
}
