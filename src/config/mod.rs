//! Configuration management for module-gate
//!
//! Handles configuration loading (JSON or TOML) and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

/// Module discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Directory scanned for module entry points
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// Directory for per-module data (passed to modules as MODULE_DATA_DIR)
    #[serde(default = "default_modules_data_dir")]
    pub data_dir: String,

    /// Namespace tag prefixed to every module identifier
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// File extensions recognised as module sources (without the dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Maximum directory depth scanned below `modules_dir`
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Module-specific configuration, keyed by module identifier
    #[serde(default)]
    pub module_configs: HashMap<String, HashMap<String, String>>,
}

fn default_true() -> bool {
    true
}

fn default_modules_dir() -> String {
    "modules".to_string()
}

fn default_modules_data_dir() -> String {
    "data/modules".to_string()
}

fn default_namespace() -> String {
    "gate".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["sh".to_string(), "py".to_string(), "mod".to_string()]
}

fn default_max_depth() -> usize {
    4
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            modules_dir: default_modules_dir(),
            data_dir: default_modules_data_dir(),
            namespace: default_namespace(),
            extensions: default_extensions(),
            max_depth: default_max_depth(),
            module_configs: HashMap::new(),
        }
    }
}

/// Sandbox and process limits applied when executing module entry points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSandboxConfig {
    /// Deadline for a test-load (seconds)
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,

    /// How long a real load waits for an early failure (milliseconds)
    #[serde(default = "default_startup_grace")]
    pub startup_grace_millis: u64,

    /// Poll interval of the crash monitor (milliseconds)
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_millis: u64,

    /// Treat any stderr output during a test-load as a failure
    #[serde(default = "default_true")]
    pub stderr_is_error: bool,

    /// Interpreter per file extension; other files are executed directly
    #[serde(default = "default_interpreters")]
    pub interpreters: HashMap<String, String>,

    /// Address space limit (bytes)
    #[serde(default = "default_max_memory")]
    pub max_memory_bytes: Option<u64>,

    /// Open file descriptor limit
    #[serde(default = "default_max_fds")]
    pub max_file_descriptors: Option<u64>,

    /// CPU time limit (seconds)
    #[serde(default)]
    pub max_cpu_seconds: Option<u64>,

    /// Process count limit (per user, as enforced by RLIMIT_NPROC)
    #[serde(default)]
    pub max_child_processes: Option<u64>,
}

fn default_validation_timeout() -> u64 {
    30
}

fn default_startup_grace() -> u64 {
    500
}

fn default_monitor_interval() -> u64 {
    1000
}

fn default_interpreters() -> HashMap<String, String> {
    let mut interpreters = HashMap::new();
    interpreters.insert("sh".to_string(), "/bin/sh".to_string());
    interpreters.insert("py".to_string(), "python3".to_string());
    interpreters
}

fn default_max_memory() -> Option<u64> {
    Some(512 * 1024 * 1024) // 512 MB
}

fn default_max_fds() -> Option<u64> {
    Some(256)
}

impl Default for ModuleSandboxConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: default_validation_timeout(),
            startup_grace_millis: default_startup_grace(),
            monitor_interval_millis: default_monitor_interval(),
            stderr_is_error: true,
            interpreters: default_interpreters(),
            max_memory_bytes: default_max_memory(),
            max_file_descriptors: default_max_fds(),
            max_cpu_seconds: None,
            max_child_processes: None,
        }
    }
}

/// Database backend configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackendConfig {
    /// Use sled database
    Sled,
    /// Use redb database (default, recommended)
    Redb,
    /// Keep state in memory only (lost on exit)
    Memory,
    /// Auto-select based on availability
    Auto,
}

fn default_database_backend() -> DatabaseBackendConfig {
    DatabaseBackendConfig::Auto
}

fn default_storage_path() -> String {
    "data".to_string()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database backend selection
    #[serde(default = "default_database_backend")]
    pub database_backend: DatabaseBackendConfig,

    /// Storage path
    #[serde(default = "default_storage_path")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_backend: DatabaseBackendConfig::Auto,
            data_dir: default_storage_path(),
        }
    }
}

/// Role held by an admin user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    /// Full access, including module toggles
    Administrator,
    /// Authenticated but without module management rights
    Viewer,
}

/// Admin user entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminUserConfig {
    /// User name (bound into anti-forgery tokens)
    pub name: String,
    /// Bearer token presented in the Authorization header
    pub token: String,
    #[serde(default = "default_role")]
    pub role: AdminRole,
}

fn default_role() -> AdminRole {
    AdminRole::Administrator
}

/// Admin HTTP surface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Listen address for the settings page and action endpoint
    #[serde(default = "default_admin_addr")]
    pub listen_addr: SocketAddr,

    /// Users allowed to authenticate
    #[serde(default)]
    pub users: Vec<AdminUserConfig>,

    /// Secret for anti-forgery tokens (random per process if unset)
    #[serde(default)]
    pub nonce_secret: Option<String>,

    /// Anti-forgery token lifetime (seconds)
    #[serde(default = "default_nonce_lifetime")]
    pub nonce_lifetime_secs: u64,
}

fn default_admin_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

fn default_nonce_lifetime() -> u64 {
    86_400 // 24 hours
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_addr(),
            users: Vec::new(),
            nonce_secret: None,
            nonce_lifetime_secs: default_nonce_lifetime(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "module_gate=debug"); RUST_LOG takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json: bool,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub modules: ModuleConfig,

    #[serde(default)]
    pub sandbox: ModuleSandboxConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Admin HTTP surface (disabled when absent)
    #[serde(default)]
    pub admin: Option<AdminConfig>,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl GateConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GateConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: GateConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the format from the file extension
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path)?,
            _ => Self::from_json_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.modules.validate()?;
        self.sandbox.validate()?;
        if let Some(ref admin) = self.admin {
            admin.validate()?;
        }
        Ok(())
    }
}

impl ModuleConfig {
    /// Validate module configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.namespace.is_empty() {
            return Err(anyhow::anyhow!("modules.namespace cannot be empty"));
        }
        if !self
            .namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(anyhow::anyhow!(
                "modules.namespace must contain only lowercase letters, digits and underscores: {}",
                self.namespace
            ));
        }
        if self.extensions.is_empty() {
            return Err(anyhow::anyhow!("modules.extensions cannot be empty"));
        }
        if let Some(ext) = self
            .extensions
            .iter()
            .find(|e| e.is_empty() || e.starts_with('.'))
        {
            return Err(anyhow::anyhow!(
                "Invalid module extension {:?} (use \"sh\", not \".sh\")",
                ext
            ));
        }
        if self.max_depth == 0 {
            return Err(anyhow::anyhow!("modules.max_depth must be greater than 0"));
        }
        Ok(())
    }
}

impl ModuleSandboxConfig {
    /// Validate sandbox configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.validation_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "sandbox.validation_timeout_secs must be greater than 0"
            ));
        }
        if self.monitor_interval_millis == 0 {
            return Err(anyhow::anyhow!(
                "sandbox.monitor_interval_millis must be greater than 0"
            ));
        }
        if let Some((ext, _)) = self.interpreters.iter().find(|(_, prog)| prog.is_empty()) {
            return Err(anyhow::anyhow!(
                "Interpreter for extension {:?} cannot be empty",
                ext
            ));
        }
        Ok(())
    }
}

impl AdminConfig {
    /// Validate admin configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for user in &self.users {
            if user.name.is_empty() {
                return Err(anyhow::anyhow!("Admin user name cannot be empty"));
            }
            if user.token.len() < 16 {
                return Err(anyhow::anyhow!(
                    "Admin token for user {} is too short (minimum 16 characters)",
                    user.name
                ));
            }
            if !seen.insert(user.token.as_str()) {
                return Err(anyhow::anyhow!(
                    "Duplicate admin token configured for user {}",
                    user.name
                ));
            }
        }
        if self.nonce_lifetime_secs < 2 {
            return Err(anyhow::anyhow!(
                "admin.nonce_lifetime_secs must be at least 2"
            ));
        }
        Ok(())
    }
}
