//! Test utilities for module system testing

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::time::{sleep, Duration, Instant};

use module_gate::config::ModuleSandboxConfig;
use module_gate::module::registry::ModuleDiscovery;
use module_gate::module::sandbox::{ProcessSandbox, SandboxConfig};
use module_gate::module::{ModuleManager, ModuleRegistry};

/// Script that passes its test-load and exits cleanly when loaded
pub const CLEAN: &str = "exit 0\n";

/// Script that fails its test-load with a recognizable error
pub const BROKEN: &str = "echo 'Fatal: call to undefined function boot()' >&2\nexit 255\n";

/// Script that passes its test-load but fails when really loaded
pub const FAILS_ON_LOAD: &str = "if [ \"$MODULE_MODE\" = run ]; then\n  \
    echo 'Fatal: database table missing' >&2\n  exit 1\nfi\nexit 0\n";

/// Script that keeps running after load
pub const LONG_RUNNING: &str = "if [ \"$MODULE_MODE\" = run ]; then\n  \
    exec sleep 30\nfi\nexit 0\n";

/// Script that runs past the startup grace and then crashes
pub const CRASHES_LATER: &str = "if [ \"$MODULE_MODE\" = run ]; then\n  \
    sleep 1\n  echo 'Fatal: lost connection' >&2\n  exit 2\nfi\nexit 0\n";

/// Script that records every execution in its data directory
pub const RECORDS_RUNS: &str = "echo \"$MODULE_MODE\" >> \"$MODULE_DATA_DIR/runs\"\nexit 0\n";

/// Isolated modules and data directories with an in-memory registry
pub struct ModuleTestFixture {
    pub temp_dir: TempDir,
    pub modules_dir: PathBuf,
    pub data_dir: PathBuf,
    pub registry: ModuleRegistry,
}

impl ModuleTestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let modules_dir = temp_dir.path().join("modules");
        let data_dir = temp_dir.path().join("data");
        std::fs::create_dir_all(&modules_dir).unwrap();

        Self {
            temp_dir,
            modules_dir,
            data_dir,
            registry: ModuleRegistry::in_memory().unwrap(),
        }
    }

    /// Fixture whose modules directory is a relative path that does not
    /// exist yet
    pub fn with_relative_modules_dir() -> Self {
        let cwd = std::env::current_dir().unwrap();
        let parent = cwd.join("target");
        std::fs::create_dir_all(&parent).unwrap();
        let temp_dir = tempfile::Builder::new()
            .prefix("late-modules-")
            .tempdir_in(&parent)
            .unwrap();
        let relative = temp_dir.path().strip_prefix(&cwd).unwrap().to_path_buf();
        let modules_dir = relative.join("modules");
        let data_dir = relative.join("data");

        Self {
            temp_dir,
            modules_dir,
            data_dir,
            registry: ModuleRegistry::in_memory().unwrap(),
        }
    }

    /// Write a module script with a `Name:` header
    pub fn write_module(&self, file: &str, name: &str, body: &str) -> PathBuf {
        let path = self.modules_dir.join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(
            &path,
            format!(
                "#!/bin/sh\n# Name: {}\n# Description: {} test module\n# Version: 1.0\n{}",
                name, name, body
            ),
        )
        .unwrap();
        path
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        let sandbox = ModuleSandboxConfig {
            validation_timeout_secs: 5,
            ..ModuleSandboxConfig::default()
        };
        SandboxConfig::from_config(&self.modules_dir, &self.data_dir, &sandbox)
    }

    /// Manager over the fixture directories with short timings
    pub fn manager(&self) -> ModuleManager {
        ModuleManager::new(
            ModuleDiscovery::new(&self.modules_dir, "gate"),
            self.registry.clone(),
            Arc::new(ProcessSandbox::new(self.sandbox_config())),
        )
        .with_startup_grace(Duration::from_millis(300))
        .with_monitor_interval(Duration::from_millis(50))
    }

    pub fn data_path(&self, module_id: &str) -> PathBuf {
        self.data_dir.join(module_id)
    }

    /// Lines recorded by a `RECORDS_RUNS` module
    pub fn recorded_runs(&self, module_id: &str) -> Vec<String> {
        read_lines(&self.data_path(module_id).join("runs"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Poll `check` until it holds or `limit` passes
pub async fn wait_until<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    check()
}

/// Tracing output captured at INFO and above
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Send this thread's log events to the buffer until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Captured lines mentioning `needle`
    pub fn lines_containing(&self, needle: &str) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
