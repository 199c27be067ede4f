//! Module process spawning and management
//!
//! Real loads run the entry point with `MODULE_MODE=run`. A load counts as
//! failed if the process cannot start or exits non-zero within the startup
//! grace window. A process that is still alive after the window is handed
//! back as a [`ModuleProcess`] for monitoring.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::module::sandbox::process::{describe_exit, kill_process_group};
use crate::module::sandbox::{ExecutionRequest, ProcessSandbox};
use crate::module::traits::ModuleError;

/// Time allowed for stderr to drain after an early exit
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Result of a successful real load
#[derive(Debug)]
pub enum SpawnOutcome {
    /// Entry point ran to completion with status 0
    Completed,
    /// Entry point is still running after the startup grace window
    Running(ModuleProcess),
}

/// Spawn and manage module processes
pub struct ModuleProcessSpawner {
    sandbox: Arc<ProcessSandbox>,
    startup_grace: Duration,
}

impl ModuleProcessSpawner {
    pub fn new(sandbox: Arc<ProcessSandbox>) -> Self {
        Self {
            sandbox,
            startup_grace: Duration::from_millis(500),
        }
    }

    pub fn with_startup_grace(mut self, startup_grace: Duration) -> Self {
        self.startup_grace = startup_grace;
        self
    }

    /// Load a module for real
    pub async fn spawn(&self, request: &ExecutionRequest) -> Result<SpawnOutcome, ModuleError> {
        info!("Spawning module process: {}", request.module_id);

        let mut command = self
            .sandbox
            .command(request)
            .map_err(|e| ModuleError::InitializationError(e.to_string()))?;
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            ModuleError::InitializationError(format!("failed to start entry point: {}", e))
        })?;
        let pid = child.id();

        let first_error = Arc::new(Mutex::new(None));
        let forwarder = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_stderr(
                request.module_id.clone(),
                stderr,
                Arc::clone(&first_error),
            ))
        });

        match timeout(self.startup_grace, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                info!("Module {} completed during load", request.module_id);
                Ok(SpawnOutcome::Completed)
            }
            Ok(Ok(status)) => {
                kill_process_group(pid, &mut child);
                if let Some(forwarder) = forwarder {
                    drain(forwarder).await;
                }
                let message = read_first_error(&first_error).unwrap_or_else(|| describe_exit(&status));
                Err(ModuleError::InitializationError(message))
            }
            Ok(Err(e)) => {
                kill_process_group(pid, &mut child);
                Err(ModuleError::InitializationError(format!(
                    "failed to wait for module process: {}",
                    e
                )))
            }
            Err(_) => {
                debug!(
                    "Module {} still running after {:?}",
                    request.module_id, self.startup_grace
                );
                Ok(SpawnOutcome::Running(ModuleProcess {
                    module_id: request.module_id.clone(),
                    process: child,
                    pid,
                    first_error,
                }))
            }
        }
    }
}

async fn forward_stderr(
    module_id: String,
    stderr: ChildStderr,
    first_error: Arc<Mutex<Option<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("Module {} stderr: {}", module_id, line);
        if let Ok(mut first) = first_error.lock() {
            if first.is_none() {
                *first = Some(line.to_string());
            }
        }
    }
}

async fn drain(forwarder: JoinHandle<()>) {
    let abort = forwarder.abort_handle();
    if timeout(STDERR_DRAIN_TIMEOUT, forwarder).await.is_err() {
        abort.abort();
    }
}

fn read_first_error(first_error: &Mutex<Option<String>>) -> Option<String> {
    first_error.lock().ok().and_then(|first| first.clone())
}

/// Running module process
#[derive(Debug)]
pub struct ModuleProcess {
    pub module_id: String,
    /// Child process handle
    pub process: Child,
    pid: Option<u32>,
    first_error: Arc<Mutex<Option<String>>>,
}

impl ModuleProcess {
    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Check if process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    /// Exit status if the process has exited
    pub fn try_exit_status(&mut self) -> Result<Option<ExitStatus>, ModuleError> {
        self.process
            .try_wait()
            .map_err(|e| ModuleError::OperationError(format!("Failed to poll process: {}", e)))
    }

    /// First line the module wrote to stderr
    pub fn last_error(&self) -> Option<String> {
        read_first_error(&self.first_error)
    }

    /// Wait for process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus, ModuleError> {
        self.process
            .wait()
            .await
            .map_err(|e| ModuleError::OperationError(format!("Failed to wait for process: {}", e)))
    }

    /// Kill the process and its process group
    pub async fn kill(&mut self) -> Result<(), ModuleError> {
        debug!("Killing module process: {}", self.module_id);
        kill_process_group(self.pid, &mut self.process);
        self.wait().await?;
        Ok(())
    }
}
