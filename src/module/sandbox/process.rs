//! Process-level sandboxing and resource limits
//!
//! Builds the child process for a module entry point: interpreter selection,
//! argument vector, environment, working directory and rlimits. The
//! [`Sandbox`] implementation runs a test-load to completion under a deadline.

#[cfg(all(unix, feature = "nix"))]
use nix::sys::resource::{getrlimit, setrlimit, Resource};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::config::{ModuleConfig, ModuleSandboxConfig};
use crate::module::sandbox::{ExecutionError, ExecutionRequest, FileSystemSandbox, Sandbox};

/// Captured stderr is truncated past this many bytes
const MAX_CAPTURED_STDERR: usize = 64 * 1024;

/// Grace period to drain stderr after the entry point exits
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Resource limits for a module process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Address space limit (bytes)
    pub max_memory_bytes: Option<u64>,
    /// Maximum number of open file descriptors
    pub max_file_descriptors: Option<u64>,
    /// CPU time limit (seconds)
    pub max_cpu_seconds: Option<u64>,
    /// Maximum number of processes for the user
    pub max_child_processes: Option<u64>,
}

impl From<&ModuleSandboxConfig> for ResourceLimits {
    fn from(config: &ModuleSandboxConfig) -> Self {
        Self {
            max_memory_bytes: config.max_memory_bytes,
            max_file_descriptors: config.max_file_descriptors,
            max_cpu_seconds: config.max_cpu_seconds,
            max_child_processes: config.max_child_processes,
        }
    }
}

impl ResourceLimits {
    /// Apply limits to the calling process
    ///
    /// Runs in the forked child before exec. Limits are clamped to the
    /// current hard limit since an unprivileged process cannot raise it.
    #[cfg(all(unix, feature = "nix"))]
    fn apply(&self) -> nix::Result<()> {
        let limits = [
            (Resource::RLIMIT_AS, self.max_memory_bytes),
            (Resource::RLIMIT_NOFILE, self.max_file_descriptors),
            (Resource::RLIMIT_CPU, self.max_cpu_seconds),
            (Resource::RLIMIT_NPROC, self.max_child_processes),
        ];
        for (resource, limit) in limits {
            if let Some(limit) = limit {
                let (_, hard) = getrlimit(resource)?;
                let value = (limit as nix::libc::rlim_t).min(hard);
                setrlimit(resource, value, value)?;
            }
        }
        Ok(())
    }
}

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Entry points must live under this directory
    pub modules_dir: PathBuf,
    /// Per-module data directories are created under this directory
    pub data_dir: PathBuf,
    /// Interpreter per file extension
    pub interpreters: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
    /// Deadline for a test-load
    pub validation_timeout: Duration,
    /// Fail a test-load that writes anything to stderr
    pub stderr_is_error: bool,
}

impl SandboxConfig {
    /// Default limits for the given directories
    pub fn new<P: AsRef<Path>>(modules_dir: P, data_dir: P) -> Self {
        Self::from_config(
            modules_dir.as_ref(),
            data_dir.as_ref(),
            &ModuleSandboxConfig::default(),
        )
    }

    pub fn from_config(modules_dir: &Path, data_dir: &Path, sandbox: &ModuleSandboxConfig) -> Self {
        Self {
            modules_dir: modules_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            interpreters: sandbox.interpreters.clone(),
            resource_limits: ResourceLimits::from(sandbox),
            validation_timeout: Duration::from_secs(sandbox.validation_timeout_secs),
            stderr_is_error: sandbox.stderr_is_error,
        }
    }

    /// Build from the `modules` and `sandbox` configuration sections
    pub fn from_gate_config(modules: &ModuleConfig, sandbox: &ModuleSandboxConfig) -> Self {
        Self::from_config(
            Path::new(&modules.modules_dir),
            Path::new(&modules.data_dir),
            sandbox,
        )
    }
}

/// Runs module entry points as confined child processes
pub struct ProcessSandbox {
    config: SandboxConfig,
    filesystem: FileSystemSandbox,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let filesystem = FileSystemSandbox::new(&config.modules_dir);
        Self { config, filesystem }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Prepare the child process for a request
    ///
    /// stdin is closed; stdout/stderr are left to the caller. The child gets
    /// its own process group so the whole tree can be killed.
    pub fn command(&self, request: &ExecutionRequest) -> Result<Command, ExecutionError> {
        if !request.entry_point.exists() {
            return Err(ExecutionError::EntryPointNotFound(
                request.entry_point.clone(),
            ));
        }
        let entry = self.filesystem.validate_path(&request.entry_point)?;

        let interpreter = request
            .entry_point
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.config.interpreters.get(ext));

        let mut command = match interpreter {
            Some(program) => {
                let mut command = Command::new(program);
                command.arg(&entry);
                command
            }
            None => {
                if !is_executable(&entry) {
                    return Err(ExecutionError::NotExecutable(request.entry_point.clone()));
                }
                Command::new(&entry)
            }
        };

        let module_data_dir = self.config.data_dir.join(&request.module_id);
        // Absolute, since the child runs from the entry point's directory
        let module_data_dir = std::fs::create_dir_all(&module_data_dir)
            .and_then(|()| module_data_dir.canonicalize())
            .map_err(|e| {
                ExecutionError::Spawn(format!(
                    "failed to create module data directory {:?}: {}",
                    module_data_dir, e
                ))
            })?;

        if let Some(dir) = entry.parent() {
            command.current_dir(dir);
        }
        command
            .arg("--module-id")
            .arg(&request.module_id)
            .arg("--mode")
            .arg(request.mode.as_str())
            .stdin(Stdio::null())
            .env("MODULE_ID", &request.module_id)
            .env("MODULE_NAME", &request.display_name)
            .env("MODULE_MODE", request.mode.as_str())
            .env("MODULE_DATA_DIR", &module_data_dir)
            .kill_on_drop(true);

        for (key, value) in &request.config {
            command.env(format!("MODULE_CONFIG_{}", key.to_uppercase()), value);
        }

        #[cfg(unix)]
        command.process_group(0);

        #[cfg(all(unix, feature = "nix"))]
        {
            let limits = self.config.resource_limits.clone();
            // SAFETY: the closure only issues getrlimit/setrlimit syscalls,
            // which are async-signal-safe.
            unsafe {
                command.pre_exec(move || limits.apply().map_err(std::io::Error::from));
            }
        }

        debug!(
            "Prepared {} execution of {} ({:?})",
            request.mode.as_str(),
            request.module_id,
            entry
        );
        Ok(command)
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(&self, request: &ExecutionRequest) -> Result<(), ExecutionError> {
        let mut command = self.command(request)?;
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;
        let pid = child.id();
        let capture = tokio::spawn(capture_stderr(child.stderr.take()));
        let capture_abort = capture.abort_handle();

        let status = match timeout(self.config.validation_timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                kill_process_group(pid, &mut child);
                capture_abort.abort();
                return Err(ExecutionError::Spawn(format!("failed to wait: {}", e)));
            }
            Err(_) => {
                warn!(
                    "Test-load of {} exceeded {:?}, killing it",
                    request.module_id, self.config.validation_timeout
                );
                kill_process_group(pid, &mut child);
                let _ = child.wait().await;
                capture_abort.abort();
                return Err(ExecutionError::Timeout(self.config.validation_timeout));
            }
        };

        // Leftover background processes would keep stderr open
        kill_process_group(pid, &mut child);
        let stderr = match timeout(STDERR_DRAIN_TIMEOUT, capture).await {
            Ok(Ok(text)) => text,
            _ => {
                capture_abort.abort();
                String::new()
            }
        };
        let first_error = first_error_line(&stderr);

        if !status.success() {
            return Err(ExecutionError::Failed(
                first_error.unwrap_or_else(|| describe_exit(&status)),
            ));
        }
        if self.config.stderr_is_error {
            if let Some(line) = first_error {
                return Err(ExecutionError::Failed(line));
            }
        }
        Ok(())
    }
}

async fn capture_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = MAX_CAPTURED_STDERR.saturating_sub(captured.len());
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// First non-empty line of captured error output
pub fn first_error_line(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Human-readable exit status for failures without error output
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with status {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    "terminated by signal".to_string()
}

/// Kill the child and everything in its process group
pub(crate) fn kill_process_group(pid: Option<u32>, child: &mut Child) {
    #[cfg(all(unix, feature = "nix"))]
    if let Some(pid) = pid {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        // ESRCH just means the group is already gone
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(all(unix, feature = "nix")))]
    let _ = pid;
    let _ = child.start_kill();
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
