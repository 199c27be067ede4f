//! Module process health monitoring
//!
//! Watches running modules and reports ones that exit with a failure status
//! on the crash channel.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::module::process::spawner::ModuleProcess;
use crate::module::sandbox::process::describe_exit;
use crate::module::traits::ModuleError;

/// Lets the stderr forwarder catch up after an exit
const STDERR_SETTLE: Duration = Duration::from_millis(50);

/// Module health monitor
pub struct ModuleProcessMonitor {
    /// Monitoring interval
    interval: Duration,
    /// Crash notification channel
    crash_tx: mpsc::UnboundedSender<(String, ModuleError)>,
}

/// Module health status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleHealth {
    /// Process is alive
    Running,
    /// Process exited with status 0
    Exited,
    /// Process exited with a failure status
    Crashed(String),
}

impl ModuleProcessMonitor {
    pub fn new(crash_tx: mpsc::UnboundedSender<(String, ModuleError)>) -> Self {
        Self {
            interval: Duration::from_secs(1),
            crash_tx,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Watch a shared module process until it exits
    pub async fn monitor_module_shared(
        &self,
        module_id: String,
        shared_process: Arc<tokio::sync::Mutex<ModuleProcess>>,
    ) -> Result<(), ModuleError> {
        info!("Starting health monitoring for module: {}", module_id);

        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;

            let health = {
                let mut process = shared_process.lock().await;
                Self::check_health(&mut process)
            };

            match health {
                ModuleHealth::Running => {
                    debug!("Module {} is running", module_id);
                }
                ModuleHealth::Exited => {
                    info!("Module {} exited normally", module_id);
                    return Ok(());
                }
                ModuleHealth::Crashed(status) => {
                    tokio::time::sleep(STDERR_SETTLE).await;
                    let message = shared_process.lock().await.last_error().unwrap_or(status);
                    debug!("Module {} exited abnormally: {}", module_id, message);
                    let _ = self
                        .crash_tx
                        .send((module_id.clone(), ModuleError::ModuleCrashed(message)));
                    return Ok(());
                }
            }
        }
    }

    /// Check module health without blocking
    pub fn check_health(process: &mut ModuleProcess) -> ModuleHealth {
        match process.try_exit_status() {
            Ok(None) => ModuleHealth::Running,
            Ok(Some(status)) if status.success() => ModuleHealth::Exited,
            Ok(Some(status)) => ModuleHealth::Crashed(describe_exit(&status)),
            Err(e) => ModuleHealth::Crashed(e.to_string()),
        }
    }
}
