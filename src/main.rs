//! module-gate command line
//!
//! Bootstraps enabled modules and serves the admin page, or performs
//! one-shot registry operations.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use module_gate::admin::{AdminServer, NonceManager};
use module_gate::config::GateConfig;
use module_gate::module::{ModuleManager, ModuleRegistry, ToggleOutcome, ValidationResult};
use module_gate::storage::Storage;
use module_gate::utils::{init_logging_from_config, wait_for_shutdown_signal};

#[derive(Parser, Debug)]
#[command(name = "module-gate")]
#[command(version, about = "Feature-module registry with safe activation")]
struct Args {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load enabled modules, serve the admin page and wait for a shutdown signal
    Serve,
    /// Load enabled modules once and report failures
    Bootstrap,
    /// List discovered modules and their states
    List,
    /// Test-load a module and switch it on if it passes
    Enable { module_id: String },
    /// Switch a module off
    Disable { module_id: String },
    /// Test-load a module without changing its state
    Validate { module_id: String },
    /// Print an anti-forgery token for an admin user
    Nonce {
        user: String,
        #[arg(default_value = "toggle_module")]
        action: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<GateConfig> {
    match path {
        Some(path) => GateConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => {
            let config = GateConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn open_manager(config: &GateConfig) -> Result<(Storage, ModuleManager)> {
    let storage = Storage::from_config(&config.storage)?;
    let registry = ModuleRegistry::new(storage.module_states()?);
    let manager = ModuleManager::from_config(config, registry);
    Ok((storage, manager))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging_from_config(config.logging.as_ref());

    match run(args.command, config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: GateConfig) -> Result<ExitCode> {
    if let Commands::Nonce { user, action } = &command {
        let admin = config
            .admin
            .as_ref()
            .ok_or_else(|| anyhow!("no [admin] section configured"))?;
        if admin.nonce_secret.is_none() {
            warn!("admin.nonce_secret is unset; this token will not match a running server");
        }
        println!("{}", NonceManager::from_config(admin).create(action, user));
        return Ok(ExitCode::SUCCESS);
    }

    let (storage, mut manager) = open_manager(&config)?;

    let code = match command {
        Commands::Serve => {
            serve(&config, manager).await?;
            ExitCode::SUCCESS
        }
        Commands::Bootstrap => {
            let report = manager.bootstrap().await?;
            for id in &report.loaded {
                println!("loaded   {}", id);
            }
            for failure in &report.failures {
                println!("disabled {}: {}", failure.identifier, failure.error);
            }
            manager.shutdown().await?;
            if report.failures.is_empty() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::List => {
            let listing = manager.list_modules().await?;
            for status in &listing.modules {
                let d = &status.descriptor;
                println!(
                    "{:<4} {:<32} {} {}",
                    status.state.as_str(),
                    d.identifier,
                    d.display_name,
                    d.version.as_deref().unwrap_or("")
                );
            }
            for c in &listing.collisions {
                println!(
                    "ignored {} ({}): identifier {} taken by {}",
                    c.display_name,
                    c.entry_point.display(),
                    c.identifier,
                    c.kept_entry_point.display()
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Enable { module_id } => {
            let outcome = manager.enable_module(&module_id).await?;
            // One-shot command: leave long-running modules to `serve`
            manager.shutdown().await?;
            report_toggle(&module_id, outcome)
        }
        Commands::Disable { module_id } => {
            let outcome = manager.disable_module(&module_id).await?;
            report_toggle(&module_id, outcome)
        }
        Commands::Validate { module_id } => match manager.validate_module(&module_id).await? {
            ValidationResult::Passed => {
                println!("{}: test-load passed", module_id);
                ExitCode::SUCCESS
            }
            ValidationResult::Failed(message) => {
                println!("{}: test-load failed: {}", module_id, message);
                ExitCode::FAILURE
            }
        },
        Commands::Nonce { .. } => ExitCode::SUCCESS,
    };

    storage.flush()?;
    Ok(code)
}

fn report_toggle(module_id: &str, outcome: ToggleOutcome) -> ExitCode {
    match outcome {
        ToggleOutcome::Enabled => {
            println!("{}: enabled", module_id);
            ExitCode::SUCCESS
        }
        ToggleOutcome::Disabled => {
            println!("{}: disabled", module_id);
            ExitCode::SUCCESS
        }
        ToggleOutcome::Rejected(message) => {
            println!("{}: not enabled: {}", module_id, message);
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: &GateConfig, mut manager: ModuleManager) -> Result<()> {
    let report = manager.bootstrap().await?;
    info!(
        "Bootstrap loaded {} modules, disabled {}",
        report.loaded.len(),
        report.failures.len()
    );

    let manager = Arc::new(Mutex::new(manager));

    match config.admin {
        Some(ref admin) => {
            let server = Arc::new(AdminServer::from_config(admin, Arc::clone(&manager)));
            tokio::select! {
                result = server.start() => {
                    if let Err(e) = result {
                        error!("Admin server stopped: {:#}", e);
                    }
                }
                _ = wait_for_shutdown_signal() => {}
            }
        }
        None => {
            info!("Admin server disabled (no [admin] section)");
            wait_for_shutdown_signal().await;
        }
    }

    manager.lock().await.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
