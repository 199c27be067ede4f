//! Test-load validation
//!
//! Runs a module's entry point once in the sandbox and turns the outcome
//! into a [`ValidationResult`]. Errors are captured, never propagated.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::module::sandbox::{ExecutionMode, ExecutionRequest, Sandbox};
use crate::module::traits::{ModuleDescriptor, ValidationResult};

/// Test-loads modules before they are enabled
#[derive(Clone)]
pub struct ModuleValidator {
    sandbox: Arc<dyn Sandbox>,
}

impl ModuleValidator {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    /// Execute the entry point once and report the first captured error
    pub async fn validate(
        &self,
        descriptor: &ModuleDescriptor,
        config: &HashMap<String, String>,
    ) -> ValidationResult {
        debug!(
            "Test-loading module {} from {:?}",
            descriptor.identifier, descriptor.entry_point
        );

        let request =
            ExecutionRequest::new(descriptor, ExecutionMode::Validate).with_config(config.clone());

        match self.sandbox.execute(&request).await {
            Ok(()) => {
                info!("Module {} passed test-load", descriptor.identifier);
                ValidationResult::Passed
            }
            Err(e) => {
                info!(
                    "Module {} failed test-load: {}",
                    descriptor.identifier, e
                );
                ValidationResult::Failed(e.to_string())
            }
        }
    }
}
