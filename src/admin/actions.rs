//! Admin actions
//!
//! `POST /admin/action` bodies are parsed into [`ActionRequest`] and
//! dispatched on the [`AdminAction`] variant. The anti-forgery token is
//! checked before the registry is touched.

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::admin::auth::AdminUser;
use crate::admin::nonce::NonceManager;
use crate::admin::types::{ActionResponse, AdminError};
use crate::module::traits::ModuleState;
use crate::module::{ModuleManager, ToggleOutcome};

/// Action invoked from the settings page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// Switch a module on (after a test-load) or off
    ToggleModule {
        module_id: String,
        status: ModuleState,
    },
    /// Register modules that appeared since the last scan
    RescanModules,
}

impl AdminAction {
    /// Action name bound into the anti-forgery token
    pub fn name(&self) -> &'static str {
        match self {
            AdminAction::ToggleModule { .. } => "toggle_module",
            AdminAction::RescanModules => "rescan_modules",
        }
    }
}

/// Body of `POST /admin/action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub nonce: String,
    #[serde(flatten)]
    pub action: AdminAction,
}

impl ActionRequest {
    pub fn parse(body: &[u8]) -> Result<Self, AdminError> {
        if body.is_empty() {
            return Err(AdminError::BadRequest("empty request body".to_string()));
        }
        serde_json::from_slice(body).map_err(|e| AdminError::BadRequest(e.to_string()))
    }
}

/// Execute an action for an authorized user
pub async fn dispatch(
    manager: &Mutex<ModuleManager>,
    nonces: &NonceManager,
    user: &AdminUser,
    request: ActionRequest,
) -> Result<ActionResponse, AdminError> {
    let ActionRequest { nonce, action } = request;

    if !nonces.verify(&nonce, action.name(), &user.name) {
        warn!("Rejected {} from {}: bad security token", action.name(), user.name);
        return Err(AdminError::InvalidNonce);
    }

    match action {
        AdminAction::ToggleModule { module_id, status } => {
            let mut manager = manager.lock().await;
            let outcome = manager.toggle(&module_id, status).await?;
            info!("{} toggled {} {}: {:?}", user.name, module_id, status, outcome);
            Ok(match outcome {
                ToggleOutcome::Enabled => ActionResponse::ok("Module enabled"),
                ToggleOutcome::Disabled => ActionResponse::ok("Module disabled"),
                ToggleOutcome::Rejected(error) => ActionResponse::failed(error),
            })
        }
        AdminAction::RescanModules => {
            let catalog = manager.lock().await.rescan()?;
            Ok(ActionResponse::ok(format!(
                "Found {} modules",
                catalog.len()
            )))
        }
    }
}
