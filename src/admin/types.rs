//! Admin API types
//!
//! Request/response bodies and the error type mapped onto HTTP statuses.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::registry::IdentifierCollision;
use crate::module::traits::{ModuleError, ModuleState, RuntimeStatus};
use crate::module::{ModuleListing, ModuleStatus};

/// Response body of `POST /admin/action`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// One row of the module listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleView {
    pub identifier: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub state: ModuleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeStatus>,
}

impl From<&ModuleStatus> for ModuleView {
    fn from(status: &ModuleStatus) -> Self {
        let d = &status.descriptor;
        Self {
            identifier: d.identifier.clone(),
            display_name: d.display_name.clone(),
            description: d.description.clone(),
            version: d.version.clone(),
            author: d.author.clone(),
            state: status.state,
            runtime: status.runtime.clone(),
        }
    }
}

/// Module hidden by an identifier collision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionView {
    pub identifier: String,
    pub display_name: String,
    pub entry_point: String,
    pub kept_entry_point: String,
}

impl From<&IdentifierCollision> for CollisionView {
    fn from(c: &IdentifierCollision) -> Self {
        Self {
            identifier: c.identifier.clone(),
            display_name: c.display_name.clone(),
            entry_point: c.entry_point.display().to_string(),
            kept_entry_point: c.kept_entry_point.display().to_string(),
        }
    }
}

/// Response body of `GET /admin/modules.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleListResponse {
    pub modules: Vec<ModuleView>,
    pub collisions: Vec<CollisionView>,
}

impl From<&ModuleListing> for ModuleListResponse {
    fn from(listing: &ModuleListing) -> Self {
        Self {
            modules: listing.modules.iter().map(ModuleView::from).collect(),
            collisions: listing.collisions.iter().map(CollisionView::from).collect(),
        }
    }
}

/// Admin request errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid or expired security token")]
    InvalidNonce,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request body too large (max: {0} bytes)")]
    PayloadTooLarge(usize),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdminError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AdminError::Forbidden(_) | AdminError::InvalidNonce => StatusCode::FORBIDDEN,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AdminError::Storage(_) | AdminError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ModuleError> for AdminError {
    fn from(e: ModuleError) -> Self {
        match e {
            ModuleError::ModuleNotFound(id) => AdminError::NotFound(format!("module {}", id)),
            ModuleError::Storage(msg) => AdminError::Storage(msg),
            other => AdminError::Internal(other.to_string()),
        }
    }
}
