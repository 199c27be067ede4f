//! Admin authentication and authorization
//!
//! Requests authenticate with `Authorization: Bearer <token>` or, for the
//! browser page, a `gate_token` cookie. Tokens map to configured users.

use http::HeaderMap;
use tracing::{debug, warn};

use crate::admin::nonce::constant_time_eq;
use crate::admin::types::AdminError;
use crate::config::{AdminConfig, AdminRole};

/// Cookie carrying the bearer token for browser sessions
pub const TOKEN_COOKIE: &str = "gate_token";

/// Something a user may be allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// View the module page and toggle or rescan modules
    ManageModules,
}

/// Authenticated admin user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminUser {
    pub name: String,
    pub role: AdminRole,
}

impl AdminUser {
    pub fn can(&self, capability: Capability) -> bool {
        match capability {
            Capability::ManageModules => self.role == AdminRole::Administrator,
        }
    }
}

/// Authentication result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(AdminUser),
    /// No credentials presented
    Missing,
    /// Credentials presented but unknown
    Invalid,
}

/// Admin authentication manager
#[derive(Default)]
pub struct AdminAuthManager {
    /// (token, user)
    users: Vec<(String, AdminUser)>,
}

impl AdminAuthManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AdminConfig) -> Self {
        let mut manager = Self::new();
        for user in &config.users {
            manager.add_user(user.token.clone(), user.name.clone(), user.role);
        }
        manager
    }

    pub fn add_user(&mut self, token: String, name: String, role: AdminRole) {
        self.users.push((token, AdminUser { name, role }));
    }

    /// Look up the user for a token
    pub fn user_for_token(&self, token: &str) -> Option<&AdminUser> {
        // Compare against every token so timing does not depend on position
        let mut found = None;
        for (candidate, user) in &self.users {
            if constant_time_eq(candidate.as_bytes(), token.as_bytes()) {
                found = Some(user);
            }
        }
        found
    }

    /// Authenticate a request from HTTP headers
    pub fn authenticate_request(&self, headers: &HeaderMap) -> AuthResult {
        let Some(token) = extract_token(headers) else {
            return AuthResult::Missing;
        };
        match self.user_for_token(&token) {
            Some(user) => {
                debug!("Authenticated admin user {}", user.name);
                AuthResult::Authenticated(user.clone())
            }
            None => {
                warn!("Rejected admin request with unknown token");
                AuthResult::Invalid
            }
        }
    }

    /// Authenticate and require a capability
    pub fn authorize(
        &self,
        headers: &HeaderMap,
        capability: Capability,
    ) -> Result<AdminUser, AdminError> {
        match self.authenticate_request(headers) {
            AuthResult::Authenticated(user) if user.can(capability) => Ok(user),
            AuthResult::Authenticated(user) => {
                warn!("User {} lacks {:?}", user.name, capability);
                Err(AdminError::Forbidden(format!(
                    "user {} may not manage modules",
                    user.name
                )))
            }
            AuthResult::Missing | AuthResult::Invalid => Err(AdminError::Unauthenticated),
        }
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION) {
        return value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());
    }

    headers
        .get_all(http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
}
