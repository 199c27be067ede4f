//! Admin HTTP surface
//!
//! Settings page listing discovered modules with a toggle each, a JSON
//! listing, and the authenticated action endpoint guarded by per-user
//! anti-forgery tokens.

pub mod actions;
pub mod auth;
pub mod nonce;
pub mod page;
pub mod server;
pub mod types;

pub use actions::{ActionRequest, AdminAction};
pub use auth::{AdminAuthManager, AdminUser, AuthResult, Capability};
pub use nonce::NonceManager;
pub use server::AdminServer;
pub use types::{ActionResponse, AdminError, ModuleListResponse, ModuleView};
