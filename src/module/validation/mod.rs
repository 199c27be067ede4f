//! Module validation
//!
//! Header sanity checks at discovery time and sandboxed test-loads before a
//! module is enabled.

pub mod header_validator;
pub mod validator;

pub use header_validator::{HeaderCheck, HeaderValidator};
pub use validator::ModuleValidator;
