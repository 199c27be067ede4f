//! Header sanity checks
//!
//! Flags descriptors whose header fields look malformed. Discovery logs
//! the problems as warnings and still lists the module.

use tracing::debug;

use crate::module::registry::identifier::normalize_name;
use crate::module::traits::ModuleDescriptor;

/// Outcome of header checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderCheck {
    /// Header looks sane
    Valid,
    /// Header has problems
    Invalid(Vec<String>),
}

/// Header validator
pub struct HeaderValidator {
    max_name_len: usize,
    max_description_len: usize,
}

impl HeaderValidator {
    pub fn new() -> Self {
        Self {
            max_name_len: 128,
            max_description_len: 1024,
        }
    }

    /// Check a discovered descriptor
    pub fn validate(&self, descriptor: &ModuleDescriptor) -> HeaderCheck {
        let mut errors = Vec::new();
        let name = &descriptor.display_name;

        if name.chars().count() > self.max_name_len {
            errors.push(format!(
                "Module name longer than {} characters",
                self.max_name_len
            ));
        }
        if name.chars().any(char::is_control) {
            errors.push("Module name contains control characters".to_string());
        }
        if !normalize_name(name).chars().any(|c| c.is_ascii_alphanumeric()) {
            errors.push(format!(
                "Module name {:?} has no ASCII letters or digits; its identifier is ambiguous",
                name
            ));
        }

        if let Some(ref description) = descriptor.description {
            if description.chars().count() > self.max_description_len {
                errors.push(format!(
                    "Description longer than {} characters",
                    self.max_description_len
                ));
            }
        }

        if let Some(ref version) = descriptor.version {
            if !self.is_valid_version(version) {
                errors.push(format!(
                    "Invalid version format: {} (expected major.minor[.patch])",
                    version
                ));
            }
        }

        if errors.is_empty() {
            debug!("Header validation passed for module: {}", descriptor.identifier);
            HeaderCheck::Valid
        } else {
            HeaderCheck::Invalid(errors)
        }
    }

    /// Accepts major.minor[.patch][-prerelease][+build]
    #[inline]
    fn is_valid_version(&self, version: &str) -> bool {
        let base = version.split('+').next().unwrap_or_default();
        let core = base.split('-').next().unwrap_or_default();
        let nums: Vec<&str> = core.split('.').collect();

        if nums.len() < 2 || nums.len() > 3 {
            return false;
        }
        nums.iter()
            .all(|n| !n.is_empty() && n.parse::<u32>().is_ok() && n.chars().all(|c| c.is_ascii_digit()))
    }
}

impl Default for HeaderValidator {
    fn default() -> Self {
        Self::new()
    }
}
