//! File system confinement for module entry points
//!
//! Entry points must resolve (after following symlinks) to a path inside the
//! modules directory.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::module::sandbox::ExecutionError;

/// Restricts entry points to a root directory
///
/// The root is resolved on every check, so a modules directory created
/// after startup (or given as a relative path) is honoured.
#[derive(Debug, Clone)]
pub struct FileSystemSandbox {
    root: PathBuf,
}

impl FileSystemSandbox {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve `path` and ensure it stays under the allowed root
    pub fn validate_path<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf, ExecutionError> {
        let path = path.as_ref();

        let canonical = path.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ExecutionError::EntryPointNotFound(path.to_path_buf())
            } else {
                ExecutionError::AccessDenied(format!("cannot resolve {:?}: {}", path, e))
            }
        })?;

        // Canonical root so prefix checks compare like with like
        let allowed = self.resolved_root().map_err(|e| {
            ExecutionError::AccessDenied(format!(
                "cannot resolve modules directory {:?}: {}",
                self.root, e
            ))
        })?;

        if !canonical.starts_with(&allowed) {
            warn!(
                "Entry point resolves outside modules directory: {:?} (allowed: {:?})",
                canonical, allowed
            );
            return Err(ExecutionError::AccessDenied(format!(
                "path {:?} is outside allowed directory {:?}",
                canonical, allowed
            )));
        }

        debug!("Path validated: {:?} is within sandbox", canonical);
        Ok(canonical)
    }

    /// Canonical form of the root as it exists right now
    pub fn resolved_root(&self) -> std::io::Result<PathBuf> {
        self.root.canonicalize()
    }
}
