//! Module discovery
//!
//! Scans the modules directory and yields a descriptor for every file that
//! carries a module header. Scanning is lazy and side-effect free: a missing
//! modules directory is an empty scan and is never created.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ModuleConfig;
use crate::module::registry::header::ModuleHeader;
use crate::module::registry::identifier::module_identifier;
use crate::module::traits::{ModuleDescriptor, ModuleError};
use crate::module::validation::{HeaderCheck, HeaderValidator};

/// Module discovery scanner
#[derive(Debug, Clone)]
pub struct ModuleDiscovery {
    /// Base directory to scan for modules
    modules_dir: PathBuf,
    /// Namespace prefixed to identifiers
    namespace: String,
    /// Recognised file extensions (without the dot)
    extensions: Vec<String>,
    /// Maximum depth below `modules_dir` (files directly inside are depth 1)
    max_depth: usize,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner with default extensions and depth
    pub fn new<P: AsRef<Path>>(modules_dir: P, namespace: &str) -> Self {
        let defaults = ModuleConfig::default();
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
            namespace: namespace.to_string(),
            extensions: defaults.extensions,
            max_depth: defaults.max_depth,
        }
    }

    /// Create a scanner from module configuration
    pub fn from_config(config: &ModuleConfig) -> Self {
        Self {
            modules_dir: PathBuf::from(&config.modules_dir),
            namespace: config.namespace.clone(),
            extensions: config.extensions.clone(),
            max_depth: config.max_depth,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Start a fresh scan
    ///
    /// Every call returns a new iterator that walks the directory again.
    pub fn scan(&self) -> ModuleScan<'_> {
        let mut pending_dirs = Vec::new();
        if self.modules_dir.is_dir() {
            pending_dirs.push((self.modules_dir.clone(), 0));
        } else {
            debug!(
                "Modules directory {:?} does not exist, nothing to discover",
                self.modules_dir
            );
        }
        ModuleScan {
            discovery: self,
            pending_dirs,
            pending_files: VecDeque::new(),
        }
    }

    /// Discover all modules, collected in traversal order
    pub fn discover_modules(&self) -> Vec<ModuleDescriptor> {
        let modules: Vec<_> = self.scan().collect();
        info!(
            "Discovered {} modules in {:?}",
            modules.len(),
            self.modules_dir
        );
        modules
    }

    /// Discover a specific module by identifier
    pub fn discover_module(&self, identifier: &str) -> Result<ModuleDescriptor, ModuleError> {
        self.scan()
            .find(|m| m.identifier == identifier)
            .ok_or_else(|| ModuleError::ModuleNotFound(identifier.to_string()))
    }

    fn has_module_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|allowed| allowed == ext))
            .unwrap_or(false)
    }

    fn describe(&self, path: &Path) -> Option<ModuleDescriptor> {
        match ModuleHeader::from_file(path) {
            Ok(Some(header)) => {
                let descriptor = ModuleDescriptor {
                    identifier: module_identifier(&self.namespace, &header.name),
                    display_name: header.name,
                    description: header.description,
                    version: header.version,
                    author: header.author,
                    entry_point: path.to_path_buf(),
                };
                // Malformed headers are logged but the module is still listed
                if let HeaderCheck::Invalid(problems) = HeaderValidator::new().validate(&descriptor)
                {
                    warn!(
                        "Module {} in {:?} has a malformed header: {}",
                        descriptor.identifier,
                        path,
                        problems.join("; ")
                    );
                }
                Some(descriptor)
            }
            Ok(None) => {
                debug!("No module header in {:?}, skipping", path);
                None
            }
            Err(e) => {
                warn!("Skipping unreadable module file: {}", e);
                None
            }
        }
    }
}

/// Lazy depth-first walk over the modules directory
///
/// Entries of each directory are visited in file-name order, files before
/// subdirectories. Hidden entries and symlinked directories are skipped.
pub struct ModuleScan<'a> {
    discovery: &'a ModuleDiscovery,
    pending_dirs: Vec<(PathBuf, usize)>,
    pending_files: VecDeque<PathBuf>,
}

impl ModuleScan<'_> {
    fn expand_dir(&mut self, dir: &Path, depth: usize) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read module directory {:?}: {}", dir, e);
                return;
            }
        };

        let mut entries: Vec<_> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Failed to read directory entry in {:?}: {}", dir, e);
                    None
                }
            })
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                if depth + 1 < self.discovery.max_depth {
                    subdirs.push(path);
                }
            } else if file_type.is_symlink() {
                // Follow symlinks to files only
                if path.is_file() && self.discovery.has_module_extension(&path) {
                    self.pending_files.push_back(path);
                }
            } else if file_type.is_file() && self.discovery.has_module_extension(&path) {
                self.pending_files.push_back(path);
            }
        }

        // Stack order: first subdirectory is visited next
        for subdir in subdirs.into_iter().rev() {
            self.pending_dirs.push((subdir, depth + 1));
        }
    }
}

impl Iterator for ModuleScan<'_> {
    type Item = ModuleDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            while let Some(path) = self.pending_files.pop_front() {
                if let Some(descriptor) = self.discovery.describe(&path) {
                    return Some(descriptor);
                }
            }
            let (dir, depth) = self.pending_dirs.pop()?;
            self.expand_dir(&dir, depth);
        }
    }
}
