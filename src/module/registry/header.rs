//! Module metadata header parsing
//!
//! Modules declare their metadata in a comment block near the top of the
//! entry point, for example:
//!
//! ```text
//! #!/bin/sh
//! # Name: Custom Post Types
//! # Description: Registers the portfolio post type
//! # Version: 1.2.0
//! ```
//!
//! The file is never executed to read its header.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::module::traits::ModuleError;

/// Only this many bytes at the start of a file are searched for a header
pub const HEADER_SCAN_BYTES: u64 = 8 * 1024;

/// Comment markers stripped from the start of header lines (longest first)
const COMMENT_MARKERS: &[&str] = &["/*", "//", "--", "#", "*", ";"];

/// Metadata declared in a module's comment header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleHeader {
    pub name: String,
    pub description: Option<String>,
    pub version: Option<String>,
    pub author: Option<String>,
}

impl ModuleHeader {
    /// Parse a header from file contents
    ///
    /// Returns `None` when no non-empty `Name:` field is present.
    pub fn parse(contents: &str) -> Option<Self> {
        let mut name: Option<String> = None;
        let mut description = None;
        let mut version = None;
        let mut author = None;

        let mut in_block = false;
        for (index, raw_line) in contents.lines().enumerate() {
            if index == 0 && raw_line.starts_with("#!") {
                continue;
            }
            let trimmed = raw_line.trim_start();
            if trimmed.is_empty() {
                continue;
            }

            // The header ends at the first line of code
            let is_comment = in_block || COMMENT_MARKERS.iter().any(|m| trimmed.starts_with(m));
            if !is_comment {
                break;
            }
            if trimmed.starts_with("/*") {
                in_block = true;
            }
            if in_block && trimmed.contains("*/") {
                in_block = false;
            }

            let line = strip_comment_markers(raw_line);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = clean_value(value);
            if value.is_empty() {
                continue;
            }

            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "name" => &mut name,
                "description" => &mut description,
                "version" => &mut version,
                "author" => &mut author,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        name.map(|name| ModuleHeader {
            name,
            description,
            version,
            author,
        })
    }

    /// Read and parse the header of a file
    ///
    /// `Ok(None)` means the file is readable but declares no module.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ModuleError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ModuleError::InvalidHeader(format!("Failed to open {:?}: {}", path, e))
        })?;

        let mut buf = Vec::with_capacity(HEADER_SCAN_BYTES as usize);
        file.take(HEADER_SCAN_BYTES)
            .read_to_end(&mut buf)
            .map_err(|e| {
                ModuleError::InvalidHeader(format!("Failed to read {:?}: {}", path, e))
            })?;

        Ok(Self::parse(&String::from_utf8_lossy(&buf)))
    }
}

fn strip_comment_markers(line: &str) -> &str {
    let mut rest = line.trim_start();
    loop {
        match COMMENT_MARKERS.iter().find_map(|m| rest.strip_prefix(m)) {
            Some(stripped) => rest = stripped.trim_start(),
            None => return rest,
        }
    }
}

fn clean_value(value: &str) -> String {
    let value = value.trim();
    value
        .strip_suffix("*/")
        .unwrap_or(value)
        .trim()
        .to_string()
}
