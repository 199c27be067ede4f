//! Module identifier derivation
//!
//! Identifiers are a pure function of (namespace, display name) so that
//! registry keys stay stable across scans.

/// Normalize a display name into an identifier fragment
///
/// Trims surrounding whitespace, lowercases ASCII letters and replaces every
/// character that is not an ASCII letter or digit with `_`.
pub fn normalize_name(display_name: &str) -> String {
    display_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the full identifier `<namespace>_<normalized name>`
pub fn module_identifier(namespace: &str, display_name: &str) -> String {
    format!("{}_{}", namespace, normalize_name(display_name))
}
