//! Utility functions for Skiff

use std::sync::LazyLock;

/// Regex pattern for resource names (DNS-1123 label style, dots allowed)
static VALID_NAME_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new("^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").expect("Invalid regex pattern")
});

/// Maximum length of a resource name or namespace
pub const MAX_NAME_LENGTH: usize = 253;

/// Validate a resource name or namespace
///
/// # Examples
///
/// ```
/// use skiff_common::is_valid_name;
///
/// assert!(is_valid_name("gateway-proxy"));
/// assert!(is_valid_name("skiff-system"));
/// assert!(!is_valid_name("Gateway_Proxy"));
/// assert!(!is_valid_name(""));
/// ```
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && VALID_NAME_PATTERN.is_match(name)
}
