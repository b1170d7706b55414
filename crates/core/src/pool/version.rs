//! Namespace version tokens.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cachette_domain::constants::NAMESPACE_SEPARATOR;

/// Length of a token, separator included.
pub const TOKEN_LEN: usize = 6;

/// Encode `seed` as a version token: five base64 characters of its
/// little-endian bytes followed by the namespace separator.
pub fn format_version(seed: u32) -> String {
    let mut token: String =
        STANDARD.encode(seed.to_le_bytes()).chars().take(TOKEN_LEN - 1).collect();
    token.push(NAMESPACE_SEPARATOR);
    token
}

/// Reserved identifier under which `namespace` (separator included)
/// stores its version token.
pub fn version_key(namespace: &str) -> String {
    format!("{NAMESPACE_SEPARATOR}{namespace}")
}
