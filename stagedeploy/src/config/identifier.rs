//! Deployment identifier rules.

use crate::errors::{DeployError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Leaves room for `-artifacts` and `-templates` under the 63-character
/// bucket name limit.
const MAX_IDENTIFIER_LEN: usize = 53;
const SUFFIX_LEN: usize = 6;

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9-]*$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
    })
}

/// Checks that `name` can be used as a stack name and resource prefix.
///
/// Bucket names are derived from it, so only lowercase is accepted.
///
/// # Errors
///
/// Returns [`DeployError::InvalidIdentifier`] for empty, overlong,
/// uppercase or malformed names.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN || !identifier_pattern().is_match(name) {
        return Err(DeployError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Appends a short uniqueness suffix taken from `entropy`.
///
/// Only hexadecimal characters of `entropy` are used, lowercased.
#[must_use]
pub fn with_suffix(name: &str, entropy: &str) -> String {
    let suffix: String = entropy
        .chars()
        .filter(char::is_ascii_hexdigit)
        .take(SUFFIX_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("{name}-{suffix}")
}
