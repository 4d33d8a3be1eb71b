//! Sandbox name validation.
//!
//! Names end up in file paths, container names and shell command lines, so the
//! accepted charset is deliberately narrow: ASCII letters, digits, `-` and `_`,
//! starting with a letter or digit, at most 63 characters. Dots are excluded so
//! `<name>.json` is never confused with `<name>.<suffix>.json` sidecars.

use crate::error::CorralError;

/// Maximum sandbox name length.
pub(crate) const MAX_NAME_LEN: usize = 63;

/// Returns true if `name` is an acceptable sandbox name.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_NAME_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validates a user-supplied sandbox name.
pub(crate) fn validate_name(name: &str) -> Result<(), CorralError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(CorralError::validation(format!(
            "invalid sandbox name '{name}': use 1-{MAX_NAME_LEN} letters, digits, '-' or '_', \
             starting with a letter or digit"
        )))
    }
}
