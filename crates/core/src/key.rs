//! Key rules shared by records and leases.
//!
//! Keys are flat strings. Hierarchy is implied by the `/` separator and is
//! only ever derived from string prefixes; there are no directory entries.

use crate::error::{Error, Result};

/// Separator between hierarchy levels in a key.
pub const SEPARATOR: char = '/';

/// Validate a key before it reaches the backend.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

/// Decide whether `key` belongs in a listing of `prefix`.
///
/// Matching is byte-wise with no normalization: callers must include any
/// trailing separator they intend. In non-recursive mode only immediate
/// children qualify, meaning the remainder after the prefix is non-empty and
/// holds no further separator. The prefix itself is never its own child.
pub fn is_listed(prefix: &str, key: &str, recursive: bool) -> bool {
    let Some(remainder) = key.strip_prefix(prefix) else {
        return false;
    };
    if recursive {
        return true;
    }
    !remainder.is_empty() && !remainder.contains(SEPARATOR)
}
