//! Path convention shared by every backend.
//!
//! Backend paths are relative, `/`-separated regardless of host OS, and
//! never contain `..`. Prefixes used for recursive operations are
//! normalised to end with exactly one `/` and to not start with one.

use crate::error::StorageError;
use crate::Result;

/// Normalise a prefix for matching: no leading `/`, exactly one trailing `/`.
///
/// The empty prefix (the root) stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Reject paths that are absolute or that would escape the root.
pub fn validate_path(path: &str) -> Result<()> {
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "must be relative".to_string(),
        });
    }
    if path.split(&['/', '\\'][..]).any(|segment| segment == "..") {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
            reason: "must not contain '..'".to_string(),
        });
    }
    Ok(())
}

/// The final segment of a path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

/// Join a relative path under a prefix.
pub fn join(prefix: &str, rel: &str) -> String {
    let prefix = normalize_prefix(prefix);
    format!("{}{}", prefix, rel.trim_start_matches('/'))
}

/// Path of `path` relative to `prefix`, or `None` if it is not under it.
pub fn relative_to<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let prefix = normalize_prefix(prefix);
    path.strip_prefix(prefix.as_str()).filter(|rel| !rel.is_empty())
}
