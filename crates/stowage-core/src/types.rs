//! Value types produced by traversal.

use std::fmt;

use crate::error::StorageError;

/// One object discovered by a recursive listing.
///
/// `path` is root-relative and `/`-separated. `md5` is only filled in by
/// backends that can compute it cheaply while walking (the disk backend).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListEntry {
    /// Root-relative object path.
    pub path: String,
    /// MD5 digest of the object's content, if the backend produced one.
    pub md5: Option<Vec<u8>>,
}

impl ListEntry {
    /// An entry without a content digest.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            md5: None,
        }
    }

    /// An entry carrying a content digest.
    pub fn with_md5(path: impl Into<String>, md5: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            md5: Some(md5),
        }
    }

    /// Lowercase hex rendering of the digest, if any.
    pub fn md5_hex(&self) -> Option<String> {
        self.md5
            .as_ref()
            .map(|d| d.iter().map(|b| format!("{b:02x}")).collect())
    }
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.md5_hex() {
            Some(hex) => write!(f, "{}  {}", hex, self.path),
            None => write!(f, "{}", self.path),
        }
    }
}

/// An item of a listing stream: either a discovered entry or a per-item
/// enumeration failure. End of stream is signalled by the stream ending.
pub type ListResult = std::result::Result<ListEntry, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        let entry = ListEntry::with_md5("a.json", vec![0x00, 0x0f, 0xab]);
        assert_eq!(entry.md5_hex().as_deref(), Some("000fab"));
        assert_eq!(entry.to_string(), "000fab  a.json");
    }

    #[test]
    fn test_display_without_digest() {
        let entry = ListEntry::new("checkpoints/abc.json");
        assert_eq!(entry.md5_hex(), None);
        assert_eq!(entry.to_string(), "checkpoints/abc.json");
    }
}
