//! Unified error type for stowage.
//!
//! Every backend reports failures through [`StorageError`]. The variants are
//! kinds, not messages: callers branch on [`StorageError::NotExist`] (or
//! [`StorageError::is_not_exist`]) regardless of which backend produced it.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A single-object read targeted a path with no object behind it.
    #[error("Path does not exist: {path}")]
    NotExist {
        /// The root-relative path that was requested.
        path: String,
    },

    /// Listing a prefix (or reading a directory during a walk) failed.
    #[error("Failed to list {prefix}")]
    Enumeration {
        /// The prefix or directory being enumerated.
        prefix: String,
        /// The underlying error.
        #[source]
        source: BoxError,
    },

    /// A per-entry operation failed during a bulk operation.
    #[error("Failed to apply operation to {path} in {root}")]
    Apply {
        /// The object the operation was applied to.
        path: String,
        /// Root URL of the backend that owns the object.
        root: String,
        /// What went wrong for this entry.
        #[source]
        source: Box<StorageError>,
    },

    /// Generic filesystem or transport failure.
    #[error("I/O error: {message}")]
    Io {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// A path is absolute or tries to escape the backend root.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The worker queue was canceled before the work could run.
    #[error("Operation cancelled")]
    Cancelled,

    /// Unsupported URL or client construction failure.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// A unit of work panicked or a blocking task could not be joined.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Create an I/O error from a message and source error.
    pub fn io(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an I/O error from a message only.
    pub fn io_msg(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// Create an enumeration error for `prefix`.
    pub fn enumeration(
        prefix: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Enumeration {
            prefix: prefix.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a per-entry failure with the object path and backend root.
    pub fn apply(path: impl Into<String>, root: impl Into<String>, source: StorageError) -> Self {
        Self::Apply {
            path: path.into(),
            root: root.into(),
            source: Box::new(source),
        }
    }

    /// Map a local `std::io::Error`, turning `NotFound` into [`StorageError::NotExist`].
    pub fn from_local_io(path: &str, message: impl Into<String>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotExist {
                path: path.to_string(),
            }
        } else {
            Self::io(message, err)
        }
    }

    /// True if this error (or the per-entry error it wraps) means "no such object".
    pub fn is_not_exist(&self) -> bool {
        match self {
            Self::NotExist { .. } => true,
            Self::Apply { source, .. } => source.is_not_exist(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_exist_from_io() {
        let err = StorageError::from_local_io(
            "a/b.json",
            "read failed",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, StorageError::NotExist { ref path } if path == "a/b.json"));
        assert!(err.is_not_exist());
    }

    #[test]
    fn test_other_io_is_generic() {
        let err = StorageError::from_local_io(
            "a/b.json",
            "read failed",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, StorageError::Io { .. }));
        assert!(!err.is_not_exist());
    }

    #[test]
    fn test_apply_keeps_kind() {
        let inner = StorageError::NotExist {
            path: "x".to_string(),
        };
        let err = StorageError::apply("x", "file:///tmp", inner);
        assert!(err.is_not_exist());
        assert_eq!(err.to_string(), "Failed to apply operation to x in file:///tmp");
    }
}
