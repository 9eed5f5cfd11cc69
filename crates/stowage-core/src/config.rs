//! Storage configuration.
//!
//! [`StorageConfig`] names the backend to open and the limits bulk
//! operations run under. Credentials are not part of it: remote stores read
//! them from the environment.

use serde::{Deserialize, Serialize};

/// Default number of concurrent per-object operations in a bulk operation.
pub const DEFAULT_MAX_WORKERS: usize = 128;

/// Default number of listing results buffered ahead of the consumer.
pub const DEFAULT_LIST_BUFFER: usize = 64;

/// Configuration for opening a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage URL: `"s3://bucket/prefix"`, `"gs://bucket"`,
    /// `"file:///var/lib/runs"` or a bare local path.
    pub url: String,

    /// Maximum concurrent units in a worker queue.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Capacity of the channel between a traversal and its consumer.
    #[serde(default = "default_list_buffer")]
    pub list_buffer: usize,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_list_buffer() -> usize {
    DEFAULT_LIST_BUFFER
}

impl StorageConfig {
    /// Configuration for `url` with default limits.
    ///
    /// # Example
    ///
    /// ```
    /// use stowage_core::config::StorageConfig;
    ///
    /// let config = StorageConfig::new("s3://my-bucket/runs").with_max_workers(16);
    /// assert_eq!(config.max_workers, 16);
    /// assert_eq!(config.list_buffer, stowage_core::config::DEFAULT_LIST_BUFFER);
    /// ```
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_workers: DEFAULT_MAX_WORKERS,
            list_buffer: DEFAULT_LIST_BUFFER,
        }
    }

    /// Override the worker queue capacity.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Override the listing buffer.
    pub fn with_list_buffer(mut self, list_buffer: usize) -> Self {
        self.list_buffer = list_buffer;
        self
    }
}
