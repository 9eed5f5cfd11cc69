//! The StorageBackend trait: the single interface for artifact storage.
//!
//! Implementations include `DiskStorage` (a local directory) and
//! `ObjectStorage` (a bucket in a remote object store), both in the
//! `stowage-storage` crate. A backend is chosen once when it is opened and
//! used only through this trait afterwards.

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::stream::{match_all, match_filename, ListStream, PathFilter};
use crate::Result;

/// Uniform access to a storage namespace.
///
/// Paths are root-relative and `/`-separated. Implementations are stateless
/// beyond their root and safe to share between tasks.
///
/// # Absence
///
/// Reading a single missing object fails with
/// [`StorageError::NotExist`](crate::StorageError::NotExist). A missing
/// prefix is never an error for listing or deleting: it is just empty.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// A string identifying this backend and its root, e.g. `s3://bucket`.
    fn root_url(&self) -> String;

    /// Read an object fully into memory.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Write an object, creating intermediate structure. Overwrites if it exists.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// List the objects directly under `prefix` (non-recursive), sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Stream every object under `prefix` that passes `filter`.
    ///
    /// Enumeration failures arrive as `Err` items; the stream still ends.
    fn list_filtered(&self, prefix: &str, filter: PathFilter) -> ListStream;

    /// Stream every object under `prefix`.
    fn list_recursive(&self, prefix: &str) -> ListStream {
        self.list_filtered(prefix, match_all())
    }

    /// Stream every object under `prefix` whose file name is exactly `filename`.
    fn match_filenames_recursive(&self, prefix: &str, filename: &str) -> ListStream {
        self.list_filtered(prefix, match_filename(filename))
    }

    /// Delete `path` and everything under it. Deleting nothing succeeds.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Copy every object under `storage_dir` into `local_dir`, keeping
    /// relative paths.
    async fn get_directory(&self, storage_dir: &str, local_dir: &Path) -> Result<()>;

    /// Upload `local_path` to `storage_path`. Directories are copied
    /// recursively; a single file is written to `storage_path` itself.
    async fn put_path(&self, local_path: &Path, storage_path: &str) -> Result<()>;
}
