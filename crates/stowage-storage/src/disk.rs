//! Filesystem-backed storage.
//!
//! [`DiskStorage`] implements the [`StorageBackend`] trait over a local root
//! directory. Recursive listings are a depth-first walk that computes an MD5
//! digest for every file; directory copies run through the worker queue.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use stowage_core::config::{DEFAULT_LIST_BUFFER, DEFAULT_MAX_WORKERS};
use stowage_core::error::StorageError;
use stowage_core::path::{join, normalize_prefix, relative_to, validate_path};
use stowage_core::storage::StorageBackend;
use stowage_core::{apply_recursive, match_all, ListStream, PathFilter, Result, WorkerQueue};

use crate::walk::walk_tree;

/// A [`StorageBackend`] backed by a local directory.
///
/// All paths are mapped under `root`. Parent directories are created
/// automatically on `put`.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
    max_workers: usize,
    list_buffer: usize,
}

impl DiskStorage {
    /// Create a new `DiskStorage` rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::io(format!("Failed to create root directory: {}", root.display()), e)
        })?;
        debug!(root = %root.display(), "DiskStorage initialised");
        Ok(Self {
            root,
            max_workers: DEFAULT_MAX_WORKERS,
            list_buffer: DEFAULT_LIST_BUFFER,
        })
    }

    /// Set the worker queue capacity used by directory copies.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set how many listing results may be buffered ahead of the consumer.
    pub fn with_list_buffer(mut self, list_buffer: usize) -> Self {
        self.list_buffer = list_buffer;
        self
    }

    /// Return the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the full filesystem path for a storage path.
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        validate_path(key)?;
        let key = key.trim_end_matches('/');
        if key.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(key))
        }
    }
}

#[async_trait]
impl StorageBackend for DiskStorage {
    fn root_url(&self) -> String {
        format!("file://{}", self.root.display())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.key_to_path(path)?;
        let data = fs::read(&full).await.map_err(|e| {
            StorageError::from_local_io(path, format!("Failed to read {}", full.display()), e)
        })?;
        debug!("Get {} bytes from {}", data.len(), path);
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(path = %path, size = data.len()))]
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let full = self.key_to_path(path)?;
        write_file(&full, &data).await?;
        debug!("Put {} bytes to {}", data.len(), path);
        Ok(())
    }

    #[instrument(skip(self), fields(prefix = %prefix))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.key_to_path(prefix)?;
        // A missing prefix, or one naming a file, has no children
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::enumeration(prefix, e)),
        }
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::enumeration(prefix, e))?;

        let mut results = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::enumeration(prefix, e))?
        {
            // Follows symlinks; a dangling link or a vanished entry is skipped
            let is_file = match fs::metadata(entry.path()).await {
                Ok(meta) => meta.is_file(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => return Err(StorageError::enumeration(prefix, e)),
            };
            if is_file {
                let name = entry.file_name().to_string_lossy().to_string();
                results.push(join(prefix, &name));
            }
        }
        results.sort();
        debug!("Listed {} paths under '{}'", results.len(), prefix);
        Ok(results)
    }

    fn list_filtered(&self, prefix: &str, filter: PathFilter) -> ListStream {
        let prefix = normalize_prefix(prefix);
        if let Err(e) = validate_path(&prefix) {
            return ListStream::spawn(1, filter, move |tx| async move {
                tx.fail(e).await;
            });
        }
        let root = self.root.clone();
        ListStream::spawn(self.list_buffer, filter, move |tx| {
            walk_tree(root, prefix, tx, true)
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.key_to_path(path)?;
        let meta = match fs::symlink_metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Delete {}: already absent", path);
                return Ok(());
            }
            Err(e) => {
                return Err(StorageError::io(format!("Failed to stat {}", full.display()), e))
            }
        };

        if !meta.is_dir() {
            remove_file(&full).await?;
        } else if full == self.root {
            // Empty the root but keep it
            let mut entries = fs::read_dir(&full)
                .await
                .map_err(|e| StorageError::enumeration(path, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::enumeration(path, e))?
            {
                let child = entry.path();
                let is_dir = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::enumeration(path, e))?
                    .is_dir();
                if is_dir {
                    remove_dir(&child).await?;
                } else {
                    remove_file(&child).await?;
                }
            }
        } else {
            remove_dir(&full).await?;
        }
        debug!("Deleted {}", path);
        Ok(())
    }

    #[instrument(skip(self), fields(storage_dir = %storage_dir, local_dir = %local_dir.display()))]
    async fn get_directory(&self, storage_dir: &str, local_dir: &Path) -> Result<()> {
        let prefix = normalize_prefix(storage_dir);
        validate_path(&prefix)?;

        let root = self.root.clone();
        let root_url = self.root_url();
        let local_dir = local_dir.to_path_buf();
        let walk_root = root.clone();
        let walk_prefix = prefix.clone();
        let entries = ListStream::spawn(self.list_buffer, match_all(), move |tx| {
            walk_tree(walk_root, walk_prefix, tx, false)
        });
        let queue = WorkerQueue::new(&CancellationToken::new(), self.max_workers);

        let copied = apply_recursive(entries, queue, |entry| {
            let src = root.join(&entry.path);
            let rel = relative_to(&prefix, &entry.path)
                .unwrap_or(entry.path.as_str())
                .to_string();
            let dest = local_dir.join(rel);
            let root_url = root_url.clone();
            async move {
                copy_file(&src, &dest)
                    .await
                    .map_err(|e| StorageError::apply(entry.path, root_url, e))
            }
        })
        .await?;

        info!(copied, "Copied {} to local directory", storage_dir);
        Ok(())
    }

    #[instrument(skip(self), fields(local_path = %local_path.display(), storage_path = %storage_path))]
    async fn put_path(&self, local_path: &Path, storage_path: &str) -> Result<()> {
        let dest_root = self.key_to_path(storage_path)?;
        let meta = fs::metadata(local_path).await.map_err(|e| {
            StorageError::from_local_io(
                &local_path.display().to_string(),
                format!("Failed to stat {}", local_path.display()),
                e,
            )
        })?;

        if !meta.is_dir() {
            copy_file(local_path, &dest_root).await?;
            debug!("Put file {} to {}", local_path.display(), storage_path);
            return Ok(());
        }

        let source = local_path.to_path_buf();
        let walk_source = source.clone();
        let root_url = self.root_url();
        let entries = ListStream::spawn(self.list_buffer, match_all(), move |tx| {
            walk_tree(walk_source, String::new(), tx, false)
        });
        let queue = WorkerQueue::new(&CancellationToken::new(), self.max_workers);

        let copied = apply_recursive(entries, queue, |entry| {
            let src = source.join(&entry.path);
            let dest = dest_root.join(&entry.path);
            let key = join(storage_path, &entry.path);
            let root_url = root_url.clone();
            async move {
                copy_file(&src, &dest)
                    .await
                    .map_err(|e| StorageError::apply(key, root_url, e))
            }
        })
        .await?;

        info!(copied, "Put local directory to {}", storage_path);
        Ok(())
    }
}

/// Create-then-write, making parent directories first.
async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::io(
                format!("Failed to create parent directories for {}", path.display()),
                e,
            )
        })?;
    }
    fs::write(path, data)
        .await
        .map_err(|e| StorageError::io(format!("Failed to write {}", path.display()), e))
}

async fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }
    fs::copy(src, dest).await.map_err(|e| {
        StorageError::io(
            format!("Failed to copy {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    Ok(())
}

async fn remove_file(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(format!("Failed to delete {}", path.display()), e)),
    }
}

async fn remove_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(format!("Failed to delete {}", path.display()), e)),
    }
}
