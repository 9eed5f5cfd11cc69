//! Storage backend implementations for stowage.
//!
//! This crate provides concrete implementations of the
//! [`StorageBackend`](stowage_core::StorageBackend) trait:
//!
//! - [`DiskStorage`]: a local directory
//! - [`ObjectStorage`]: an S3 or GCS bucket through `object_store`
//!
//! plus tar archiving of local directories ([`put_path_tar`],
//! [`get_path_tar`]) and [`open_storage`], which picks a backend from a URL.

pub mod archive;
pub mod disk;
pub mod object;
mod walk;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use stowage_core::error::StorageError;
use stowage_core::{Result, StorageBackend, StorageConfig};

pub use archive::{get_path_tar, put_path_tar};
pub use disk::DiskStorage;
pub use object::ObjectStorage;

/// Open the backend named by `config.url`.
///
/// `s3://` and `gs://` URLs open an [`ObjectStorage`]; `file://` URLs and
/// bare paths open a [`DiskStorage`], creating the directory if needed.
/// Any other scheme is a [`StorageError::Config`].
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    let url = config.url.as_str();
    let storage: Arc<dyn StorageBackend> = if url.starts_with("s3://") || url.starts_with("gs://")
    {
        Arc::new(
            ObjectStorage::new(url)?
                .with_max_workers(config.max_workers)
                .with_list_buffer(config.list_buffer),
        )
    } else if let Some(path) = url.strip_prefix("file://") {
        Arc::new(open_disk(PathBuf::from(path), config).await?)
    } else if let Some((scheme, _)) = url.split_once("://") {
        return Err(StorageError::Config {
            message: format!("Unsupported storage scheme '{scheme}' in {url}"),
        });
    } else if url.is_empty() {
        return Err(StorageError::Config {
            message: "Storage URL is empty".to_string(),
        });
    } else {
        Arc::new(open_disk(PathBuf::from(url), config).await?)
    };

    info!(root = %storage.root_url(), max_workers = config.max_workers, "Opened storage");
    Ok(storage)
}

async fn open_disk(path: PathBuf, config: &StorageConfig) -> Result<DiskStorage> {
    Ok(DiskStorage::new(path)
        .await?
        .with_max_workers(config.max_workers)
        .with_list_buffer(config.list_buffer))
}
