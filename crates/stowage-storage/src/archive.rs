//! Tar archives of local directories, stored as single objects.
//!
//! Archives are uncompressed. Entries are named relative to the archived
//! directory, so unpacking recreates its contents directly in the target.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tar::{Archive, Builder};
use tracing::{debug, instrument};

use stowage_core::error::StorageError;
use stowage_core::storage::StorageBackend;
use stowage_core::Result;

/// Pack `local_dir` into a tar archive and store it at `tar_path`.
#[instrument(skip(storage), fields(local_dir = %local_dir.display(), tar_path = %tar_path))]
pub async fn put_path_tar(
    storage: &dyn StorageBackend,
    local_dir: &Path,
    tar_path: &str,
) -> Result<()> {
    let dir = local_dir.to_path_buf();
    let data = tokio::task::spawn_blocking(move || pack(&dir))
        .await
        .map_err(|e| StorageError::Internal {
            message: format!("Archive task failed: {e}"),
        })??;

    debug!("Packed {} bytes", data.len());
    storage.put(tar_path, Bytes::from(data)).await
}

/// Fetch the archive at `tar_path` and unpack it into `local_dir`.
///
/// A missing archive fails with [`StorageError::NotExist`].
#[instrument(skip(storage), fields(tar_path = %tar_path, local_dir = %local_dir.display()))]
pub async fn get_path_tar(
    storage: &dyn StorageBackend,
    tar_path: &str,
    local_dir: &Path,
) -> Result<()> {
    let data = storage.get(tar_path).await?;
    debug!("Unpacking {} bytes", data.len());

    let dest: PathBuf = local_dir.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(data, &dest))
        .await
        .map_err(|e| StorageError::Internal {
            message: format!("Archive task failed: {e}"),
        })?
}

fn pack(dir: &Path) -> Result<Vec<u8>> {
    if !dir.is_dir() {
        return Err(StorageError::NotExist {
            path: dir.display().to_string(),
        });
    }
    let mut builder = Builder::new(Vec::new());
    builder.append_dir_all("", dir).map_err(|e| {
        StorageError::io(format!("Failed to archive {}", dir.display()), e)
    })?;
    builder
        .into_inner()
        .map_err(|e| StorageError::io("Failed to finish archive", e))
}

fn unpack(data: Bytes, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).map_err(|e| {
        StorageError::io(format!("Failed to create directory {}", dest.display()), e)
    })?;
    let mut archive = Archive::new(Cursor::new(data));
    archive.unpack(dest).map_err(|e| {
        StorageError::io(format!("Failed to extract archive into {}", dest.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tar_round_trip() {
        let store_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(store_dir.path()).await.unwrap();

        let src = TempDir::new().unwrap();
        std::fs::create_dir_all(src.path().join("nested/deeper")).unwrap();
        std::fs::write(src.path().join("top.txt"), b"top").unwrap();
        std::fs::write(src.path().join("nested/deeper/leaf.bin"), b"\x00\xff").unwrap();

        put_path_tar(&storage, src.path(), "archives/src.tar")
            .await
            .unwrap();

        let dest = TempDir::new().unwrap();
        get_path_tar(&storage, "archives/src.tar", dest.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(dest.path().join("top.txt")).unwrap(), b"top");
        assert_eq!(
            std::fs::read(dest.path().join("nested/deeper/leaf.bin")).unwrap(),
            b"\x00\xff"
        );
    }

    #[tokio::test]
    async fn test_get_missing_archive_is_not_exist() {
        let store_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(store_dir.path()).await.unwrap();
        let dest = TempDir::new().unwrap();

        let err = get_path_tar(&storage, "does-not-exist.tar", dest.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotExist { .. }));
    }

    #[tokio::test]
    async fn test_put_missing_directory_is_not_exist() {
        let store_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(store_dir.path()).await.unwrap();

        let err = put_path_tar(&storage, &store_dir.path().join("nope"), "x.tar")
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }
}
