//! Depth-first walk of a local directory tree into a [`ListSender`].
//!
//! Used by `DiskStorage` for its own listings and by both backends to
//! enumerate a local source tree in `put_path`.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::fs;
use tokio::io::AsyncReadExt;

use stowage_core::error::StorageError;
use stowage_core::{ListEntry, ListSender, Result};

const DIGEST_CHUNK: usize = 64 * 1024;

/// Emit every regular file under `base/prefix`, keyed relative to `base`.
///
/// A missing start directory (or one that is a file) yields nothing.
/// Directories are visited in name order. When `digest` is set each entry
/// carries the MD5 of the file's content.
pub(crate) async fn walk_tree(base: PathBuf, prefix: String, tx: ListSender, digest: bool) {
    let start = if prefix.is_empty() {
        base.clone()
    } else {
        base.join(prefix.trim_end_matches('/'))
    };

    match fs::metadata(&start).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tx.fail(StorageError::enumeration(start.display().to_string(), e))
                .await;
            return;
        }
    }

    walk_dir(&base, &start, &tx, digest).await;
}

/// Walk one directory. Returns `false` once the consumer has gone away.
async fn walk_dir(base: &Path, dir: &Path, tx: &ListSender, digest: bool) -> bool {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
        Err(e) => {
            return tx
                .fail(StorageError::enumeration(dir.display().to_string(), e))
                .await
        }
    };

    let mut children = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => children.push(entry),
            Ok(None) => break,
            Err(e) => {
                if !tx
                    .fail(StorageError::enumeration(dir.display().to_string(), e))
                    .await
                {
                    return false;
                }
                break;
            }
        }
    }
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        if tx.is_closed() {
            return false;
        }
        let path = child.path();

        // Follow symlinks to files, but never descend into linked directories.
        let file_type = match child.file_type().await {
            Ok(t) => t,
            Err(e) => {
                let err = StorageError::io(format!("Failed to stat {}", path.display()), e);
                if !tx.fail(err).await {
                    return false;
                }
                continue;
            }
        };
        let is_file = if file_type.is_symlink() {
            match fs::metadata(&path).await {
                Ok(meta) => meta.is_file(),
                // Dangling link
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    let err = StorageError::io(format!("Failed to stat {}", path.display()), e);
                    if !tx.fail(err).await {
                        return false;
                    }
                    continue;
                }
            }
        } else {
            file_type.is_file()
        };

        if file_type.is_dir() {
            if !Box::pin(walk_dir(base, &path, tx, digest)).await {
                return false;
            }
            continue;
        }
        if !is_file {
            continue;
        }

        let key = match relative_key(base, &path) {
            Ok(key) => key,
            Err(e) => {
                if !tx.fail(e).await {
                    return false;
                }
                continue;
            }
        };
        if !tx.accepts(&key) {
            continue;
        }

        let entry = if digest {
            match md5_file(&path).await {
                Ok(sum) => ListEntry::with_md5(key, sum),
                Err(e) => {
                    if !tx.fail(e).await {
                        return false;
                    }
                    continue;
                }
            }
        } else {
            ListEntry::new(key)
        };
        if !tx.emit(entry).await {
            return false;
        }
    }

    true
}

/// `path` relative to `base`, with `/` separators on every platform.
pub(crate) fn relative_key(base: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|e| StorageError::Internal {
        message: format!("Path prefix strip failed: {e}"),
    })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}

/// MD5 of a file's content, read in fixed-size chunks.
pub(crate) async fn md5_file(path: &Path) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)
        .await
        .map_err(|e| StorageError::io(format!("Failed to open {}", path.display()), e))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| StorageError::io(format!("Failed to read {}", path.display()), e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use stowage_core::{match_all, ListStream};
    use tempfile::TempDir;

    async fn walk(base: &Path, prefix: &str, digest: bool) -> Vec<ListEntry> {
        let base = base.to_path_buf();
        let prefix = prefix.to_string();
        ListStream::spawn(4, match_all(), move |tx| walk_tree(base, prefix, tx, digest))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_walk_is_depth_first_and_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("b/inner")).unwrap();
        std::fs::write(tmp.path().join("c.txt"), b"c").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join("b/inner/z.txt"), b"z").unwrap();
        std::fs::write(tmp.path().join("b/y.txt"), b"y").unwrap();

        let paths: Vec<String> = walk(tmp.path(), "", false)
            .await
            .into_iter()
            .map(|e| e.path)
            .collect();
        assert_eq!(paths, vec!["a.txt", "b/inner/z.txt", "b/y.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn test_walk_missing_start_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(walk(tmp.path(), "nope/", true).await.is_empty());
    }

    #[tokio::test]
    async fn test_walk_prefix_naming_a_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("file"), b"x").unwrap();
        assert!(walk(tmp.path(), "file/", true).await.is_empty());
    }

    #[tokio::test]
    async fn test_md5_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("yep");
        std::fs::write(&path, b"yep").unwrap();
        let sum = md5_file(&path).await.unwrap();
        assert_eq!(
            sum,
            vec![0x93, 0x48, 0xae, 0x78, 0x51, 0xcf, 0x3b, 0xa7, 0x98, 0xd9, 0x56, 0x4e, 0xf3, 0x08, 0xec, 0x25]
        );
    }
}
