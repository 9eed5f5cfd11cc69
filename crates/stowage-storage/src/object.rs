//! Remote object storage backend.
//!
//! [`ObjectStorage`] implements the [`StorageBackend`] trait using the
//! `object_store` crate. It opens `s3://` buckets (AWS S3, MinIO and other
//! S3-compatible endpoints) and `gs://` buckets. Bulk operations list the
//! prefix once and apply a per-object request through the worker queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use percent_encoding::percent_decode_str;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use stowage_core::config::{DEFAULT_LIST_BUFFER, DEFAULT_MAX_WORKERS};
use stowage_core::error::StorageError;
use stowage_core::path::{join, normalize_prefix, relative_to, validate_path};
use stowage_core::storage::StorageBackend;
use stowage_core::{
    apply_recursive, match_all, ListEntry, ListSender, ListStream, PathFilter, Result,
    WorkerQueue,
};

use crate::walk::walk_tree;

/// Part size for streamed uploads; also the most a single upload buffers.
const UPLOAD_BUFFER: usize = 5 * 1024 * 1024;

/// What a listing producer emits for each object.
#[derive(Debug, Clone, Copy)]
enum Keys {
    /// Decoded paths relative to the backend root, as callers pass them to `get`.
    Relative,
    /// Full store locations exactly as listed, for per-object requests.
    Locations,
}

/// A [`StorageBackend`] backed by a bucket in a remote object store.
///
/// Configured from a URL like `s3://bucket/prefix?region=eu-west-1` or
/// `gs://bucket/prefix`. Every path is resolved under the URL's prefix.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    url: String,
    prefix: String,
    max_workers: usize,
    list_buffer: usize,
}

impl ObjectStorage {
    /// Create a new `ObjectStorage` from a bucket URL.
    ///
    /// # URL Format
    ///
    /// `s3://bucket/prefix?region=us-east-1&endpoint=http://minio:9000`
    /// or `gs://bucket/prefix`.
    ///
    /// Credentials come from the environment: `AWS_ACCESS_KEY_ID`,
    /// `AWS_SECRET_ACCESS_KEY` and `AWS_REGION` for S3,
    /// `GOOGLE_SERVICE_ACCOUNT` or application default credentials for GCS.
    pub fn new(url: &str) -> Result<Self> {
        let (scheme, bucket, prefix) = parse_bucket_url(url)?;

        let store: Arc<dyn ObjectStore> = match scheme {
            "s3" => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&bucket);
                if let Some(region) = extract_query_param(url, "region") {
                    builder = builder.with_region(&region);
                }
                // MinIO and other S3-compatible services
                if let Some(endpoint) = extract_query_param(url, "endpoint") {
                    builder = builder.with_endpoint(&endpoint).with_allow_http(true);
                }
                Arc::new(builder.build().map_err(|e| StorageError::Config {
                    message: format!("Failed to create S3 client for {url}: {e}"),
                })?)
            }
            _ => {
                let builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&bucket);
                Arc::new(builder.build().map_err(|e| StorageError::Config {
                    message: format!("Failed to create GCS client for {url}: {e}"),
                })?)
            }
        };

        debug!(bucket = %bucket, prefix = %prefix, "ObjectStorage initialised");

        let root_url = if prefix.is_empty() {
            format!("{scheme}://{bucket}")
        } else {
            format!("{scheme}://{bucket}/{prefix}")
        };
        Ok(Self::from_store(store, root_url).with_prefix(prefix))
    }

    /// Wrap an already-built store. `url` is what [`StorageBackend::root_url`] reports.
    pub fn from_store(store: Arc<dyn ObjectStore>, url: impl Into<String>) -> Self {
        Self {
            store,
            url: url.into(),
            prefix: String::new(),
            max_workers: DEFAULT_MAX_WORKERS,
            list_buffer: DEFAULT_LIST_BUFFER,
        }
    }

    /// Resolve every path under `prefix` inside the store.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    /// Set the worker queue capacity used by bulk operations.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set how many listing results may be buffered ahead of the consumer.
    pub fn with_list_buffer(mut self, list_buffer: usize) -> Self {
        self.list_buffer = list_buffer;
        self
    }

    fn full_path(&self, key: &str) -> Result<ObjectPath> {
        validate_path(key)?;
        Ok(object_path(&self.prefix, key))
    }

    /// Stream every object under `prefix`.
    fn stream_objects(&self, prefix: String, filter: PathFilter, keys: Keys) -> ListStream {
        let store = self.store.clone();
        let root = self.prefix.clone();
        ListStream::spawn(self.list_buffer, filter, move |tx| {
            list_objects(store, root, prefix, tx, keys)
        })
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn root_url(&self) -> String {
        self.url.clone()
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get(&self, path: &str) -> Result<Bytes> {
        let location = self.full_path(path)?;
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| map_store_error(path, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::io(format!("Failed to read body of {path}"), e))?;
        debug!("Get {} bytes from {}", bytes.len(), path);
        Ok(bytes)
    }

    #[instrument(skip(self, data), fields(path = %path, size = data.len()))]
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let location = self.full_path(path)?;
        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| StorageError::io(format!("Failed to write {path}"), e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(prefix = %prefix))]
    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        validate_path(prefix)?;
        let dir = object_path(&self.prefix, prefix);
        let listing = self
            .store
            .list_with_delimiter(non_empty(&dir))
            .await
            .map_err(|e| StorageError::enumeration(prefix, e))?;

        let root = ObjectPath::from(self.prefix.as_str());
        let mut results = listing
            .objects
            .iter()
            .filter_map(|meta| location_key(&root, &meta.location))
            .collect::<Result<Vec<String>>>()?;
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
        self.stream_objects(prefix, filter, Keys::Relative)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<()> {
        validate_path(path)?;

        // The path itself may name an object
        let exact = path.trim_end_matches('/');
        if !exact.is_empty() {
            match self.store.delete(&object_path(&self.prefix, exact)).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(StorageError::io(format!("Failed to delete {exact}"), e)),
            }
        }

        let entries = self.stream_objects(normalize_prefix(path), match_all(), Keys::Locations);
        let queue = WorkerQueue::new(&CancellationToken::new(), self.max_workers);
        let root = ObjectPath::from(self.prefix.as_str());
        let root_url = self.url.clone();

        let deleted = apply_recursive(entries, queue, |entry| {
            let store = self.store.clone();
            let listed = listed_location(&root, &entry.path);
            let root_url = root_url.clone();
            async move {
                let (location, key) = match listed {
                    Ok(listed) => listed,
                    Err(e) => return Err(e),
                };
                match store.delete(&location).await {
                    Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                    Err(e) => Err(StorageError::apply(
                        key.clone(),
                        root_url,
                        StorageError::io(format!("Failed to delete {key}"), e),
                    )),
                }
            }
        })
        .await?;

        debug!(deleted, "Deleted objects under {}", path);
        Ok(())
    }

    #[instrument(skip(self), fields(storage_dir = %storage_dir, local_dir = %local_dir.display()))]
    async fn get_directory(&self, storage_dir: &str, local_dir: &Path) -> Result<()> {
        let prefix = normalize_prefix(storage_dir);
        validate_path(&prefix)?;

        let entries = self.stream_objects(prefix.clone(), match_all(), Keys::Locations);
        let queue = WorkerQueue::new(&CancellationToken::new(), self.max_workers);
        let root = ObjectPath::from(self.prefix.as_str());
        let root_url = self.url.clone();

        let copied = apply_recursive(entries, queue, |entry| {
            let store = self.store.clone();
            let listed = listed_location(&root, &entry.path);
            let prefix = prefix.clone();
            let local_dir = local_dir.to_path_buf();
            let root_url = root_url.clone();
            async move {
                let (location, key) = match listed {
                    Ok(listed) => listed,
                    Err(e) => return Err(e),
                };
                let rel = relative_to(&prefix, &key).unwrap_or(key.as_str());
                // Decoded keys may spell segments such as `..`
                let copied = match validate_path(rel) {
                    Ok(()) => download(store, &location, &key, &local_dir.join(rel)).await,
                    Err(e) => Err(e),
                };
                copied.map_err(|e| StorageError::apply(key.clone(), root_url, e))
            }
        })
        .await?;

        info!(copied, "Copied {} to local directory", storage_dir);
        Ok(())
    }

    #[instrument(skip(self), fields(local_path = %local_path.display(), storage_path = %storage_path))]
    async fn put_path(&self, local_path: &Path, storage_path: &str) -> Result<()> {
        validate_path(storage_path)?;
        let meta = fs::metadata(local_path).await.map_err(|e| {
            StorageError::from_local_io(
                &local_path.display().to_string(),
                format!("Failed to stat {}", local_path.display()),
                e,
            )
        })?;

        if !meta.is_dir() {
            let location = object_path(&self.prefix, storage_path);
            upload(self.store.clone(), local_path, location, storage_path).await?;
            debug!("Put file {} to {}", local_path.display(), storage_path);
            return Ok(());
        }

        let source: PathBuf = local_path.to_path_buf();
        let walk_source = source.clone();
        let entries = ListStream::spawn(self.list_buffer, match_all(), move |tx| {
            walk_tree(walk_source, String::new(), tx, false)
        });
        let queue = WorkerQueue::new(&CancellationToken::new(), self.max_workers);
        let root_url = self.url.clone();

        let uploaded = apply_recursive(entries, queue, |entry| {
            let store = self.store.clone();
            let src = source.join(&entry.path);
            let key = join(storage_path, &entry.path);
            let location = object_path(&self.prefix, &key);
            let root_url = root_url.clone();
            async move {
                upload(store, &src, location, &key)
                    .await
                    .map_err(|e| StorageError::apply(key, root_url, e))
            }
        })
        .await?;

        info!(uploaded, "Put local directory to {}", storage_path);
        Ok(())
    }
}

async fn list_objects(
    store: Arc<dyn ObjectStore>,
    root: String,
    prefix: String,
    tx: ListSender,
    keys: Keys,
) {
    let root_path = ObjectPath::from(root.as_str());
    let location = object_path(&root, &prefix);
    let mut objects = store.list(non_empty(&location));
    loop {
        match objects.try_next().await {
            Ok(Some(meta)) => {
                let entry = match keys {
                    Keys::Locations => ListEntry::new(meta.location.to_string()),
                    Keys::Relative => match location_key(&root_path, &meta.location) {
                        Some(Ok(key)) => ListEntry::new(key),
                        Some(Err(e)) => {
                            if !tx.fail(e).await {
                                return;
                            }
                            continue;
                        }
                        None => continue,
                    },
                };
                if !tx.emit(entry).await {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                // A failed page ends the listing
                tx.fail(StorageError::enumeration(prefix, e)).await;
                return;
            }
        }
    }
}

async fn download(
    store: Arc<dyn ObjectStore>,
    location: &ObjectPath,
    key: &str,
    dest: &Path,
) -> Result<()> {
    let result = store
        .get(location)
        .await
        .map_err(|e| map_store_error(key, e))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            StorageError::io(format!("Failed to create directory {}", parent.display()), e)
        })?;
    }
    let mut file = fs::File::create(dest)
        .await
        .map_err(|e| StorageError::io(format!("Failed to create {}", dest.display()), e))?;

    let mut body = result.into_stream();
    while let Some(chunk) = body
        .try_next()
        .await
        .map_err(|e| StorageError::io(format!("Failed to read body of {key}"), e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| StorageError::io(format!("Failed to write {}", dest.display()), e))?;
    }
    file.flush()
        .await
        .map_err(|e| StorageError::io(format!("Failed to flush {}", dest.display()), e))?;
    Ok(())
}

/// Stream a local file into the store, one part at a time.
async fn upload(
    store: Arc<dyn ObjectStore>,
    src: &Path,
    location: ObjectPath,
    key: &str,
) -> Result<()> {
    let mut file = fs::File::open(src).await.map_err(|e| {
        StorageError::from_local_io(
            &src.display().to_string(),
            format!("Failed to open {}", src.display()),
            e,
        )
    })?;

    let mut writer = BufWriter::with_capacity(store, location, UPLOAD_BUFFER);
    let written = match tokio::io::copy(&mut file, &mut writer).await {
        Ok(_) => writer.shutdown().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(abort_err) = writer.abort().await {
            warn!(error = %abort_err, "Failed to abort upload of {}", key);
        }
        return Err(StorageError::io(
            format!("Failed to upload {} to {key}", src.display()),
            e,
        ));
    }
    Ok(())
}

fn map_store_error(key: &str, err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::NotFound { .. } => StorageError::NotExist {
            path: key.to_string(),
        },
        other => StorageError::io(format!("Failed to read {key}"), other),
    }
}

fn non_empty(path: &ObjectPath) -> Option<&ObjectPath> {
    if path.as_ref().is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Location of `key` in the store, below the backend's `root` prefix.
pub(crate) fn object_path(root: &str, key: &str) -> ObjectPath {
    let key = key.trim_matches('/');
    match (root.is_empty(), key.is_empty()) {
        (true, _) => ObjectPath::from(key),
        (false, true) => ObjectPath::from(root),
        (false, false) => ObjectPath::from(format!("{root}/{key}")),
    }
}

/// Decoded key of a store location relative to `root`.
///
/// `None` if the location is not strictly below `root`.
pub(crate) fn location_key(root: &ObjectPath, location: &ObjectPath) -> Option<Result<String>> {
    let mut segments = Vec::new();
    for part in location.prefix_match(root)? {
        match percent_decode_str(part.as_ref()).decode_utf8() {
            Ok(segment) => segments.push(segment.into_owned()),
            Err(e) => {
                return Some(Err(StorageError::io(
                    format!("Object key is not valid UTF-8: {location}"),
                    e,
                )))
            }
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(Ok(segments.join("/")))
}

/// A location emitted by a [`Keys::Locations`] listing, with its decoded key.
fn listed_location(root: &ObjectPath, raw: &str) -> Result<(ObjectPath, String)> {
    let location = ObjectPath::parse(raw).map_err(|e| StorageError::Internal {
        message: format!("Store listed an unparsable location {raw}: {e}"),
    })?;
    let key = match location_key(root, &location) {
        Some(key) => key?,
        None => raw.to_string(),
    };
    Ok((location, key))
}

/// Parse a bucket URL into `(scheme, bucket, prefix)`.
///
/// `s3://bucket/prefix/path` → `("s3", "bucket", "prefix/path")`
/// `gs://bucket` → `("gs", "bucket", "")`
pub(crate) fn parse_bucket_url(url: &str) -> Result<(&'static str, String, String)> {
    let (scheme, stripped) = if let Some(rest) = url.strip_prefix("s3://") {
        ("s3", rest)
    } else if let Some(rest) = url.strip_prefix("gs://") {
        ("gs", rest)
    } else {
        return Err(StorageError::Config {
            message: format!("Bucket URL must start with 's3://' or 'gs://': {url}"),
        });
    };

    // Remove query string before parsing path
    let path_part = stripped.split('?').next().unwrap_or(stripped);

    let mut parts = path_part.splitn(2, '/');
    let bucket = parts.next().unwrap_or("").to_string();
    let prefix = parts.next().unwrap_or("").trim_matches('/').to_string();

    if bucket.is_empty() {
        return Err(StorageError::Config {
            message: format!("Bucket URL must include a bucket name: {url}"),
        });
    }

    Ok((scheme, bucket, prefix))
}

/// Extract a query parameter value from a URL.
fn extract_query_param(url: &str, param: &str) -> Option<String> {
    let query = url.split('?').nth(1)?;
    for pair in query.split('&') {
        let mut kv = pair.splitn(2, '=');
        if kv.next()? == param {
            return kv.next().map(|v| v.to_string());
        }
    }
    None
}
