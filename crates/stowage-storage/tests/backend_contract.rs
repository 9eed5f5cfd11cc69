//! Integration test: Backend contract, disk and object store.
//!
//! The same sequence of calls against a local directory and an in-memory
//! bucket → identical observable results.

use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::memory::InMemory;

use stowage_core::{ListEntry, StorageBackend, StorageError};
use stowage_storage::{DiskStorage, ObjectStorage};

async fn backends() -> (Vec<(&'static str, Arc<dyn StorageBackend>)>, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().unwrap();
    let disk = DiskStorage::new(tmp.path()).await.unwrap().with_max_workers(8);
    let object = ObjectStorage::from_store(Arc::new(InMemory::new()), "memory://contract")
        .with_prefix("root")
        .with_max_workers(8);
    let disk: Arc<dyn StorageBackend> = Arc::new(disk);
    let object: Arc<dyn StorageBackend> = Arc::new(object);
    (vec![("disk", disk), ("object", object)], tmp)
}

async fn collect(stream: stowage_core::ListStream) -> Vec<ListEntry> {
    let mut entries: Vec<ListEntry> = stream.try_collect().await.unwrap();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

#[tokio::test]
async fn test_get_missing_is_not_exist() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        let err = storage.get("does-not-exist").await.unwrap_err();
        assert!(
            matches!(err, StorageError::NotExist { .. }),
            "{name}: expected NotExist, got {err:?}"
        );
    }
}

#[tokio::test]
async fn test_put_get_round_trip() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        storage.put("some-file", Bytes::from("hello")).await.unwrap();
        storage
            .put("subdirectory/another-file", Bytes::from("hello again"))
            .await
            .unwrap();

        assert_eq!(storage.get("some-file").await.unwrap(), Bytes::from("hello"), "{name}");
        assert_eq!(
            storage.get("subdirectory/another-file").await.unwrap(),
            Bytes::from("hello again"),
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_list_empty_namespace() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        assert!(storage.list("").await.unwrap().is_empty(), "{name}");
        assert!(collect(storage.list_recursive("")).await.is_empty(), "{name}");
        let mut matches = storage.match_filenames_recursive("", "replicate-metadata.json");
        assert!(matches.recv().await.is_none(), "{name}");
    }
}

#[tokio::test]
async fn test_list_recursive_under_prefix() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        storage
            .put("checkpoints/abc123.json", Bytes::from("yep"))
            .await
            .unwrap();
        storage
            .put("experiments/def456.json", Bytes::from("nope"))
            .await
            .unwrap();

        let entries = collect(storage.list_recursive("checkpoints")).await;
        assert_eq!(entries.len(), 1, "{name}");
        assert_eq!(entries[0].path, "checkpoints/abc123.json", "{name}");
        if name == "disk" {
            assert_eq!(
                entries[0].md5_hex().as_deref(),
                Some("9348ae7851cf3ba798d9564ef308ec25")
            );
        }

        let all = collect(storage.list_recursive("")).await;
        let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["checkpoints/abc123.json", "experiments/def456.json"],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_match_filenames_recursive() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        for path in [
            "experiments/a/replicate-metadata.json",
            "experiments/b/replicate-metadata.json",
            "experiments/b/other.json",
            "experiments/c/xreplicate-metadata.json",
        ] {
            storage.put(path, Bytes::from("{}")).await.unwrap();
        }

        let matches = collect(
            storage.match_filenames_recursive("experiments", "replicate-metadata.json"),
        )
        .await;
        let paths: Vec<&str> = matches.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "experiments/a/replicate-metadata.json",
                "experiments/b/replicate-metadata.json"
            ],
            "{name}"
        );
    }
}

#[tokio::test]
async fn test_list_stream_can_be_abandoned() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        for i in 0..50 {
            storage
                .put(&format!("many/obj-{i:02}"), Bytes::from("x"))
                .await
                .unwrap();
        }
        let first: Vec<_> = storage.list_recursive("many").take(3).collect().await;
        assert_eq!(first.len(), 3, "{name}");
        assert!(first.iter().all(|r| r.is_ok()), "{name}");
    }
}

#[tokio::test]
async fn test_delete_twice() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        storage.put("runs/a/1.json", Bytes::from("1")).await.unwrap();
        storage.put("runs/b/2.json", Bytes::from("2")).await.unwrap();
        storage.put("keep.json", Bytes::from("k")).await.unwrap();

        storage.delete("runs").await.unwrap();
        storage.delete("runs").await.unwrap();

        assert!(collect(storage.list_recursive("runs")).await.is_empty(), "{name}");
        assert_eq!(storage.get("keep.json").await.unwrap(), Bytes::from("k"), "{name}");
    }
}

#[tokio::test]
async fn test_delete_nothing_succeeds() {
    let (backends, _tmp) = backends().await;
    for (name, storage) in backends {
        storage
            .delete("never-written")
            .await
            .unwrap_or_else(|e| panic!("{name}: {e}"));
    }
}
