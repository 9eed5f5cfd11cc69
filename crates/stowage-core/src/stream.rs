//! Lazy, cancelable listing streams.
//!
//! A traversal runs as a producer task writing into a bounded channel. The
//! consumer holds the [`ListStream`]; a slow consumer throttles the producer,
//! and dropping the stream makes the producer's next send fail, which ends
//! the traversal. Streams are single-pass: start a new traversal for a
//! second pass.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::StorageError;
use crate::path::base_name;
use crate::types::{ListEntry, ListResult};

/// Predicate deciding which discovered paths are emitted.
pub type PathFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Filter accepting every path.
pub fn match_all() -> PathFilter {
    Arc::new(|_| true)
}

/// Filter accepting paths whose final segment equals `filename`.
pub fn match_filename(filename: impl Into<String>) -> PathFilter {
    let filename = filename.into();
    Arc::new(move |path| base_name(path) == filename)
}

/// Producer half of a listing stream.
#[derive(Clone)]
pub struct ListSender {
    tx: mpsc::Sender<ListResult>,
    filter: PathFilter,
}

impl ListSender {
    /// Emit `entry` if it passes the filter.
    ///
    /// Returns `false` once the consumer has gone away; the producer should
    /// stop walking.
    pub async fn emit(&self, entry: ListEntry) -> bool {
        if !(self.filter)(&entry.path) {
            return !self.tx.is_closed();
        }
        self.tx.send(Ok(entry)).await.is_ok()
    }

    /// Report an enumeration failure for one item without ending the stream.
    pub async fn fail(&self, err: StorageError) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }

    /// True if `path` would be emitted. Lets producers skip work (such as
    /// computing a digest) for entries that are filtered out anyway.
    pub fn accepts(&self, path: &str) -> bool {
        (self.filter)(path)
    }

    /// True once the consumer dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half of a listing stream.
pub struct ListStream {
    rx: mpsc::Receiver<ListResult>,
}

impl ListStream {
    /// Create a connected sender/stream pair with room for `buffer` items.
    pub fn channel(buffer: usize, filter: PathFilter) -> (ListSender, ListStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (ListSender { tx, filter }, ListStream { rx })
    }

    /// Spawn `producer` on the runtime and return the stream it feeds.
    ///
    /// The stream ends when the producer returns.
    pub fn spawn<F, Fut>(buffer: usize, filter: PathFilter, producer: F) -> Self
    where
        F: FnOnce(ListSender) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, stream) = Self::channel(buffer, filter);
        tokio::spawn(producer(tx));
        stream
    }

    /// A stream that ends immediately.
    pub fn empty() -> Self {
        let (_, stream) = Self::channel(1, match_all());
        stream
    }

    /// Receive the next item, or `None` once traversal is complete.
    pub async fn recv(&mut self) -> Option<ListResult> {
        self.rx.recv().await
    }
}

impl Stream for ListStream {
    type Item = ListResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_match_filename() {
        let filter = match_filename("replicate-metadata.json");
        assert!(filter("experiments/abc/replicate-metadata.json"));
        assert!(filter("replicate-metadata.json"));
        assert!(!filter("experiments/abc/other.json"));
        assert!(!filter("experiments/xreplicate-metadata.json"));
    }

    #[tokio::test]
    async fn test_stream_ends_when_producer_returns() {
        let mut stream = ListStream::spawn(4, match_all(), |tx| async move {
            tx.emit(ListEntry::new("a")).await;
            tx.emit(ListEntry::new("b")).await;
        });
        assert_eq!(stream.recv().await.unwrap().unwrap().path, "a");
        assert_eq!(stream.recv().await.unwrap().unwrap().path, "b");
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_filter_applied_on_emit() {
        let stream = ListStream::spawn(4, match_filename("keep"), |tx| async move {
            tx.emit(ListEntry::new("x/keep")).await;
            tx.emit(ListEntry::new("x/drop")).await;
            tx.emit(ListEntry::new("y/keep")).await;
        });
        let paths: Vec<String> = stream.map(|r| r.unwrap().path).collect().await;
        assert_eq!(paths, vec!["x/keep", "y/keep"]);
    }

    #[tokio::test]
    async fn test_errors_are_in_stream() {
        let mut stream = ListStream::spawn(4, match_all(), |tx| async move {
            tx.fail(StorageError::io_msg("page failed")).await;
            tx.emit(ListEntry::new("after")).await;
        });
        assert!(stream.recv().await.unwrap().is_err());
        assert_eq!(stream.recv().await.unwrap().unwrap().path, "after");
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let mut stream = ListStream::spawn(1, match_all(), |tx| async move {
            let mut sent = 0usize;
            for i in 0..10_000 {
                if !tx.emit(ListEntry::new(format!("obj-{i}"))).await {
                    break;
                }
                sent += 1;
            }
            let _ = done_tx.send(sent);
        });

        assert!(stream.recv().await.is_some());
        drop(stream);

        let sent = done_rx.await.unwrap();
        assert!(sent < 10_000, "producer kept going after consumer left: {sent}");
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut stream = ListStream::empty();
        assert!(stream.recv().await.is_none());
    }
}
