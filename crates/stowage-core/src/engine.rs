//! The traversal-and-apply engine shared by bulk operations.
//!
//! Delete and directory copies enumerate entries with a [`ListStream`] and
//! apply a per-entry function through a [`WorkerQueue`]:
//!
//! ```text
//! Enumerating -> (Filtering -> Dispatching)* -> Draining -> Completed | Failed
//! ```
//!
//! Nothing is rolled back on failure: entries already applied stay applied.

use std::future::Future;

use tracing::debug;

use crate::queue::WorkerQueue;
use crate::stream::ListStream;
use crate::types::ListEntry;
use crate::Result;

/// Apply `f` to every entry of `entries` with bounded concurrency.
///
/// Returns the number of dispatched units. Fails with the first unit
/// failure, or with the enumeration error if listing failed before any
/// unit did. Zero entries is success.
pub async fn apply_recursive<F, Fut>(
    mut entries: ListStream,
    mut queue: WorkerQueue,
    f: F,
) -> Result<usize>
where
    F: Fn(ListEntry) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let cancelled = queue.cancellation_token();
    loop {
        // A failed unit stops the traversal even while the listing is stalled
        let item = tokio::select! {
            biased;
            _ = cancelled.cancelled() => break,
            item = entries.recv() => item,
        };
        let Some(item) = item else { break };
        let entry = match item {
            Ok(entry) => entry,
            Err(enumeration_err) => {
                // Stop the producer, let in-flight units finish
                drop(entries);
                return match queue.wait().await {
                    Err(unit_err) => Err(unit_err),
                    Ok(()) => Err(enumeration_err),
                };
            }
        };

        let unit = f(entry);
        if let Err(refused) = queue.go(move |_| unit).await {
            drop(entries);
            return Err(queue.wait().await.err().unwrap_or(refused));
        }
    }

    drop(entries);
    let dispatched = queue.dispatched();
    queue.wait().await?;
    debug!(dispatched, "Apply completed");
    Ok(dispatched)
}
