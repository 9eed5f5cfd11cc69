//! Bounded worker queue with first-error-wins semantics.
//!
//! A [`WorkerQueue`] is created per bulk operation. Each call to
//! [`WorkerQueue::go`] waits for one of N slots and spawns the unit on the
//! tokio runtime. The first unit to fail (by completion order) stores its
//! error and cancels the queue's token: units that have not started yet are
//! skipped, further `go` calls are refused, and units already running are
//! left to finish. [`WorkerQueue::wait`] waits for every slot to be released
//! and returns that first error.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::Result;

/// Runs up to `capacity` fallible units of work at once.
pub struct WorkerQueue {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    parent: CancellationToken,
    cancel: CancellationToken,
    first_error: Arc<Mutex<Option<StorageError>>>,
    dispatched: usize,
}

impl WorkerQueue {
    /// Create a queue running at most `max_workers` units concurrently.
    ///
    /// The queue's token is a child of `parent`: canceling `parent` stops
    /// the queue from accepting work, but a unit failure never cancels
    /// `parent`.
    pub fn new(parent: &CancellationToken, max_workers: usize) -> Self {
        let capacity = max_workers.clamp(1, u32::MAX as usize);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            parent: parent.clone(),
            cancel: parent.child_token(),
            first_error: Arc::new(Mutex::new(None)),
            dispatched: 0,
        }
    }

    /// Maximum number of concurrently running units.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of units accepted so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// The token units can check to stop early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once a unit failed or the parent token was canceled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Schedule a unit of work, waiting for a free slot if all are taken.
    ///
    /// `task` receives the queue's cancellation token. Returns
    /// [`StorageError::Cancelled`] without scheduling anything if the queue
    /// has already been canceled, or is canceled while waiting for a slot.
    pub async fn go<F, Fut>(&mut self, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StorageError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                permit.map_err(|_| StorageError::Cancelled)?
            }
        };

        let token = self.cancel.clone();
        let slot = Arc::clone(&self.first_error);
        let unit = task(token.clone());
        self.dispatched += 1;

        tokio::spawn(async move {
            // Held until the outcome is recorded so `wait` observes it.
            let _permit = permit;

            if token.is_cancelled() {
                debug!("Queue cancelled, skipping unit");
                return;
            }

            let err = match AssertUnwindSafe(unit).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(panic) => StorageError::Internal {
                    message: format!("Worker panicked: {}", panic_message(panic.as_ref())),
                },
            };
            record_failure(&slot, err);
            token.cancel();
        });

        Ok(())
    }

    /// Wait for every dispatched unit and return the first failure.
    ///
    /// Returns [`StorageError::Cancelled`] if the parent token was canceled
    /// and no unit failed.
    pub async fn wait(self) -> Result<()> {
        let _all = self
            .semaphore
            .acquire_many(self.capacity as u32)
            .await
            .map_err(|_| StorageError::Internal {
                message: "Worker queue semaphore closed".to_string(),
            })?;

        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match first {
            Some(err) => Err(err),
            None if self.parent.is_cancelled() => Err(StorageError::Cancelled),
            None => {
                debug!(units = self.dispatched, "Worker queue drained");
                Ok(())
            }
        }
    }
}

/// Store `err` if it is the first failure; otherwise log and drop it.
fn record_failure(slot: &Mutex<Option<StorageError>>, err: StorageError) {
    let mut first = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if first.is_none() {
        debug!(error = %err, "Unit failed, cancelling worker queue");
        *first = Some(err);
    } else {
        warn!(error = %err, "Discarding error after first failure");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_units_succeed() {
        let mut queue = WorkerQueue::new(&CancellationToken::new(), 4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let c = counter.clone();
            queue
                .go(move |_| async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(queue.dispatched(), 20);
        queue.wait().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_empty_queue_waits_immediately() {
        let queue = WorkerQueue::new(&CancellationToken::new(), 8);
        assert!(queue.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        let queue = WorkerQueue::new(&CancellationToken::new(), 0);
        assert_eq!(queue.capacity(), 1);
    }

    #[tokio::test]
    async fn test_first_error_by_completion_order() {
        let mut queue = WorkerQueue::new(&CancellationToken::new(), 2);

        queue
            .go(|_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Err(StorageError::io_msg("slow failure"))
            })
            .await
            .unwrap();
        queue
            .go(|_| async { Err(StorageError::io_msg("fast failure")) })
            .await
            .unwrap();

        let err = queue.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "I/O error: fast failure");
    }

    #[tokio::test]
    async fn test_go_refused_after_failure() {
        let mut queue = WorkerQueue::new(&CancellationToken::new(), 1);

        queue
            .go(|_| async { Err(StorageError::io_msg("boom")) })
            .await
            .unwrap();

        // The only slot frees after the failure has cancelled the queue
        let second = queue.go(|_| async { Ok(()) }).await;
        assert!(matches!(second, Err(StorageError::Cancelled)));
        assert!(queue.is_cancelled());

        let err = queue.wait().await.unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }

    #[tokio::test]
    async fn test_running_units_observe_cancellation() {
        let mut queue = WorkerQueue::new(&CancellationToken::new(), 2);
        let observed = Arc::new(AtomicUsize::new(0));

        let o = observed.clone();
        queue
            .go(move |token| async move {
                token.cancelled().await;
                o.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        queue
            .go(|_| async { Err(StorageError::io_msg("boom")) })
            .await
            .unwrap();

        assert!(queue.wait().await.is_err());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation() {
        let parent = CancellationToken::new();
        let mut queue = WorkerQueue::new(&parent, 4);
        parent.cancel();

        let result = queue.go(|_| async { Ok(()) }).await;
        assert!(matches!(result, Err(StorageError::Cancelled)));
        assert!(matches!(queue.wait().await, Err(StorageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_failure_does_not_cancel_parent() {
        let parent = CancellationToken::new();
        let mut queue = WorkerQueue::new(&parent, 1);
        queue
            .go(|_| async { Err(StorageError::io_msg("boom")) })
            .await
            .unwrap();
        assert!(queue.wait().await.is_err());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_panicking_unit_is_recorded() {
        let mut queue = WorkerQueue::new(&CancellationToken::new(), 2);
        let explode = true;
        queue
            .go(move |_| async move {
                if explode {
                    panic!("unit exploded");
                }
                Ok(())
            })
            .await
            .unwrap();

        match queue.wait().await.unwrap_err() {
            StorageError::Internal { message } => {
                assert!(message.contains("unit exploded"), "Got: {message}");
            }
            other => panic!("Expected Internal, got: {:?}", other),
        }
    }
}
