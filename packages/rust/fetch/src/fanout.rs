//! Bounded-concurrency fan-out over independent work items.
//!
//! Used by the fact-gathering step to fetch candidate source pages: at most
//! `max_concurrency` workers run at once, each wrapped in a per-item timeout.
//! Items that fail or time out are dropped from the result set and reported
//! in a parallel failure list — never as an error. An empty result set is a
//! valid (if degraded) outcome the caller must handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Outcome of a fan-out run.
#[derive(Debug)]
pub struct FanOutOutcome<T, R> {
    /// Successful results, re-sorted to input order so downstream truncation
    /// is deterministic.
    pub results: Vec<R>,
    /// Items that failed or timed out, with the reason. Informational only.
    pub failed: Vec<(T, String)>,
}

impl<T, R> FanOutOutcome<T, R> {
    /// Whether every item was dropped.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Bounded fan-out executor.
#[derive(Debug, Clone)]
pub struct FanOut {
    max_concurrency: usize,
    per_item_timeout: Duration,
}

impl FanOut {
    /// Create a fan-out with the given concurrency ceiling and per-item timeout.
    ///
    /// A ceiling of zero is clamped to one.
    pub fn new(max_concurrency: usize, per_item_timeout: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            per_item_timeout,
        }
    }

    /// Run `worker` over all `items` under the concurrency ceiling.
    ///
    /// A worker returning `None` counts as a dropped item. The call returns
    /// once every item has either completed or been dropped; completion order
    /// across items is unspecified, but `results` is re-sorted to input order.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, worker: F) -> FanOutOutcome<T, R>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Option<R>> + Send,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let timeout = self.per_item_timeout;

        let mut handles = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let sem = semaphore.clone();
            let worker = worker.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");

                match tokio::time::timeout(timeout, worker(item.clone())).await {
                    Ok(Some(result)) => (index, item, Ok(result)),
                    Ok(None) => (index, item, Err("worker returned no result".to_string())),
                    Err(_) => (index, item, Err(format!("timed out after {timeout:?}"))),
                }
            }));
        }

        let mut completed: Vec<(usize, R)> = Vec::new();
        let mut failed: Vec<(T, String)> = Vec::new();

        for handle in handles {
            match handle.await {
                Ok((index, _item, Ok(result))) => completed.push((index, result)),
                Ok((_index, item, Err(reason))) => {
                    debug!(reason = %reason, "fan-out item dropped");
                    failed.push((item, reason));
                }
                Err(e) => {
                    // A panicked worker drops its item; the item itself is
                    // gone with the task, so only the reason is recorded.
                    warn!(error = %e, "fan-out worker task failed");
                }
            }
        }

        completed.sort_by_key(|(index, _)| *index);

        FanOutOutcome {
            results: completed.into_iter().map(|(_, r)| r).collect(),
            failed,
        }
    }
}
