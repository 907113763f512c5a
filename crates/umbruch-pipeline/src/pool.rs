// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded worker pool for per-page and per-image work.
//
// CPU-bound items run on tokio's blocking threads. A semaphore bounds how many
// run at once; the pool can be cloned and shared so that several pipelines
// draw from one budget. Results are slotted back by item index, so callers
// see input order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use umbruch_core::{Result, UmbruchError};

use crate::cancel::CancellationFlag;

/// How one item of a pool run ended.
#[derive(Debug)]
pub enum ItemOutcome<R> {
    Done(R),
    Failed(UmbruchError),
    /// The item exceeded its budget. Its blocking thread finishes in the
    /// background and the result is discarded.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let size = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held by any job.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `work` over `items`, at most `size` at a time, each within `timeout`.
    ///
    /// `on_done(completed, total)` fires as each item finishes. Returns
    /// `Err(Cancelled)` when the flag is raised during the run.
    pub async fn map<T, R, F>(
        &self,
        items: Vec<T>,
        timeout: Duration,
        cancel: &CancellationFlag,
        work: F,
        mut on_done: impl FnMut(usize, usize),
    ) -> Result<Vec<ItemOutcome<R>>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Result<R> + Send + Sync + 'static,
    {
        cancel.check()?;
        let total = items.len();
        let work = Arc::new(work);
        let mut running = FuturesUnordered::new();

        for (index, item) in items.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            let work = Arc::clone(&work);
            let cancel = cancel.clone();
            running.push(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, ItemOutcome::Failed(UmbruchError::Cancelled));
                };
                if cancel.is_cancelled() {
                    return (index, ItemOutcome::Failed(UmbruchError::Cancelled));
                }
                let handle = tokio::task::spawn_blocking(move || work(item));
                let outcome = match tokio::time::timeout(timeout, handle).await {
                    Ok(Ok(Ok(result))) => ItemOutcome::Done(result),
                    Ok(Ok(Err(err))) => ItemOutcome::Failed(err),
                    Ok(Err(join_err)) => ItemOutcome::Failed(UmbruchError::Io(std::io::Error::other(
                        format!("worker task failed: {}", join_err),
                    ))),
                    Err(_) => ItemOutcome::TimedOut,
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<ItemOutcome<R>>> = (0..total).map(|_| None).collect();
        let mut completed = 0;
        while let Some((index, outcome)) = running.next().await {
            if let ItemOutcome::TimedOut = outcome {
                warn!(item = index, budget = ?timeout, "Worker item timed out");
            }
            slots[index] = Some(outcome);
            completed += 1;
            on_done(completed, total);
        }
        cancel.check()?;

        debug!(items = total, workers = self.size, "Worker pool run finished");
        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or(ItemOutcome::Failed(UmbruchError::Cancelled)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn results_keep_input_order() {
        let pool = WorkerPool::new(3);
        let outcomes = pool
            .map(
                vec![30u64, 1, 15, 5],
                Duration::from_secs(5),
                &CancellationFlag::new(),
                |delay| {
                    std::thread::sleep(Duration::from_millis(delay));
                    Ok(delay * 2)
                },
                |_, _| {},
            )
            .await
            .expect("pool run");
        let values: Vec<u64> = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                ItemOutcome::Done(value) => value,
                other => panic!("unexpected outcome {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![60, 2, 30, 10]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (Arc::clone(&active), Arc::clone(&peak));
        pool.map(
            (0..8).collect::<Vec<_>>(),
            Duration::from_secs(5),
            &CancellationFlag::new(),
            move |_| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            |_, _| {},
        )
        .await
        .expect("pool run");
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_reported_per_item() {
        let pool = WorkerPool::new(2);
        let mut progress = Vec::new();
        let outcomes = pool
            .map(
                vec![0u32, 1, 2],
                Duration::from_millis(200),
                &CancellationFlag::new(),
                |item| match item {
                    0 => Ok(item),
                    1 => Err(UmbruchError::Recognition("unreadable".into())),
                    _ => {
                        std::thread::sleep(Duration::from_millis(1500));
                        Ok(item)
                    }
                },
                |done, total| progress.push((done, total)),
            )
            .await
            .expect("pool run");
        assert!(matches!(outcomes[0], ItemOutcome::Done(0)));
        assert!(matches!(outcomes[1], ItemOutcome::Failed(UmbruchError::Recognition(_))));
        assert!(matches!(outcomes[2], ItemOutcome::TimedOut));
        assert_eq!(progress.last(), Some(&(3, 3)));
    }

    #[tokio::test]
    async fn cancelled_flag_stops_the_run() {
        let pool = WorkerPool::new(2);
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = pool
            .map(vec![1, 2], Duration::from_secs(1), &cancel, Ok::<i32, UmbruchError>, |_, _| {})
            .await;
        assert!(matches!(result, Err(UmbruchError::Cancelled)));
    }
}
