//! Task Pool
//!
//! Runs a queue of independent async jobs with at most `limit` in flight.
//! A fixed set of long-lived workers pull from one shared queue, so a free
//! slot is refilled as soon as any job settles. All workers are polled by the
//! calling task; parallelism comes from overlapping I/O waits.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::future::join_all;

use super::PoolProgress;
use crate::core::CoreResult;

/// Settled result of one submitted item
#[derive(Debug)]
pub struct TaskOutcome<T> {
    /// Position of the item in the submitted list
    pub index: usize,
    pub result: CoreResult<T>,
}

/// Bounded-concurrency executor
#[derive(Clone, Copy, Debug)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    /// Create a pool; a zero limit is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `task` over every item and resolves once all of them have settled.
    ///
    /// A failing item becomes an `Err` outcome and never affects its siblings.
    /// Outcomes are returned in completion order; `index` identifies the item.
    /// `on_progress` is called once per settled item.
    pub async fn run<I, T, F, Fut, P>(
        &self,
        items: Vec<I>,
        task: F,
        on_progress: P,
    ) -> Vec<TaskOutcome<T>>
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = CoreResult<T>>,
        P: Fn(PoolProgress),
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let queue: Mutex<VecDeque<(usize, I)>> = Mutex::new(items.into_iter().enumerate().collect());
        let outcomes: Mutex<Vec<TaskOutcome<T>>> = Mutex::new(Vec::with_capacity(total));
        let completed = AtomicUsize::new(0);

        let workers = (0..self.limit.min(total)).map(|worker| {
            let queue = &queue;
            let outcomes = &outcomes;
            let completed = &completed;
            let task = &task;
            let on_progress = &on_progress;
            async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, item)) = next else {
                        break;
                    };

                    let result = task(item).await;
                    if let Err(e) = &result {
                        tracing::warn!("Pool worker {} item {} failed: {}", worker, index, e);
                    }
                    outcomes
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(TaskOutcome { index, result });

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    on_progress(PoolProgress {
                        completed: done,
                        total,
                    });
                }
            }
        });

        join_all(workers).await;

        outcomes.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreError;
    use std::sync::Arc;
    use std::time::Duration;

    struct InFlight {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl InFlight {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_limit_is_never_exceeded_and_failures_are_isolated() {
        let pool = TaskPool::new(3);
        let tracker = InFlight::new();
        let items: Vec<usize> = (0..10).collect();

        let outcomes = pool
            .run(
                items,
                |i| {
                    let tracker = tracker.clone();
                    async move {
                        tracker.enter();
                        // Uneven durations so completion order differs from submission
                        tokio::time::sleep(Duration::from_millis(5 + (i as u64 % 4) * 7)).await;
                        tracker.exit();
                        if i == 3 {
                            Err(CoreError::GenerationFailed("always rejects".into()))
                        } else {
                            Ok(i * 10)
                        }
                    }
                },
                |_| {},
            )
            .await;

        assert_eq!(outcomes.len(), 10);
        assert!(tracker.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 3);

        let failed: Vec<_> = outcomes.iter().filter(|o| o.result.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].index, 3);

        for outcome in outcomes.iter().filter(|o| o.index != 3) {
            assert_eq!(*outcome.result.as_ref().unwrap(), outcome.index * 10);
        }
    }

    #[tokio::test]
    async fn test_free_slot_is_refilled_immediately() {
        // One slow item must not hold back the rest of the queue.
        let pool = TaskPool::new(2);

        let outcomes = pool
            .run(
                vec![300u64, 20, 20, 20, 20, 20],
                |ms| async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ms)
                },
                |_| {},
            )
            .await;

        assert_eq!(outcomes.len(), 6);
        // Fixed batches of two would settle the slow item before the tail starts.
        assert_eq!(outcomes.last().unwrap().index, 0);
    }

    #[tokio::test]
    async fn test_progress_reports_every_settlement() {
        let pool = TaskPool::new(2);
        let seen = Mutex::new(Vec::new());

        pool.run(
            vec![1, 2, 3, 4],
            |i| async move {
                if i % 2 == 0 {
                    Err(CoreError::GenerationFailed("even".into()))
                } else {
                    Ok(())
                }
            },
            |p| seen.lock().unwrap().push(p),
        )
        .await;

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|p| p.total == 4));
        assert_eq!(
            seen.iter().map(|p| p.completed).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_empty_and_zero_limit() {
        let pool = TaskPool::new(0);
        assert_eq!(pool.limit(), 1);

        let outcomes = pool
            .run(Vec::<u8>::new(), |_| async { Ok(()) }, |_| {})
            .await;
        assert!(outcomes.is_empty());

        let outcomes = pool.run(vec![1, 2], |i| async move { Ok(i) }, |_| {}).await;
        assert_eq!(outcomes.len(), 2);
    }
}
