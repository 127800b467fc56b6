//! Bounded concurrency for one kind of operation.

use crate::errors::{Error, Result};
use std::{future::Future, sync::Arc};
use tokio::sync::Semaphore;
use tracing::trace;

/// Limits how many scheduled tasks run at once; excess tasks wait in FIFO
/// order. Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    name: &'static str,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    /// `max_concurrent` is raised to 1 if zero.
    pub fn new(name: &'static str, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name,
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots not currently held by a running task.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run `task` once a slot is free. The slot is released as soon as the
    /// task finishes, successfully or not.
    pub async fn schedule<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            Error::InvalidState(format!("{} limiter has been disposed", self.name))
        })?;
        trace!(limiter = self.name, available = self.available(), "slot acquired");
        task.await
    }

    /// Stop accepting work. Queued tasks fail; running tasks finish.
    /// Safe to call repeatedly.
    pub fn dispose(&self) {
        self.semaphore.close();
    }

    pub fn is_disposed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let limiter = ConcurrencyLimiter::new("test", 3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..12).map(|i| {
            let limiter = limiter.clone();
            let running = running.clone();
            let peak = peak.clone();
            async move {
                limiter
                    .schedule(async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    })
                    .await
            }
        });
        let results: Vec<_> = join_all(tasks).await.into_iter().map(Result::unwrap).collect();

        assert_eq!(results, (0..12).collect::<Vec<_>>());
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn failed_task_releases_its_slot() {
        let limiter = ConcurrencyLimiter::new("test", 1);
        let err = limiter
            .schedule(async { Err::<(), _>(Error::InvalidState("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(limiter.schedule(async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn disposed_limiter_rejects_work() {
        let limiter = ConcurrencyLimiter::new("read", 2);
        limiter.dispose();
        limiter.dispose();
        assert!(limiter.is_disposed());

        let err = limiter.schedule(async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(msg) if msg.contains("read")));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new("upload", 0).max_concurrent(), 1);
    }
}
