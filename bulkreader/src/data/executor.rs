//! The bounded executor blocking I/O goes through.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task;

use crate::errors::ReadError;

/// A semaphore-bounded wrapper over the blocking thread pool.
///
/// Listing and opening sstables is blocking disk/network I/O; dispatching
/// it through this executor keeps it off the scheduling threads and caps
/// how many operations run at once. Submissions over the bound wait for a
/// permit instead of being dropped. The data layer that owns the executor
/// picks the bound.
#[derive(Clone, Debug)]
pub struct IoExecutor {
    permits: Arc<Semaphore>,
}

impl IoExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(std::cmp::max(1, concurrency))),
        }
    }

    /// Runs a blocking task once a permit is available and resolves with
    /// its result.
    pub async fn submit<F, T>(&self, task_fn: F) -> Result<T, ReadError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ReadError::Internal("blocking executor is closed"))?;
        task::spawn_blocking(move || {
            let _permit = permit;
            task_fn()
        })
        .await
        .map_err(|_| ReadError::Internal("blocking task panicked"))
    }

    /// Number of tasks that may run at once.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_submit_returns_result() {
        let executor = IoExecutor::new(2);
        let value = executor.submit(|| 41 + 1).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let executor = IoExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let executor = executor.clone();
                let running = running.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    executor
                        .submit(move || {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            running.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
