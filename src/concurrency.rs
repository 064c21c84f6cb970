//! Request and background concurrency pools (spec.md §5).
//!
//! The request pool bounds in-flight lookups with a counting semaphore and
//! runs the (CPU-bound, blocking) spatial resolution work on the blocking
//! thread pool, returning `ServiceBusy` when a permit cannot be acquired
//! before `acquire_timeout`. The background pool drives the snapshot
//! synchronizer, the provenance merge worker, and shard preloading on
//! fixed intervals, each on its own task so a slow cycle in one never
//! stalls another. Grounded on the teacher's `net::swarm::run_blob_service`
//! accept-loop (`Semaphore::acquire_owned` gating `tokio::spawn`) since the
//! teacher has no generic worker-pool analogue of its own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::LookupError;

/// Bounds concurrent in-flight requests, shedding load past capacity
/// rather than queuing unboundedly.
pub struct RequestPool {
    semaphore: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl RequestPool {
    /// Builds a pool admitting at most `capacity` concurrent requests,
    /// waiting up to `acquire_timeout` for a free slot before shedding.
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        RequestPool { semaphore: Arc::new(Semaphore::new(capacity)), acquire_timeout }
    }

    /// Runs blocking CPU-bound `work` under a semaphore permit, offloaded
    /// to the blocking thread pool. Returns [`LookupError::ServiceBusy`]
    /// if no permit frees up within `acquire_timeout`, or propagates a
    /// panic in `work` as the same error.
    pub async fn run_blocking<F, T>(&self, work: F) -> Result<T, LookupError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| LookupError::ServiceBusy)?
            .map_err(|_| LookupError::ServiceBusy)?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        })
        .await
        .map_err(|_| LookupError::ServiceBusy)?;
        Ok(result)
    }

    /// Number of permits currently available (for `health()` reporting).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Spawns `task_fn` on a fixed interval, stopping only when the returned
/// handle is aborted. Each background task owns its own schedule so one
/// slow cycle never blocks another.
pub fn spawn_interval_task<F, Fut>(period: Duration, mut task_fn: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            task_fn().await;
        }
    })
}

/// Holds the three background task handles so the caller can abort them
/// together on shutdown (synchronizer poll, merge worker, shard preload).
pub struct BackgroundPool {
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundPool {
    /// Builds an empty pool.
    pub fn new() -> Self {
        BackgroundPool { handles: Vec::new() }
    }

    /// Registers a handle so it is aborted by [`BackgroundPool::shutdown`].
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    /// Aborts every tracked background task.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Default for BackgroundPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_blocking_executes_work_and_returns_result() {
        let pool = RequestPool::new(2, Duration::from_millis(100));
        let result = pool.run_blocking(|| 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn run_blocking_sheds_load_when_capacity_exhausted() {
        let pool = Arc::new(RequestPool::new(1, Duration::from_millis(20)));
        let held = pool.clone();
        let blocker = tokio::spawn(async move {
            held.run_blocking(|| std::thread::sleep(Duration::from_millis(200))).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = pool.run_blocking(|| 1).await;
        assert!(matches!(second, Err(LookupError::ServiceBusy)));
        let _ = blocker.await;
    }

    #[tokio::test]
    async fn background_pool_shutdown_aborts_tracked_tasks() {
        let mut pool = BackgroundPool::new();
        let handle = spawn_interval_task(Duration::from_millis(5), || async {});
        pool.track(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.shutdown();
    }
}
