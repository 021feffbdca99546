// Bounded worker pool shared by the download and decrypt phases.
//
// The pool is a neutral executor: it neither retries nor interprets the
// values its units return. Waiting on every handle of a batch is the
// phase barrier.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::trace;

/// Handle of a blocking unit: the outer layer is the scheduling task, the
/// inner one the unit itself.
pub type BlockingHandle<T> = JoinHandle<Result<T, JoinError>>;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run an async unit once a worker slot is free.
    pub fn submit<F, T>(&self, unit: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = self.name;
        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await.ok();
            trace!(pool = name, "Worker slot acquired");
            unit.await
        })
    }

    /// Run a CPU-bound unit on the blocking thread pool, still bounded by
    /// this pool's slots. A panicking unit comes back as the inner `JoinError`.
    pub fn submit_blocking<F, T>(&self, unit: F) -> BlockingHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let name = self.name;
        tokio::spawn(async move {
            let permit = permits.acquire_owned().await.ok();
            trace!(pool = name, "Blocking worker slot acquired");
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                unit()
            })
            .await
        })
    }

    /// Phase barrier: resolves once every unit has returned, in submission order.
    pub async fn join_all<T>(handles: Vec<JoinHandle<T>>) -> Vec<Result<T, JoinError>> {
        join_all(handles).await
    }

    /// Phase barrier for [`submit_blocking`](Self::submit_blocking) units.
    pub async fn join_all_blocking<T>(handles: Vec<BlockingHandle<T>>) -> Vec<Result<T, JoinError>> {
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.and_then(|unit| unit))
            .collect()
    }
}
