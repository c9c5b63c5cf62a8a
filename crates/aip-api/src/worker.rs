//! # Worker Pool
//!
//! A fixed number of workers draining a bounded queue. Submitting to a
//! full queue fails immediately with [`ArchivalError::Busy`]; nothing
//! blocks the request thread waiting for capacity. Every submission gets a
//! [`JobHandle`] that resolves when the job finishes. Jobs are not
//! cancellable: dropping the handle detaches from the result, the job
//! still runs to completion.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::ArchivalError;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Bounded pool of async workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    running: Arc<AtomicUsize>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `size` workers sharing a queue of `queue_depth` slots.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(size: usize, queue_depth: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let running = Arc::new(AtomicUsize::new(0));

        for worker in 0..size {
            let rx = Arc::clone(&rx);
            let running = Arc::clone(&running);
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else { break };
                    running.fetch_add(1, Ordering::SeqCst);
                    // Run on its own task so a panicking job does not take
                    // the worker down with it.
                    if let Err(e) = tokio::spawn(job).await {
                        tracing::error!(worker, error = %e, "archival job panicked");
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                }
                tracing::debug!(worker, "worker stopped");
            });
        }

        tracing::info!(workers = size, queue_depth, "worker pool started");
        Self { tx, running, size }
    }

    /// Queue `fut` for execution.
    ///
    /// # Errors
    ///
    /// [`ArchivalError::Busy`] if the queue is full or the pool has shut down.
    pub fn submit<F, T>(&self, fut: F) -> Result<JobHandle<T>, ArchivalError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let out = fut.await;
            let _ = done_tx.send(out);
        });
        match self.tx.try_send(job) {
            Ok(()) => Ok(JobHandle(done_rx)),
            Err(mpsc::error::TrySendError::Full(_)) => {
                crate::metrics::record_pool_rejection();
                Err(ArchivalError::Busy)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ArchivalError::Busy),
        }
    }

    /// Jobs currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Completion signal for a submitted job.
#[derive(Debug)]
pub struct JobHandle<T>(oneshot::Receiver<T>);

impl<T> JobHandle<T> {
    /// Wait for the job's output.
    pub async fn wait(self) -> Result<T, ArchivalError> {
        self.0
            .await
            .map_err(|_| ArchivalError::Storage("archival job ended without a result".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_complete_and_report_output() {
        let pool = WorkerPool::start(2, 4);
        let handle = pool.submit(async { 40 + 2 }).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn full_queue_rejects_immediately() {
        let pool = WorkerPool::start(1, 1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        let blocker = pool
            .submit(async move {
                let _ = started_tx.send(());
                let _ = release_rx.await;
            })
            .unwrap();
        started_rx.await.unwrap();
        assert_eq!(pool.running(), 1);

        // One queued job fills the single slot.
        let queued = pool.submit(async {}).unwrap();
        assert!(matches!(pool.submit(async {}), Err(ArchivalError::Busy)));

        release_tx.send(()).unwrap();
        blocker.wait().await.unwrap();
        queued.wait().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::start(1, 4);
        let bad = pool.submit(async { panic!("boom") }).unwrap();
        assert!(bad.wait().await.is_err());
        let good = pool.submit(async { 7 }).unwrap();
        assert_eq!(good.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel_job() {
        let pool = WorkerPool::start(1, 4);
        let (tx, rx) = oneshot::channel();
        drop(pool.submit(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(());
        }));
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
    }
}
