//! Bounded worker pool for per-file scan jobs
//!
//! A thin layer over a `rayon::ThreadPool` that adds what the orchestrator
//! needs and rayon doesn't offer directly: dropping queued work and waiting
//! for everything submitted so far to finish.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Pending {
    count: Mutex<usize>,
    done: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.done.notify_all();
        }
    }
}

/// Decrements the pending count even if the job panics
struct PendingGuard(Arc<Pending>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    pending: Arc<Pending>,
    generation: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool with `workers` threads; 0 means one per available core
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fastav-worker-{}", i))
            .panic_handler(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("scan worker panicked: {}", msg);
            })
            .build()
            .context("Failed to start scan worker pool")?;

        Ok(Self {
            pool,
            pending: Arc::new(Pending::default()),
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue a job. It is skipped if [`clear`](Self::clear) runs before it starts.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.add();
        let guard = PendingGuard(Arc::clone(&self.pending));
        let generation = Arc::clone(&self.generation);
        let queued_at = generation.load(Ordering::Acquire);

        self.pool.spawn(move || {
            if generation.load(Ordering::Acquire) == queued_at {
                job();
            } else {
                drop(job);
            }
            // Only after the job and everything it captured are gone
            drop(guard);
        });
    }

    /// Drop every job that has been queued but not yet started
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Jobs queued or running
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Block until every submitted job has run or been skipped.
    ///
    /// Must not be called from one of this pool's threads.
    pub fn wait_for_done(&self) {
        debug_assert!(
            self.pool.current_thread_index().is_none(),
            "wait_for_done called from a pool worker"
        );
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.done.wait(&mut count);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.num_workers())
            .field("pending", &self.pending())
            .finish()
    }
}
