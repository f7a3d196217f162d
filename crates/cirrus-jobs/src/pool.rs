//! Bounded priority worker pool
//!
//! Jobs are queued with a priority and executed by at most `capacity`
//! concurrent workers. Capacity is adaptive: when the transport layer
//! reports socket exhaustion the pool is shrunk, never below one worker,
//! so queued work keeps draining.
//!
//! ```text
//! queue(priority, fut) ──→ BinaryHeap ──→ scheduler task ──→ tokio::spawn
//!                                             │
//!                                    running < capacity gate
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use cirrus_core::ExitResult;

/// Priority of a queued job. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

type JobFuture = Pin<Box<dyn Future<Output = ExitResult> + Send>>;

struct QueuedJob {
    priority: JobPriority,
    seq: u64,
    name: String,
    work: JobFuture,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then FIFO within a priority.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: Mutex<BinaryHeap<QueuedJob>>,
    notify: Notify,
    capacity: AtomicUsize,
    running: AtomicUsize,
    next_seq: AtomicU64,
    shutdown: CancellationToken,
}

impl Inner {
    /// Starts as many queued jobs as the capacity gate allows.
    fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let capacity = self.capacity.load(AtomicOrdering::SeqCst);
            if self.running.load(AtomicOrdering::SeqCst) >= capacity {
                return;
            }
            let job = match self.heap.lock() {
                Ok(mut heap) => heap.pop(),
                Err(_) => return,
            };
            let Some(job) = job else { return };

            self.running.fetch_add(1, AtomicOrdering::SeqCst);
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tracing::debug!(job = %job.name, "Job started");
                if let Err(exit) = job.work.await {
                    tracing::warn!(job = %job.name, exit = %exit, "Job failed");
                } else {
                    tracing::debug!(job = %job.name, "Job finished");
                }
                inner.running.fetch_sub(1, AtomicOrdering::SeqCst);
                inner.notify.notify_one();
            });
        }
    }
}

/// Bounded priority pool for asynchronous jobs.
#[derive(Clone)]
pub struct JobPool {
    inner: Arc<Inner>,
}

impl JobPool {
    /// Creates a pool and spawns its scheduler task.
    pub fn new(capacity: usize) -> Self {
        let inner = Arc::new(Inner {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            capacity: AtomicUsize::new(capacity.max(1)),
            running: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        let sched = Arc::clone(&inner);
        tokio::spawn(async move {
            loop {
                sched.dispatch_ready();
                tokio::select! {
                    _ = sched.shutdown.cancelled() => break,
                    _ = sched.notify.notified() => {}
                }
            }
            tracing::debug!("Job pool scheduler stopped");
        });

        tracing::info!(capacity = capacity.max(1), "Job pool started");
        Self { inner }
    }

    /// Queues a job for execution.
    pub fn queue<F>(&self, priority: JobPriority, name: impl Into<String>, work: F)
    where
        F: Future<Output = ExitResult> + Send + 'static,
    {
        let job = QueuedJob {
            priority,
            seq: self.inner.next_seq.fetch_add(1, AtomicOrdering::SeqCst),
            name: name.into(),
            work: Box::pin(work),
        };
        if let Ok(mut heap) = self.inner.heap.lock() {
            heap.push(job);
        }
        self.inner.notify.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(AtomicOrdering::SeqCst)
    }

    /// Halves the worker capacity, never below one.
    ///
    /// Called when the transport layer reports socket exhaustion; running
    /// jobs finish normally, only new dispatches are gated.
    pub fn decrease_capacity(&self) {
        let current = self.inner.capacity.load(AtomicOrdering::SeqCst);
        let reduced = (current / 2).max(1);
        self.inner.capacity.store(reduced, AtomicOrdering::SeqCst);
        tracing::warn!(from = current, to = reduced, "Job pool capacity reduced");
    }

    /// Stops dispatching. Already running jobs are not interrupted.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Number of jobs currently executing.
    pub fn running(&self) -> usize {
        self.inner.running.load(AtomicOrdering::SeqCst)
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.heap.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_jobs_run_and_complete() {
        let pool = JobPool::new(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..4 {
            let tx = tx.clone();
            pool.queue(JobPriority::Normal, format!("job-{i}"), async move {
                let _ = tx.send(i);
                Ok(())
            });
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(
                tokio::time::timeout(Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_priority_order_with_single_worker() {
        let pool = JobPool::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        // Occupy the single worker so queued jobs pile up.
        pool.queue(JobPriority::High, "blocker", async move {
            let _ = release_rx.await;
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        for (priority, tag) in [
            (JobPriority::Low, "low"),
            (JobPriority::Normal, "normal"),
            (JobPriority::High, "high"),
        ] {
            let tx = tx.clone();
            pool.queue(priority, tag, async move {
                let _ = tx.send(tag);
                Ok(())
            });
        }

        let _ = release_tx.send(());

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(
                tokio::time::timeout(Duration::from_secs(2), rx.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_capacity_floor_is_one() {
        let pool = JobPool::new(4);
        pool.decrease_capacity();
        assert_eq!(pool.capacity(), 2);
        pool.decrease_capacity();
        assert_eq!(pool.capacity(), 1);
        pool.decrease_capacity();
        assert_eq!(pool.capacity(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_dispatch() {
        let pool = JobPool::new(1);
        pool.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        pool.queue(JobPriority::High, "late", async move {
            let _ = tx.send(());
            Ok(())
        });

        let late = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(late.is_err(), "job must not run after shutdown");
    }
}
