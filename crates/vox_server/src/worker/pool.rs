//! A generic bounded-queue OS-thread worker pool.
//!
//! Every submission gets an opaque, monotonically increasing [`JobId`] so the caller can match
//! results back to requests without the pool needing to know anything about request identity.
//! A full queue is reported as [`PoolError::QueueFull`], which callers should treat as
//! transient and retryable rather than fatal.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::prelude::*;

/// Opaque identifier for a submitted job, unique within a single [`WorkerPool`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct JobId(u64);

/// Errors a [`WorkerPool`] submission can fail with.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The bounded submission queue was full. Transient: retry later.
    #[error("worker pool queue is full")]
    QueueFull,
}

/// A fixed-size pool of OS threads pulling `Req` jobs off a shared bounded channel and pushing
/// `Resp` results onto another, running a single worker closure supplied at construction.
pub struct WorkerPool<Req, Resp> {
    sender: Sender<(JobId, Req)>,
    results_rx: Receiver<(JobId, Resp)>,
    next_id: AtomicU64,
    threads: Vec<JoinHandle<()>>,
}

impl<Req, Resp> WorkerPool<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Spawns `thread_count` worker threads named `{name}-{n}`, each repeatedly pulling a job
    /// off the shared queue, running `handler`, and pushing the result onto the results queue.
    pub fn new<F>(name: &str, thread_count: usize, queue_depth: usize, handler: F) -> Self
    where
        F: Fn(Req) -> Resp + Send + Sync + 'static,
    {
        let (sender, job_rx) = bounded::<(JobId, Req)>(queue_depth);
        let (result_tx, results_rx) = bounded::<(JobId, Resp)>(queue_depth);
        let handler = Arc::new(handler);

        let threads = (0..thread_count.max(1))
            .map(|i| {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let handler = Arc::clone(&handler);
                thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || {
                        while let Ok((id, req)) = job_rx.recv() {
                            let resp = handler(req);
                            if result_tx.send((id, resp)).is_err() {
                                break;
                            }
                        }
                    })
                    .expect("failed to spawn worker pool thread")
            })
            .collect();

        Self { sender, results_rx, next_id: AtomicU64::new(0), threads }
    }

    /// Submits a job, returning its opaque id immediately without waiting for completion.
    pub fn submit(&self, req: Req) -> Result<JobId, PoolError> {
        let id = JobId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        match self.sender.try_send((id, req)) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(PoolError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(PoolError::QueueFull),
        }
    }

    /// Drains up to `max_count` completed results without blocking.
    pub fn try_recv_results(&self, max_count: usize) -> Vec<(JobId, Resp)> {
        let mut out = Vec::new();
        while out.len() < max_count {
            match self.results_rx.try_recv() {
                Ok(item) => out.push(item),
                Err(_) => break,
            }
        }
        out
    }

    /// Number of worker threads backing this pool.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test]
    fn submits_and_collects_results() {
        let pool: WorkerPool<i32, i32> = WorkerPool::new("test-pool", 2, 4, |n| n * 2);
        let a = pool.submit(21).unwrap();
        let b = pool.submit(10).unwrap();
        assert_ne!(a, b);

        let mut results = Vec::new();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while results.len() < 2 && std::time::Instant::now() < deadline {
            results.extend(pool.try_recv_results(8));
            if results.len() < 2 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        results.sort_by_key(|(id, _)| *id);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].1, 42);
        assert_eq!(results[1].1, 20);
    }

    #[test]
    fn reports_queue_full() {
        // The first submitted job is picked up by the single worker thread and blocks forever
        // waiting on this gate, so the queue (depth 1) can hold at most one more job before
        // further submissions are rejected.
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let pool: WorkerPool<(), ()> = WorkerPool::new("full-pool", 1, 1, move |_| {
            let _ = gate_rx.lock().unwrap().recv();
        });

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut saw_full = false;
        while std::time::Instant::now() < deadline {
            match pool.submit(()) {
                Ok(_) => {}
                Err(PoolError::QueueFull) => {
                    saw_full = true;
                    break;
                }
            }
        }
        assert!(saw_full, "expected the bounded queue to eventually report full");
        drop(gate_tx);
    }
}
