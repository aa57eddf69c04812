//! Worker thread pool for blocking work (file creation, mapping reloads).
//!
//! Jobs are closures pushed onto a bounded pending queue. Each job reports
//! its result on the [`JobChannel`] it was submitted with, so a caller can
//! poll completions from its own loop without blocking.

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of pending jobs the queue accepts.
pub const DEFAULT_PENDING_CAPACITY: usize = 64;

/// Errors submitting work.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The pending queue already holds its maximum.
    #[error("job queue is full ({0} pending)")]
    Full(usize),

    /// The manager is shutting down.
    #[error("job manager is stopping")]
    Stopped,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct State {
    pending: VecDeque<Job>,
    stopping: bool,
}

struct Shared {
    state: Mutex<State>,
    has_jobs: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A job panicking cannot poison the lock: jobs run outside of it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Completion channel for jobs producing a `T`.
///
/// Bounded: a worker finishing a job waits while the channel is full.
pub struct JobChannel<T> {
    sender: mpsc::SyncSender<T>,
    receiver: mpsc::Receiver<T>,
}

impl<T> fmt::Debug for JobChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobChannel").finish_non_exhaustive()
    }
}

impl<T> JobChannel<T> {
    /// Next completed result, if any.
    pub fn pop(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Block until a result arrives.
    pub fn pop_wait(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Fixed pool of worker threads.
pub struct JobManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    pending_capacity: usize,
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManager")
            .field("workers", &self.workers.len())
            .field("pending_capacity", &self.pending_capacity)
            .finish_non_exhaustive()
    }
}

impl JobManager {
    /// Spawn `threads` workers (at least one) sharing a queue of
    /// `pending_capacity` jobs.
    pub fn new(threads: usize, pending_capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                pending: VecDeque::with_capacity(pending_capacity),
                stopping: false,
            }),
            has_jobs: Condvar::new(),
        });

        let workers = (0..threads.max(1))
            .map(|n| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("cconartist-job-{n}"))
                    .spawn(move || worker_loop(&shared))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("failed to spawn job worker: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(workers = workers.len(), pending_capacity, "job manager started");
        Self {
            shared,
            workers,
            pending_capacity: pending_capacity.max(1),
        }
    }

    /// One worker per CPU, capped at eight.
    pub fn with_default_threads() -> Self {
        Self::new(num_cpus::get().clamp(1, 8), DEFAULT_PENDING_CAPACITY)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Create a completion channel holding up to `capacity` results.
    pub fn channel<T>(&self, capacity: usize) -> JobChannel<T> {
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        JobChannel { sender, receiver }
    }

    /// Queue `job`; its result is delivered on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Full`] when the pending queue is at capacity and
    /// [`JobError::Stopped`] once shutdown has begun.
    pub fn submit<T, F>(&self, channel: &JobChannel<T>, job: F) -> Result<(), JobError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = channel.sender.clone();
        let mut state = self.shared.lock();
        if state.stopping || self.workers.is_empty() {
            return Err(JobError::Stopped);
        }
        if state.pending.len() >= self.pending_capacity {
            return Err(JobError::Full(self.pending_capacity));
        }
        state.pending.push_back(Box::new(move || {
            // The receiver may be gone; the result is then discarded.
            let _ = sender.send(job());
        }));
        drop(state);
        self.shared.has_jobs.notify_one();
        Ok(())
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.pending.pop_front() {
                    break job;
                }
                if state.stopping {
                    return;
                }
                state = shared.has_jobs.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        };
        job();
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shared.lock().stopping = true;
        self.shared.has_jobs.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("job worker panicked");
            }
        }
        debug!("job manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_submit_and_pop() {
        let jobs = JobManager::new(2, 8);
        let channel = jobs.channel::<u32>(8);
        for n in 0..4u32 {
            jobs.submit(&channel, move || n * 10).unwrap();
        }
        let mut results: Vec<u32> = (0..4).filter_map(|_| channel.pop_wait()).collect();
        results.sort_unstable();
        assert_eq!(results, vec![0, 10, 20, 30]);
        assert_eq!(channel.pop(), None);
    }

    #[test]
    fn test_queue_full() {
        let jobs = JobManager::new(1, 1);
        let channel = jobs.channel::<()>(4);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        // Occupy the only worker.
        jobs.submit(&channel, move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv().unwrap();

        jobs.submit(&channel, || ()).unwrap();
        assert_eq!(jobs.submit(&channel, || ()), Err(JobError::Full(1)));
        assert_eq!(jobs.pending(), 1);

        release_tx.send(()).unwrap();
        assert!(channel.pop_timeout(Duration::from_secs(5)).is_some());
        assert!(channel.pop_timeout(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_drop_drains_pending() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let jobs = JobManager::new(1, 32);
            let channel = jobs.channel::<()>(32);
            for _ in 0..20 {
                let counter = Arc::clone(&counter);
                jobs.submit(&channel, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_separate_channels() {
        let jobs = JobManager::new(2, 8);
        let numbers = jobs.channel::<u64>(2);
        let words = jobs.channel::<String>(2);
        jobs.submit(&numbers, || 7).unwrap();
        jobs.submit(&words, || "seven".to_string()).unwrap();
        assert_eq!(words.pop_wait().as_deref(), Some("seven"));
        assert_eq!(numbers.pop_wait(), Some(7));
    }
}
