//! The Callback runner: drains user hook invocations off the Dispatcher
//! loop onto a bounded queue, so a slow or panicking hook never stalls
//! network I/O.
//!
//! Mirrors the original fetcher's split between its reactor thread and a
//! background worker draining a callback queue (see `Fetcher.process` in
//! `examples/original_source/Fetcher.py`), and Design Notes §9's directive
//! to replace that with "a task queue, not a background drain thread" —
//! realized here as a bounded `tokio::sync::mpsc` channel plus one or more
//! worker tasks.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A handle to the running callback workers. Cloning shares the same
/// underlying channel.
#[derive(Clone)]
pub struct CallbackRunner {
    sender: mpsc::Sender<Job>,
}

impl std::fmt::Debug for CallbackRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRunner").finish()
    }
}

impl CallbackRunner {
    /// Spawns `worker_count` worker tasks draining a channel of capacity
    /// `capacity`. Must be called from within a Tokio runtime.
    pub fn spawn(capacity: usize, worker_count: usize) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = std::sync::Arc::new(tokio::sync::Mutex::new(receiver));

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for id in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = receiver.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => run_job(id, job),
                        None => break,
                    }
                }
            }));
        }

        (CallbackRunner { sender }, handles)
    }

    /// Enqueues `job` to run on a callback worker. If the queue is full,
    /// this awaits until space is available, applying backpressure to the
    /// Dispatcher loop rather than growing the queue unbounded.
    pub async fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(job)).await.is_err() {
            error!("callback runner is shut down; dropping job");
        }
    }
}

fn run_job(worker_id: usize, job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!("callback worker {worker_id} panicked: {message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn submitted_jobs_run() {
        let (runner, _handles) = CallbackRunner::spawn(8, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        runner.submit(move || { c.fetch_add(1, Ordering::SeqCst); }).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_job_does_not_stop_the_runner() {
        let (runner, _handles) = CallbackRunner::spawn(8, 1);
        runner.submit(|| panic!("boom")).await;
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        runner.submit(move || { c.fetch_add(1, Ordering::SeqCst); }).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
