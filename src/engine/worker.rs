//! Transport worker threads
//!
//! Each running engine stream drives its transport on one named thread.
//! Stopping is two-phase: `Worker::request_stop` clears the running flag
//! ("auto-stop") and hands back a [`StopHandle`]; `StopHandle::wait` blocks
//! until the thread has confirmed termination. Confirmation comes from a
//! latch signalled by a drop guard on the worker thread, so it also fires
//! when the transport body panics.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::EngineError;

/// One-shot latch set when a worker thread exits
#[derive(Debug, Default)]
pub struct Termination {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Termination {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        *self.done.lock()
    }

    /// Wait at most `timeout`. May return early on a spurious wake, so
    /// callers loop on the returned flag.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        if !*done {
            self.cond.wait_for(&mut done, timeout);
        }
        *done
    }
}

struct TerminationGuard(Arc<Termination>);

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        self.0.signal();
    }
}

/// Running flag as seen from inside the worker
#[derive(Debug, Clone)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Sleep for `period` in slices of at most `slice`, returning early once
    /// a stop is requested. Returns whether the worker should keep going.
    pub fn sleep(&self, period: Duration, slice: Duration) -> bool {
        let slice = slice.max(Duration::from_millis(1));
        let mut remaining = period;
        while !remaining.is_zero() {
            if !self.is_running() {
                return false;
            }
            let step = remaining.min(slice);
            thread::sleep(step);
            remaining -= step;
        }
        self.is_running()
    }
}

/// Handle on a spawned transport thread
pub struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    termination: Arc<Termination>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a new named thread. The body must return once
    /// `StopSignal::is_running` turns false.
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self, EngineError>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let termination = Termination::new();
        let signal = StopSignal {
            running: running.clone(),
        };
        let guard = TerminationGuard(termination.clone());

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _guard = guard;
                body(signal);
            })
            .map_err(|e| EngineError::WorkerSpawn(e.to_string()))?;

        tracing::debug!("Spawned worker {}", name);

        Ok(Self {
            name,
            running,
            termination,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until a stop is requested or the thread exits on its own
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.termination.is_terminated()
    }

    /// Signal the worker to terminate
    ///
    /// The first call takes ownership of the join handle; later calls get a
    /// handle that only waits on the termination latch.
    pub fn request_stop(&mut self) -> StopHandle {
        self.running.store(false, Ordering::SeqCst);
        StopHandle {
            worker: self.name.clone(),
            termination: self.termination.clone(),
            join: self.handle.take(),
        }
    }

    /// Signal the worker and leave it to finish on its own, without waiting
    pub fn detach(mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.take();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop().wait(Duration::from_millis(500));
        }
    }
}

/// Pending wait on a stopping worker
#[must_use = "a stop is only confirmed once the handle is waited on"]
pub struct StopHandle {
    worker: String,
    termination: Arc<Termination>,
    join: Option<JoinHandle<()>>,
}

impl StopHandle {
    /// Handle for a stream that has no live worker
    pub fn completed(worker: impl Into<String>) -> Self {
        let termination = Termination::new();
        termination.signal();
        Self {
            worker: worker.into(),
            termination,
            join: None,
        }
    }

    /// Whether this handle will join the thread
    pub fn owns_join(&self) -> bool {
        self.join.is_some()
    }

    /// Block until the worker has terminated
    ///
    /// There is no overall timeout: `retry` only bounds each individual
    /// wait, after which termination is checked again.
    pub fn wait(self, retry: Duration) {
        let mut attempts = 0u32;
        while !self.termination.wait_for(retry) {
            attempts += 1;
            tracing::warn!(
                worker = %self.worker,
                attempts,
                "Worker has not terminated yet, waiting again"
            );
        }

        if let Some(handle) = self.join {
            if handle.join().is_err() {
                tracing::error!("Worker {} terminated by panic", self.worker);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    fn counting_worker(counter: Arc<AtomicU64>) -> Worker {
        Worker::spawn("test-worker", move |signal| {
            while signal.sleep(Duration::from_millis(2), Duration::from_millis(1)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap()
    }

    #[test]
    fn test_stop_waits_for_termination() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut worker = counting_worker(counter.clone());
        thread::sleep(Duration::from_millis(20));
        assert!(worker.is_running());

        let handle = worker.request_stop();
        assert!(handle.owns_join());
        handle.wait(Duration::from_millis(5));

        assert!(!worker.is_running());
        let after_stop = counter.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_second_stop_does_not_join() {
        let mut worker = counting_worker(Arc::new(AtomicU64::new(0)));
        let first = worker.request_stop();
        let second = worker.request_stop();
        assert!(first.owns_join());
        assert!(!second.owns_join());

        let waiter = thread::spawn(move || second.wait(Duration::from_millis(5)));
        first.wait(Duration::from_millis(5));
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_retries_until_terminated() {
        let mut worker = Worker::spawn("slow-worker", |signal| {
            while signal.is_running() {
                thread::sleep(Duration::from_millis(1));
            }
            // keep going well past the retry interval
            thread::sleep(Duration::from_millis(30));
        })
        .unwrap();

        let started = Instant::now();
        worker.request_stop().wait(Duration::from_millis(2));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_panicking_worker_counts_as_terminated() {
        let mut worker = Worker::spawn("panicking-worker", |_signal| {
            panic!("transport failure");
        })
        .unwrap();
        worker.request_stop().wait(Duration::from_millis(5));
        assert!(!worker.is_running());
    }

    #[test]
    fn test_completed_handle() {
        let handle = StopHandle::completed("idle");
        assert!(!handle.owns_join());
        handle.wait(Duration::from_millis(1));
    }

    #[test]
    fn test_detach_does_not_wait() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let worker = Worker::spawn("slow-worker", move |signal| {
            thread::sleep(Duration::from_millis(50));
            while signal.sleep(Duration::from_millis(2), Duration::from_millis(1)) {}
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        let started = Instant::now();
        worker.detach();
        assert!(started.elapsed() < Duration::from_millis(40));

        thread::sleep(Duration::from_millis(200));
        assert!(finished.load(Ordering::SeqCst));
    }
}
