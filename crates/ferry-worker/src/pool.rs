//! Worker pools
//!
//! A pool owns the threads that drain the request queue. It only talks to the
//! queue through a [`WorkerHandle`], so alternative pools (a job system, a
//! test harness) can be plugged into [`WorkQueue::with_parts`].
//!
//! [`WorkQueue::with_parts`]: crate::WorkQueue::with_parts

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ferry_core::QueueError;

use crate::queue::WorkerHandle;

pub trait WorkerPool: Send + Sync {
    /// False means every request runs on the thread that submits it.
    fn supports_concurrency(&self) -> bool;

    /// Start `thread_count` workers running the main loop against `handle`.
    fn start(&self, handle: WorkerHandle, thread_count: usize) -> Result<(), QueueError>;

    /// New work may be available.
    fn notify_workers(&self);

    /// Stop all workers and wait for them to exit. Requests already being
    /// processed finish first.
    fn stop(&self);
}

#[derive(Debug, Default)]
struct WakeSignal {
    stopping: Mutex<bool>,
    condvar: Condvar,
}

/// OS threads parked on a condition variable between requests.
pub struct ThreadPool {
    name_prefix: String,
    signal: Arc<WakeSignal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            signal: Arc::new(WakeSignal::default()),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    fn worker_loop(signal: &WakeSignal, handle: &WorkerHandle) {
        loop {
            {
                let mut stopping = signal.stopping.lock();
                while !*stopping && !handle.has_pending_work() {
                    signal.condvar.wait(&mut stopping);
                }
                if *stopping || handle.is_shutting_down() {
                    break;
                }
            }
            handle.process_next_request();
        }
    }
}

impl WorkerPool for ThreadPool {
    fn supports_concurrency(&self) -> bool {
        true
    }

    fn start(&self, handle: WorkerHandle, thread_count: usize) -> Result<(), QueueError> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Err(QueueError::AlreadyRunning);
        }
        *self.signal.stopping.lock() = false;

        for index in 0..thread_count {
            let name = format!("{}-{}", self.name_prefix, index);
            let signal = self.signal.clone();
            let handle = handle.clone();

            let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
                tracing::debug!("Worker thread started");
                Self::worker_loop(&signal, &handle);
                tracing::debug!("Worker thread stopped");
            });

            match spawned {
                Ok(join) => threads.push(join),
                Err(source) => {
                    tracing::error!(error = %source, thread = %name, "Failed to spawn worker thread");
                    let started = std::mem::take(&mut *threads);
                    drop(threads);
                    self.shut_down_threads(started);
                    return Err(QueueError::WorkerSpawn { name, source });
                }
            }
        }

        tracing::info!(
            thread_count,
            prefix = %self.name_prefix,
            "Worker pool started"
        );
        Ok(())
    }

    fn notify_workers(&self) {
        let _stopping = self.signal.stopping.lock();
        self.signal.condvar.notify_all();
    }

    fn stop(&self) {
        let threads = std::mem::take(&mut *self.threads.lock());
        if threads.is_empty() {
            return;
        }
        let count = threads.len();
        self.shut_down_threads(threads);
        tracing::info!(thread_count = count, "Worker pool stopped");
    }
}

impl ThreadPool {
    fn shut_down_threads(&self, threads: Vec<JoinHandle<()>>) {
        {
            let mut stopping = self.signal.stopping.lock();
            *stopping = true;
            self.signal.condvar.notify_all();
        }

        let current = thread::current().id();
        for join in threads {
            // A handler calling shutdown from a worker cannot join itself.
            if join.thread().id() == current {
                continue;
            }
            if join.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// No threads at all. The queue runs each request inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn supports_concurrency(&self) -> bool {
        false
    }

    fn start(&self, _handle: WorkerHandle, _thread_count: usize) -> Result<(), QueueError> {
        Ok(())
    }

    fn notify_workers(&self) {}

    fn stop(&self) {}
}
