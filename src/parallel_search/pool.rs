//! Worker pool with an observable pending-job queue.
//!
//! Jobs travel over an unbounded `crossbeam-channel`; the number of jobs
//! not yet picked up by a worker is the channel length, which the
//! backpressure control plane reads to decide where a task runs.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{PhalanxError, Result};

/// A unit of work whose result is delivered through a [`TaskFuture`].
pub type Task<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Run `task`, converting a panic into an error.
pub fn run_task<T>(task: Task<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Task panicked: {message}");
            Err(PhalanxError::internal(format!("task panicked: {message}")))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Handle to the result of a task, whichever thread ran it.
#[derive(Debug)]
pub struct TaskFuture<T> {
    state: FutureState<T>,
    executed_on_caller: bool,
}

#[derive(Debug)]
enum FutureState<T> {
    Ready(Result<T>),
    Pending(Receiver<Result<T>>),
}

impl<T> TaskFuture<T> {
    /// Run `task` on the current thread and wrap its result.
    pub fn run_on_caller(task: Task<T>) -> Self {
        TaskFuture {
            state: FutureState::Ready(run_task(task)),
            executed_on_caller: true,
        }
    }

    /// A future completed elsewhere, e.g. a task that could not be
    /// submitted.
    pub fn ready(result: Result<T>) -> Self {
        TaskFuture {
            state: FutureState::Ready(result),
            executed_on_caller: false,
        }
    }

    /// A future whose result will arrive on `receiver`.
    pub fn pending(receiver: Receiver<Result<T>>) -> Self {
        TaskFuture {
            state: FutureState::Pending(receiver),
            executed_on_caller: false,
        }
    }

    /// Whether the task ran synchronously on the submitting thread.
    pub fn executed_on_caller(&self) -> bool {
        self.executed_on_caller
    }

    /// Whether the result is available without blocking.
    pub fn is_done(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => true,
            FutureState::Pending(receiver) => !receiver.is_empty(),
        }
    }

    /// Block until the task finished and return its result.
    pub fn wait(self) -> Result<T> {
        match self.state {
            FutureState::Ready(result) => result,
            FutureState::Pending(receiver) => receiver.recv().map_err(|_| {
                PhalanxError::thread_pool("worker dropped the task without a result")
            })?,
        }
    }
}

/// Fixed-size pool of named worker threads.
pub struct WorkerPool {
    name: String,
    size: usize,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `size` workers named `{name}-{i}`.
    pub fn new<S: Into<String>>(name: S, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(PhalanxError::invalid_config(
                "worker pool size must be greater than 0",
            ));
        }
        let name = name.into();
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let jobs = receiver.clone();
            let worker = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || {
                    while let Ok(job) = jobs.recv() {
                        job();
                    }
                })
                .map_err(|e| PhalanxError::thread_pool(format!("Failed to spawn worker: {e}")))?;
            workers.push(worker);
        }
        debug!("Started worker pool '{name}' with {size} threads");

        Ok(WorkerPool {
            name,
            size,
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether [`WorkerPool::shutdown`] was called.
    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue `task` on the pool. A pool that was shut down runs the task on
    /// the calling thread instead.
    pub fn execute<T: Send + 'static>(&self, task: Task<T>) -> TaskFuture<T> {
        let guard = self.sender.lock();
        if let Some(sender) = guard.as_ref() {
            let (tx, rx) = crossbeam_channel::bounded(1);
            let job: Job = Box::new(move || {
                // The receiving side may have given up on the result.
                let _ = tx.send(run_task(task));
            });
            return match sender.send(job) {
                Ok(()) => TaskFuture::pending(rx),
                Err(_) => {
                    warn!("Worker pool '{}' rejected a task", self.name);
                    TaskFuture::ready(Err(PhalanxError::thread_pool(format!(
                        "worker pool '{}' is disconnected",
                        self.name
                    ))))
                }
            };
        }
        drop(guard);

        debug!("Worker pool '{}' is shut down, running task on caller", self.name);
        TaskFuture::run_on_caller(task)
    }

    /// Stop accepting jobs, let workers drain the queue, and join them.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                warn!("A worker of pool '{}' exited abnormally", self.name);
            }
        }
        debug!("Worker pool '{}' shut down", self.name);
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
