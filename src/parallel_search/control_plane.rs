//! Execution control planes: policies deciding on which thread each slice
//! task runs.
//!
//! Every plane returns exactly one future per task, in task order, so the
//! result for slice `i` always belongs to task `i`.

use std::fmt::Debug;
use std::sync::Arc;

use log::{debug, trace};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{PhalanxError, Result};
use crate::parallel_search::config::{ControlPlaneType, ParallelSearchConfig};
use crate::parallel_search::pool::{Task, TaskFuture, WorkerPool, run_task};

/// Decides how a batch of tasks is executed.
pub trait ExecutionControlPlane<T: Send + 'static>: Send + Sync + Debug {
    /// Start every task and return one future per task, in order.
    fn invoke_all(&self, tasks: Vec<Task<T>>) -> Vec<TaskFuture<T>>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Submits tasks to a worker pool, but runs a task on the calling thread
/// when the pool's pending queue reaches `max_pool_size * limiting_factor`.
/// The last task of a batch always runs on the calling thread.
#[derive(Debug)]
pub struct QueueSizeBasedControlPlane {
    pool: Arc<WorkerPool>,
    max_pool_size: usize,
    limiting_factor: f64,
}

impl QueueSizeBasedControlPlane {
    /// Create a plane over `pool`.
    pub fn new(pool: Arc<WorkerPool>, limiting_factor: f64) -> Self {
        let max_pool_size = pool.size();
        QueueSizeBasedControlPlane {
            pool,
            max_pool_size,
            limiting_factor,
        }
    }

    /// Queue length from which tasks run on the caller.
    pub fn queue_limit(&self) -> f64 {
        self.max_pool_size as f64 * self.limiting_factor
    }

    fn is_saturated(&self) -> bool {
        self.pool.queue_len() as f64 >= self.queue_limit()
    }
}

impl<T: Send + 'static> ExecutionControlPlane<T> for QueueSizeBasedControlPlane {
    fn invoke_all(&self, tasks: Vec<Task<T>>) -> Vec<TaskFuture<T>> {
        let count = tasks.len();
        let mut futures = Vec::with_capacity(count);
        for (i, task) in tasks.into_iter().enumerate() {
            if i + 1 == count {
                futures.push(TaskFuture::run_on_caller(task));
            } else if self.is_saturated() {
                debug!(
                    "Pool queue at {} (limit {}), running task {i} on caller",
                    self.pool.queue_len(),
                    self.queue_limit()
                );
                futures.push(TaskFuture::run_on_caller(task));
            } else {
                futures.push(self.pool.execute(task));
            }
        }
        futures
    }

    fn name(&self) -> &'static str {
        "queue_size_based"
    }
}

/// Submits every task but the last to a worker pool; the last one runs on
/// the calling thread.
#[derive(Debug)]
pub struct SliceExecutionControlPlane {
    pool: Arc<WorkerPool>,
}

impl SliceExecutionControlPlane {
    /// Create a plane over `pool`.
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        SliceExecutionControlPlane { pool }
    }
}

impl<T: Send + 'static> ExecutionControlPlane<T> for SliceExecutionControlPlane {
    fn invoke_all(&self, tasks: Vec<Task<T>>) -> Vec<TaskFuture<T>> {
        let count = tasks.len();
        tasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| {
                if i + 1 == count {
                    TaskFuture::run_on_caller(task)
                } else {
                    self.pool.execute(task)
                }
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "slice_based"
    }
}

/// Fans every task out to a rayon pool without backpressure.
#[derive(Debug)]
pub struct RayonControlPlane {
    pool: Arc<ThreadPool>,
}

impl RayonControlPlane {
    /// Build a rayon pool of `num_threads` named threads.
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("phalanx-rayon-{i}"))
            .build()
            .map_err(|e| PhalanxError::thread_pool(format!("Failed to create thread pool: {e}")))?;
        Ok(RayonControlPlane {
            pool: Arc::new(pool),
        })
    }
}

impl<T: Send + 'static> ExecutionControlPlane<T> for RayonControlPlane {
    fn invoke_all(&self, tasks: Vec<Task<T>>) -> Vec<TaskFuture<T>> {
        tasks
            .into_iter()
            .map(|task| {
                let (tx, rx) = crossbeam_channel::bounded(1);
                self.pool.spawn(move || {
                    let _ = tx.send(run_task(task));
                });
                TaskFuture::pending(rx)
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "rayon"
    }
}

/// Runs every task on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialControlPlane;

impl<T: Send + 'static> ExecutionControlPlane<T> for SequentialControlPlane {
    fn invoke_all(&self, tasks: Vec<Task<T>>) -> Vec<TaskFuture<T>> {
        trace!("Running {} tasks sequentially", tasks.len());
        tasks.into_iter().map(TaskFuture::run_on_caller).collect()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Factory for creating control planes from configuration.
pub struct ControlPlaneFactory;

impl ControlPlaneFactory {
    /// Create the control plane selected by `config`, with its own pool.
    pub fn create<T: Send + 'static>(
        config: &ParallelSearchConfig,
    ) -> Result<Box<dyn ExecutionControlPlane<T>>> {
        let size = config.pool_size();
        let plane: Box<dyn ExecutionControlPlane<T>> = match config.control_plane {
            ControlPlaneType::QueueSizeBased => {
                let pool = Arc::new(WorkerPool::new("phalanx-search", size)?);
                Box::new(QueueSizeBasedControlPlane::new(pool, config.limiting_factor))
            }
            ControlPlaneType::SliceBased => {
                let pool = Arc::new(WorkerPool::new("phalanx-search", size)?);
                Box::new(SliceExecutionControlPlane::new(pool))
            }
            ControlPlaneType::Rayon => Box::new(RayonControlPlane::new(size)?),
            ControlPlaneType::Sequential => Box::new(SequentialControlPlane),
        };
        debug!(
            "Created {} control plane with {size} threads",
            plane.name()
        );
        Ok(plane)
    }
}
