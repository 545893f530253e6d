//! Executors: accept [`Task`](crate::task::Task)s, schedule them, and report
//! every transition to a [`DiagnosticsRegistry`].
//!
//! Two variants share one surface: [`WorkerPoolExecutor`] (N OS threads over
//! one MPMC queue) and [`FiberExecutor`] (a single dedicated OS thread
//! draining a bounded channel). Rather than dynamic dispatch, callers that
//! need to hold either kind behind one value use the [`Executor`] sum type,
//! which forwards to whichever variant it wraps.

mod fiber;
mod worker_pool;

pub use fiber::{FiberExecutor, FiberExecutorConfig};
pub use worker_pool::{WorkerPoolConfig, WorkerPoolExecutor};

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::diagnose::DiagnosticsRegistry;
use crate::error::{Result, ThreadingError};
use crate::task::{State, Task};

/// Whether a bounded-queue submission blocks when the queue is full or
/// returns immediately with [`ThreadingError::QueueFull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostWait {
    /// Block the caller until there is room in the queue.
    Block,
    /// Return an error immediately if the queue is full.
    DontWait,
}

/// Either kind of executor, behind one value.
///
/// This is the sum-type replacement for the original's dynamic dispatch
/// across executor variants: callers match on it where behavior genuinely
/// differs (`extend` is meaningful only for `WorkerPool`) and otherwise call
/// the shared methods below.
pub enum Executor {
    /// A parallel worker pool.
    WorkerPool(WorkerPoolExecutor),
    /// A single-threaded cooperative executor.
    Fiber(FiberExecutor),
}

impl Executor {
    /// This executor's immutable name.
    pub fn name(&self) -> &str {
        match self {
            Executor::WorkerPool(e) => e.name(),
            Executor::Fiber(e) => e.name(),
        }
    }

    /// Queues `task` for execution.
    pub fn post(&self, task: Arc<Task>, wait: PostWait) -> Result<Arc<Task>> {
        match self {
            Executor::WorkerPool(e) => e.post(task, wait),
            Executor::Fiber(e) => e.post(task, wait),
        }
    }

    /// Convenience: wraps `f` in a minimal [`Task`] named `name` and posts it.
    pub fn post_fn<F>(&self, name: impl Into<String>, f: F, wait: PostWait) -> Result<Arc<Task>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Task::new(name, f), wait)
    }

    /// Stops accepting new work and blocks until all in-flight work drains.
    pub fn join(&self) {
        match self {
            Executor::WorkerPool(e) => e.join(),
            Executor::Fiber(e) => e.join(),
        }
    }

    /// Grows capacity by `n`. A no-op for the fiber variant, which always
    /// returns its fixed `max_count` unchanged.
    pub fn extend(&self, n: usize) -> usize {
        match self {
            Executor::WorkerPool(e) => e.extend(n),
            Executor::Fiber(e) => e.extend(n),
        }
    }

    /// The number of tasks currently executing (not merely queued).
    pub fn busy_count(&self) -> usize {
        match self {
            Executor::WorkerPool(e) => e.busy_count(),
            Executor::Fiber(e) => e.busy_count(),
        }
    }
}

/// Runs `task` to completion inline on the calling thread, performing the
/// exact state-transition / diagnostics dance every executor variant shares:
/// cancellation observed at the `queuing -> running` edge skips `running`
/// entirely; a panic is caught and reported as an exception rather than
/// unwinding across the executor boundary.
pub(crate) fn run_task_inline(
    executor_name: &str,
    thread_id: u64,
    thread_name: &str,
    task: &Arc<Task>,
    registry: &DiagnosticsRegistry,
) {
    if task.is_cancelled() {
        task.set_state(State::Finished);
        registry.on_task_finished(executor_name, thread_id, thread_name, task.id(), task.name());
        return;
    }

    task.set_state(State::Running);
    registry.on_task_running(executor_name, thread_id, thread_name, task.id(), task.name());

    let outcome = match task.take_body() {
        Some(body) => Task::run_body(body),
        None => Ok(()),
    };

    task.set_state(State::Finished);
    match outcome {
        Ok(()) => {
            registry.on_task_finished(executor_name, thread_id, thread_name, task.id(), task.name());
        }
        Err(msg) => {
            registry.on_task_exception(
                executor_name,
                thread_id,
                thread_name,
                task.id(),
                task.name(),
                &msg,
            );
        }
    }
}

/// Posts `f` to `executor` and blocks the caller until it completes.
///
/// If `timeout` elapses first, the timeout is reported to `registry` as a
/// diagnostic exception event **without cancelling the task** — `run()`
/// keeps executing and the caller keeps waiting underneath. This mirrors the
/// original's `sync(...)` helper, which treats a timeout purely as a
/// diagnostics signal, not a cancellation trigger.
pub fn sync<F, R>(
    name: impl Into<String>,
    f: F,
    executor: &Executor,
    timeout: Option<Duration>,
    registry: &DiagnosticsRegistry,
) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = bounded::<R>(1);
    let name = name.into();
    let task = executor.post_fn(
        name.clone(),
        move || {
            let _ = tx.send(f());
        },
        PostWait::Block,
    )?;

    if let Some(timeout) = timeout {
        match rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(_) => {
                registry.on_task_exception(
                    executor.name(),
                    0,
                    "",
                    task.id(),
                    &name,
                    &format!("timeout [{}ms]", timeout.as_millis()),
                );
                // Per contract: do not cancel, keep waiting for the real result.
                rx.recv().map_err(|_| ThreadingError::SyncTimeout)
            }
        }
    } else {
        rx.recv().map_err(|_| ThreadingError::SyncTimeout)
    }
}

/// Fire-and-forget: posts `f` to `executor` and returns immediately.
pub fn post_async<F>(name: impl Into<String>, f: F, executor: &Executor) -> Result<Arc<Task>>
where
    F: FnOnce() + Send + 'static,
{
    executor.post_fn(name, f, PostWait::DontWait)
}

/// Spawns a background OS thread that polls `receiver` until a `None` (the
/// shutdown signal) is delivered or the channel is disconnected.
///
/// Shared between the worker-pool and fiber variants for the shutdown-drain
/// pattern: the caller arranges for shutdown messages to be enqueued only
/// after all real work has been pushed, so the bounded channel's FIFO order
/// guarantees every previously submitted task runs before the thread exits.
pub(crate) fn spawn_named_thread<F>(name: String, stack_size: Option<usize>, body: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    let mut builder = thread::Builder::new().name(name);
    if let Some(size) = stack_size {
        builder = builder.stack_size(size);
    }
    builder.spawn(body).expect("failed to spawn executor thread")
}
