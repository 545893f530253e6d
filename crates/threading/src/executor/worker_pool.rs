//! Parallel worker-pool executor: N OS threads sharing one bounded MPMC queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvError, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use super::{PostWait, run_task_inline, spawn_named_thread};
use crate::diagnose::DiagnosticsRegistry;
use crate::error::{Result, ThreadingError};
use crate::task::{State, Task};

const DEFAULT_QUEUE_CAPACITY: usize = 4096;

enum Msg {
    Task(Arc<Task>),
    Shutdown,
}

/// Configuration for a [`WorkerPoolExecutor`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// The executor's name; worker threads are named `<name>-<index>`.
    pub name: String,
    /// Number of OS threads to start with. `extend()` can add more later.
    pub num_threads: usize,
    /// Stack size per worker thread in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Capacity of the bounded task queue shared by all threads.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "worker-pool".to_string(),
            num_threads: 1,
            stack_size: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// N OS threads bound to a single MPMC task queue.
///
/// Each thread pumps [`Task`]s off the shared queue and runs the same
/// create/queue/run/finish boundary as every other executor variant. Threads
/// are named `<executor-name>-<index>` so diagnostics and OS tooling can tell
/// them apart.
pub struct WorkerPoolExecutor {
    name: String,
    sender: Sender<Msg>,
    receiver: Receiver<Msg>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_index: AtomicUsize,
    active_tasks: Arc<AtomicUsize>,
    max_count: AtomicUsize,
    registry: Arc<DiagnosticsRegistry>,
    stack_size: Option<usize>,
}

impl WorkerPoolExecutor {
    /// Builds and starts a worker pool per `config`, reporting every
    /// transition through `registry`.
    pub fn new(config: WorkerPoolConfig, registry: Arc<DiagnosticsRegistry>) -> Result<Self> {
        if config.num_threads == 0 {
            return Err(ThreadingError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        let (sender, receiver) = bounded(config.queue_capacity);
        registry.on_executor_created(&config.name);
        let pool = WorkerPoolExecutor {
            name: config.name,
            sender,
            receiver,
            threads: Mutex::new(Vec::new()),
            next_index: AtomicUsize::new(0),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            max_count: AtomicUsize::new(0),
            registry,
            stack_size: config.stack_size,
        };
        pool.extend(config.num_threads);
        Ok(pool)
    }

    /// The executor's immutable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `task`, stamping it `Queuing` and binding it in the registry.
    pub fn post(&self, task: Arc<Task>, wait: PostWait) -> Result<Arc<Task>> {
        task.set_state(State::Queuing);
        self.registry.on_task_created(&self.name, task.id(), task.name());

        let msg = Msg::Task(task.clone());
        let outcome = match wait {
            PostWait::Block => self.sender.send(msg).map_err(|_| ThreadingError::ExecutorClosed),
            PostWait::DontWait => self.sender.try_send(msg).map_err(|e| match e {
                TrySendError::Full(_) => ThreadingError::QueueFull,
                TrySendError::Disconnected(_) => ThreadingError::ExecutorClosed,
            }),
        };

        if let Err(err) = outcome {
            self.registry.on_task_exception(
                &self.name,
                0,
                "",
                task.id(),
                task.name(),
                &err.to_string(),
            );
            task.set_state(State::Finished);
            return Err(err);
        }
        Ok(task)
    }

    /// Adds `n` more threads to the pool, returning the new total thread count.
    pub fn extend(&self, n: usize) -> usize {
        let mut threads = self.threads.lock();
        for _ in 0..n {
            let idx = self.next_index.fetch_add(1, Ordering::Relaxed);
            let thread_name = format!("{}-{idx}", self.name);
            let receiver = self.receiver.clone();
            let executor_name = self.name.clone();
            let active_tasks = self.active_tasks.clone();
            let registry = self.registry.clone();
            let handle = spawn_named_thread(thread_name.clone(), self.stack_size, move || {
                worker_loop(executor_name, idx as u64, thread_name, receiver, active_tasks, registry);
            });
            threads.push(handle);
        }
        self.max_count.fetch_add(n, Ordering::AcqRel);
        self.max_count.load(Ordering::Acquire)
    }

    /// The number of tasks currently executing across all threads.
    pub fn busy_count(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Stops accepting work and waits for the queue to drain.
    ///
    /// One `Shutdown` message is enqueued per live thread; because the
    /// channel is FIFO, every task submitted before `join()` is called runs
    /// to completion before any thread observes its shutdown message.
    pub fn join(&self) {
        let mut threads = self.threads.lock();
        for _ in 0..threads.len() {
            let _ = self.sender.send(Msg::Shutdown);
        }
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        self.registry.on_executor_destroyed(&self.name);
    }
}

fn worker_loop(
    executor_name: String,
    thread_id: u64,
    thread_name: String,
    receiver: Receiver<Msg>,
    active_tasks: Arc<AtomicUsize>,
    registry: Arc<DiagnosticsRegistry>,
) {
    loop {
        match receiver.recv() {
            Ok(Msg::Task(task)) => {
                active_tasks.fetch_add(1, Ordering::AcqRel);
                run_task_inline(&executor_name, thread_id, &thread_name, &task, &registry);
                active_tasks.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(Msg::Shutdown) => break,
            Err(RecvError) => break,
        }
    }
}
