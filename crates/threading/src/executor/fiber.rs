//! Single-threaded cooperative executor.
//!
//! A true stackful-fiber runtime is not required to satisfy the session
//! manager's packet executor, which only needs one dedicated thread running
//! work in submission order — so this variant runs each task to completion
//! in place on its single hosting thread rather than spawning a coroutine
//! per task. `extend()` is consequently a no-op: there is exactly one thread,
//! always.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvError, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use super::{PostWait, run_task_inline, spawn_named_thread};
use crate::diagnose::DiagnosticsRegistry;
use crate::error::{Result, ThreadingError};
use crate::task::{State, Task};

const DEFAULT_MAX_QUEUED: usize = 1024;

enum Msg {
    Task(Arc<Task>),
    Shutdown,
}

/// Configuration for a [`FiberExecutor`].
#[derive(Debug, Clone)]
pub struct FiberExecutorConfig {
    /// The executor's name; also the name of its single hosting thread.
    pub name: String,
    /// Stack size of the hosting thread. `None` uses the platform default.
    pub stack_size: Option<usize>,
    /// Capacity of the bounded queue feeding the hosting thread.
    pub max_queued: usize,
}

impl Default for FiberExecutorConfig {
    fn default() -> Self {
        Self {
            name: "fiber".to_string(),
            stack_size: None,
            max_queued: DEFAULT_MAX_QUEUED,
        }
    }
}

/// A single dedicated OS thread draining a bounded channel.
pub struct FiberExecutor {
    name: String,
    sender: Sender<Msg>,
    handle: Mutex<Option<JoinHandle<()>>>,
    active_tasks: Arc<AtomicUsize>,
    max_count: usize,
    registry: Arc<DiagnosticsRegistry>,
}

impl FiberExecutor {
    /// Builds and starts the hosting thread per `config`.
    pub fn new(config: FiberExecutorConfig, registry: Arc<DiagnosticsRegistry>) -> Self {
        let (sender, receiver) = bounded(config.max_queued);
        registry.on_executor_created(&config.name);

        let executor_name = config.name.clone();
        let thread_name = config.name.clone();
        let active_tasks = Arc::new(AtomicUsize::new(0));
        let active_tasks2 = active_tasks.clone();
        let registry2 = registry.clone();
        let handle = spawn_named_thread(thread_name.clone(), config.stack_size, move || {
            fiber_loop(executor_name, thread_name, receiver, active_tasks2, registry2);
        });

        FiberExecutor {
            name: config.name,
            sender,
            handle: Mutex::new(Some(handle)),
            active_tasks,
            max_count: config.max_queued,
            registry,
        }
    }

    /// The executor's immutable name, also the hosting thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `task` onto the hosting thread. A full or closed channel is
    /// reported to diagnostics as an exception before the error is returned,
    /// matching the original's `channel_op_status` handling.
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
            let msg = match err {
                ThreadingError::QueueFull => "fiber task full, rejected".to_string(),
                _ => "fiber closed, ignore".to_string(),
            };
            self.registry
                .on_task_exception(&self.name, 0, "", task.id(), task.name(), &msg);
            task.set_state(State::Finished);
            return Err(err);
        }
        Ok(task)
    }

    /// A no-op: the fiber executor is always exactly one thread.
    pub fn extend(&self, _n: usize) -> usize {
        self.max_count
    }

    /// Tasks currently executing (0 or 1, since there is one hosting thread).
    pub fn busy_count(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Stops accepting work and waits for the queue to drain.
    pub fn join(&self) {
        let _ = self.sender.send(Msg::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        self.registry.on_executor_destroyed(&self.name);
    }
}

fn fiber_loop(
    executor_name: String,
    thread_name: String,
    receiver: Receiver<Msg>,
    active_tasks: Arc<AtomicUsize>,
    registry: Arc<DiagnosticsRegistry>,
) {
    loop {
        match receiver.recv() {
            Ok(Msg::Task(task)) => {
                active_tasks.fetch_add(1, Ordering::AcqRel);
                run_task_inline(&executor_name, 0, &thread_name, &task, &registry);
                active_tasks.fetch_sub(1, Ordering::AcqRel);
            }
            Ok(Msg::Shutdown) => break,
            Err(RecvError) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    fn fiber() -> FiberExecutor {
        FiberExecutor::new(
            FiberExecutorConfig {
                name: "fb".to_string(),
                ..Default::default()
            },
            Arc::new(DiagnosticsRegistry::new()),
        )
    }

    #[test]
    fn runs_tasks_sequentially_in_order() {
        let fb = fiber();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            fb.post(Task::new(format!("t{i}"), move || order.lock().push(i)), PostWait::Block)
                .unwrap();
        }
        fb.join();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn extend_is_a_noop() {
        let fb = fiber();
        let before = fb.extend(0);
        let after = fb.extend(10);
        assert_eq!(before, after);
        fb.join();
    }

    #[test]
    fn full_queue_reports_rejected_without_panicking() {
        let fb = FiberExecutor::new(
            FiberExecutorConfig {
                name: "fb-small".to_string(),
                max_queued: 1,
                ..Default::default()
            },
            Arc::new(DiagnosticsRegistry::new()),
        );
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let b = barrier.clone();
        fb.post(
            Task::new("blocker", move || {
                b.wait();
                std::thread::sleep(Duration::from_millis(100));
            }),
            PostWait::Block,
        )
        .unwrap();
        barrier.wait();
        // Hosting thread is now busy with "blocker"; the channel has
        // capacity 1, fill it, then a non-blocking post should be rejected.
        fb.post(Task::new("filler", || {}), PostWait::Block).unwrap();
        let rejected = fb.post(Task::new("overflow", || {}), PostWait::DontWait);
        assert!(matches!(rejected, Err(ThreadingError::QueueFull)));
        fb.join();
    }

    #[test]
    fn join_after_close_reports_closed() {
        let fb = fiber();
        fb.join();
        let result = fb.post(Task::new("late", || {}), PostWait::DontWait);
        assert!(matches!(result, Err(ThreadingError::ExecutorClosed)));
        let flag = Arc::new(AtomicI32::new(0));
        drop(flag);
    }
}
