//! The `Task`: a named, cancellable unit of work with an observable lifecycle.
//!
//! A `Task` carries no result of its own — callers who need a result build it
//! on top, either by capturing a handle in the task body or via
//! [`crate::executor::TaskHandle`]. `Task` only answers two questions: "what
//! state is this in" and "block me until it's no longer running".

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

/// A unique identifier for a task, assigned monotonically per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Returns the raw numeric value of this id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// The lifecycle state of a [`Task`].
///
/// Transitions are strictly monotonic: `created < queuing < running <
/// finished`. There is no `abnormal` state on the task itself — a task that
/// panics still settles in `Finished`; the failure is reported to the
/// diagnostics registry as a side channel (see [`crate::diagnose`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// The task has been constructed but not yet submitted to an executor.
    Created = 0,
    /// The task is sitting in an executor's queue, awaiting a thread or fiber.
    Queuing = 1,
    /// The task's body is currently executing.
    Running = 2,
    /// The task has left the executor; `join()` returns immediately from here on.
    Finished = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Created,
            1 => State::Queuing,
            2 => State::Running,
            _ => State::Finished,
        }
    }
}

type BoxedBody = Box<dyn FnOnce() + Send + 'static>;

/// A named, cancellable unit of work with an observable lifecycle state.
///
/// Tasks are always handled through `Arc<Task>`: both the submitter and the
/// executor running it hold a handle, and the underlying allocation outlives
/// the executor's own queue slot.
pub struct Task {
    id: TaskId,
    name: String,
    state: AtomicU8,
    cancelled: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
    body: Mutex<Option<BoxedBody>>,
}

impl Task {
    /// Creates a new task in state [`State::Created`] wrapping `body`.
    pub fn new<F>(name: impl Into<String>, body: F) -> Arc<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Task {
            id: next_task_id(),
            name: name.into(),
            state: AtomicU8::new(State::Created as u8),
            cancelled: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            body: Mutex::new(Some(Box::new(body))),
        })
    }

    /// This task's monotonic id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// This task's human-readable name, typically `file:line:function` of the
    /// submission site so diagnostics can point back at the caller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Requests cancellation. Advisory only: it prevents the task from
    /// entering `Running` if observed in time at the `Queuing -> Running`
    /// edge; a task already running is not interrupted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Blocks the caller until this task's state is no longer `Running`
    /// (including the case where it never reached `Running` at all, e.g. a
    /// cancelled task that went straight to `Finished`).
    pub fn join(&self) {
        if self.state() != State::Running && self.state() != State::Created && self.state() != State::Queuing {
            return;
        }
        let mut guard = self.mutex.lock();
        // Re-check with the lock held: `set_state` also takes this lock
        // before notifying, so there is no lost-wakeup window here.
        while self.state() == State::Running
            || self.state() == State::Created
            || self.state() == State::Queuing
        {
            self.condvar.wait(&mut guard);
        }
    }

    /// Called only by an [`crate::executor`] implementation to advance the
    /// lifecycle state. Updates atomically and wakes any `join()` waiters.
    pub(crate) fn set_state(&self, s: State) {
        let _guard = self.mutex.lock();
        self.state.store(s as u8, Ordering::Release);
        self.condvar.notify_all();
    }

    /// Takes the task body out, leaving `None` behind. Executors call this
    /// exactly once; a second call (or a task that was never given a body)
    /// yields `None` and the executor simply finishes without running anything.
    pub(crate) fn take_body(&self) -> Option<BoxedBody> {
        self.body.lock().take()
    }

    /// Runs `body` if present, converting a panic into an `Err(String)`
    /// rather than letting it unwind across the executor boundary.
    pub(crate) fn run_body(body: BoxedBody) -> std::result::Result<(), String> {
        panic::catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "task panicked with a non-string payload".to_string()
            }
        })
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn new_task_starts_created() {
        let task = Task::new("t", || {});
        assert_eq!(task.state(), State::Created);
        assert!(!task.is_cancelled());
    }

    #[test]
    fn join_returns_immediately_once_finished() {
        let task = Task::new("t", || {});
        task.set_state(State::Queuing);
        task.set_state(State::Running);
        task.set_state(State::Finished);
        task.join();
        task.join();
    }

    #[test]
    fn join_blocks_until_finished() {
        let flag = Arc::new(AtomicI32::new(0));
        let flag2 = flag.clone();
        let task = Task::new("t", move || {
            thread::sleep(Duration::from_millis(30));
            flag2.store(1, Ordering::SeqCst);
        });
        task.set_state(State::Queuing);
        task.set_state(State::Running);
        let body = task.take_body().unwrap();
        let t2 = task.clone();
        let handle = thread::spawn(move || {
            Task::run_body(body).unwrap();
            t2.set_state(State::Finished);
        });
        task.join();
        handle.join().unwrap();
        assert_eq!(flag.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_is_advisory_only() {
        let task = Task::new("t", || {});
        task.cancel();
        assert!(task.is_cancelled());
        task.set_state(State::Queuing);
        task.set_state(State::Finished);
        task.join();
    }

    #[test]
    fn ids_are_monotonic() {
        let a = Task::new("a", || {});
        let b = Task::new("b", || {});
        assert!(b.id().as_u64() > a.id().as_u64());
    }
}
