//! Process-wide diagnostics registry.
//!
//! Every [`crate::executor`] implementation reports task lifecycle
//! transitions here. The registry is a single mutex-guarded map; it never
//! extends a task's lifetime past its natural end, and it never calls a
//! user-installed callback while holding its own lock, so callback code can
//! safely touch executors without risking a deadlock against an executor's
//! hot path.
//!
//! A process-wide instance is available via [`DiagnosticsRegistry::global`],
//! but nothing requires it: tests construct their own hermetic
//! `DiagnosticsRegistry::new()` and pass it explicitly into executors.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::task::TaskId;

/// `(executor_name, thread_id, thread_name, task_id, task_name, elapsed)`.
pub type StateCallback = Arc<dyn Fn(&str, u64, &str, u64, &str, Duration) + Send + Sync>;
/// `(executor_name, thread_id, thread_name, task_id, task_name, error_message)`.
pub type ExceptionCallback = Arc<dyn Fn(&str, u64, &str, u64, &str, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskDiagState {
    Queuing,
    Running,
    Finished,
    Abnormal,
}

impl TaskDiagState {
    fn as_str(self) -> &'static str {
        match self {
            TaskDiagState::Queuing => "queuing",
            TaskDiagState::Running => "running",
            TaskDiagState::Finished => "finished",
            TaskDiagState::Abnormal => "abnormal",
        }
    }
}

struct TaskDiagRecord {
    name: String,
    state: TaskDiagState,
    thread_id: Option<u64>,
    thread_name: Option<String>,
    queuing_at: Instant,
    running_at: Option<Instant>,
    finished_at: Option<Instant>,
    error: Option<String>,
}

struct ExecutorDiagRecord {
    tasks: HashMap<TaskId, TaskDiagRecord>,
}

#[derive(Default)]
struct Callbacks {
    bind: Option<Arc<dyn Fn(&str, u64, &str) + Send + Sync>>,
    running: Option<StateCallback>,
    finished: Option<StateCallback>,
    exception: Option<ExceptionCallback>,
}

/// A process-wide observer of every executor's task lifecycle.
pub struct DiagnosticsRegistry {
    executors: Mutex<HashMap<String, ExecutorDiagRecord>>,
    callbacks: Mutex<Callbacks>,
}

static GLOBAL: OnceLock<DiagnosticsRegistry> = OnceLock::new();

impl DiagnosticsRegistry {
    /// Creates a fresh, empty registry. Prefer this in tests so assertions
    /// are hermetic and unaffected by other tests sharing [`Self::global`].
    pub fn new() -> Self {
        Self {
            executors: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    /// Returns the lazily-initialized, process-wide registry.
    pub fn global() -> &'static DiagnosticsRegistry {
        GLOBAL.get_or_init(DiagnosticsRegistry::new)
    }

    /// Installs a callback invoked whenever a task is bound to an executor
    /// (i.e. enters `Queuing`).
    pub fn set_task_bind_callback<F>(&self, f: F)
    where
        F: Fn(&str, u64, &str) + Send + Sync + 'static,
    {
        self.callbacks.lock().bind = Some(Arc::new(f));
    }

    /// Installs a callback invoked when a task transitions to `Running`.
    pub fn set_task_running_state_callback<F>(&self, f: F)
    where
        F: Fn(&str, u64, &str, u64, &str, Duration) + Send + Sync + 'static,
    {
        self.callbacks.lock().running = Some(Arc::new(f));
    }

    /// Installs a callback invoked when a task transitions to `Finished`.
    pub fn set_task_finished_state_callback<F>(&self, f: F)
    where
        F: Fn(&str, u64, &str, u64, &str, Duration) + Send + Sync + 'static,
    {
        self.callbacks.lock().finished = Some(Arc::new(f));
    }

    /// Installs a callback invoked when a task's `run()` panics.
    pub fn set_task_exception_state_callback<F>(&self, f: F)
    where
        F: Fn(&str, u64, &str, u64, &str, &str) + Send + Sync + 'static,
    {
        self.callbacks.lock().exception = Some(Arc::new(f));
    }

    /// Registers a new top-level executor entry.
    pub fn on_executor_created(&self, executor_name: &str) {
        self.executors
            .lock()
            .entry(executor_name.to_string())
            .or_insert_with(|| ExecutorDiagRecord {
                tasks: HashMap::new(),
            });
    }

    /// Removes an executor entry and everything registered beneath it.
    pub fn on_executor_destroyed(&self, executor_name: &str) {
        self.executors.lock().remove(executor_name);
    }

    /// Allocates a diagnostic record stamped `queuing = now`.
    pub fn on_task_created(&self, executor_name: &str, task_id: TaskId, task_name: &str) {
        {
            let mut executors = self.executors.lock();
            let entry = executors
                .entry(executor_name.to_string())
                .or_insert_with(|| ExecutorDiagRecord {
                    tasks: HashMap::new(),
                });
            entry.tasks.insert(
                task_id,
                TaskDiagRecord {
                    name: task_name.to_string(),
                    state: TaskDiagState::Queuing,
                    thread_id: None,
                    thread_name: None,
                    queuing_at: Instant::now(),
                    running_at: None,
                    finished_at: None,
                    error: None,
                },
            );
        }
        if let Some(cb) = self.callbacks.lock().bind.clone() {
            cb(executor_name, 0, task_name);
        }
    }

    /// Stamps `running = now`; fires the running callback with `elapsed =
    /// running - queuing`.
    pub fn on_task_running(
        &self,
        executor_name: &str,
        thread_id: u64,
        thread_name: &str,
        task_id: TaskId,
        task_name: &str,
    ) {
        let elapsed = {
            let mut executors = self.executors.lock();
            let Some(exec) = executors.get_mut(executor_name) else {
                return;
            };
            let Some(rec) = exec.tasks.get_mut(&task_id) else {
                return;
            };
            rec.state = TaskDiagState::Running;
            rec.thread_id = Some(thread_id);
            rec.thread_name = Some(thread_name.to_string());
            let now = Instant::now();
            rec.running_at = Some(now);
            now.saturating_duration_since(rec.queuing_at)
        };
        if let Some(cb) = self.callbacks.lock().running.clone() {
            cb(
                executor_name,
                thread_id,
                thread_name,
                task_id.as_u64(),
                task_name,
                elapsed,
            );
        }
    }

    /// Stamps `finished = now`, fires the finished callback with `elapsed =
    /// finished - running`, then deletes the record.
    pub fn on_task_finished(
        &self,
        executor_name: &str,
        thread_id: u64,
        thread_name: &str,
        task_id: TaskId,
        task_name: &str,
    ) {
        let elapsed = {
            let mut executors = self.executors.lock();
            let Some(exec) = executors.get_mut(executor_name) else {
                return;
            };
            let Some(rec) = exec.tasks.get_mut(&task_id) else {
                return;
            };
            rec.state = TaskDiagState::Finished;
            let now = Instant::now();
            rec.finished_at = Some(now);
            let elapsed = now.saturating_duration_since(rec.running_at.unwrap_or(rec.queuing_at));
            exec.tasks.remove(&task_id);
            elapsed
        };
        if let Some(cb) = self.callbacks.lock().finished.clone() {
            cb(
                executor_name,
                thread_id,
                thread_name,
                task_id.as_u64(),
                task_name,
                elapsed,
            );
        }
    }

    /// Stamps `abnormal = now`, saves `msg`, fires the exception callback,
    /// then deletes the record.
    pub fn on_task_exception(
        &self,
        executor_name: &str,
        thread_id: u64,
        thread_name: &str,
        task_id: TaskId,
        task_name: &str,
        msg: &str,
    ) {
        {
            let mut executors = self.executors.lock();
            if let Some(exec) = executors.get_mut(executor_name) {
                if let Some(rec) = exec.tasks.get_mut(&task_id) {
                    rec.state = TaskDiagState::Abnormal;
                    rec.error = Some(msg.to_string());
                }
                exec.tasks.remove(&task_id);
            }
        }
        if let Some(cb) = self.callbacks.lock().exception.clone() {
            cb(executor_name, thread_id, thread_name, task_id.as_u64(), task_name, msg);
        }
    }

    /// Returns a structured snapshot of every known executor with its nested
    /// tasks, serialized to the documented JSON shape.
    pub fn get_diagnose_info(&self) -> String {
        let executors = self.executors.lock();
        let mut snapshot = Snapshot { executor: Vec::new() };
        let mut names: Vec<&String> = executors.keys().collect();
        names.sort();
        for name in names {
            let exec = &executors[name];
            let mut tasks: Vec<TaskSnapshot> = exec
                .tasks
                .iter()
                .map(|(id, rec)| TaskSnapshot {
                    id: id.as_u64(),
                    name: rec.name.clone(),
                    thread_id: rec.thread_id.unwrap_or(0),
                    thread_name: rec.thread_name.clone().unwrap_or_default(),
                    state: rec.state.as_str().to_string(),
                    queue: duration_to_string(rec.running_at.unwrap_or_else(Instant::now).saturating_duration_since(rec.queuing_at)),
                    run: rec.running_at.map(|r| {
                        duration_to_string(rec.finished_at.unwrap_or_else(Instant::now).saturating_duration_since(r))
                    }),
                    error: rec.error.clone(),
                })
                .collect();
            tasks.sort_by_key(|t| t.id);
            snapshot.executor.push(ExecutorSnapshot {
                name: name.clone(),
                count: tasks.len(),
                task: tasks,
            });
        }
        serde_json::to_string(&snapshot).unwrap_or_else(|_| "{\"executor\":[]}".to_string())
    }
}

impl Default for DiagnosticsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Snapshot {
    executor: Vec<ExecutorSnapshot>,
}

#[derive(Serialize)]
struct ExecutorSnapshot {
    name: String,
    count: usize,
    task: Vec<TaskSnapshot>,
}

#[derive(Serialize)]
struct TaskSnapshot {
    id: u64,
    name: String,
    thread_id: u64,
    thread_name: String,
    state: String,
    queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Formats a duration with the smallest unit among `ns`/`us`/`ms` that keeps
/// the value readable, matching the documented snapshot shape.
fn duration_to_string(d: Duration) -> String {
    let nanos = d.as_nanos();
    let mut out = String::new();
    if nanos < 1_000 {
        let _ = write!(out, "{nanos}ns");
    } else if nanos < 1_000_000 {
        let _ = write!(out, "{}us", nanos / 1_000);
    } else {
        let _ = write!(out, "{}ms", nanos / 1_000_000);
    }
    out
}
