//! Core threading and task-orchestration primitives.
//!
//! This crate provides:
//!
//! - **Task**: a named, cancellable unit of work with an observable lifecycle
//!   ([`task`]).
//! - **Executor**: worker-pool and fiber variants that accept tasks,
//!   schedule them, and report every transition to diagnostics ([`executor`]).
//! - **Timers**: steady (monotonic) and deadline (wall-clock) one-shot and
//!   repeating timers that post tasks onto a bound executor ([`timer`]).
//! - **Diagnostics**: a process-wide registry observing every executor and
//!   task transition, exposing a JSON snapshot ([`diagnose`]).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use threading::diagnose::DiagnosticsRegistry;
//! use threading::executor::{Executor, PostWait, WorkerPoolConfig, WorkerPoolExecutor};
//!
//! let registry = Arc::new(DiagnosticsRegistry::new());
//! let pool = Executor::WorkerPool(
//!     WorkerPoolExecutor::new(
//!         WorkerPoolConfig { name: "wp".to_string(), num_threads: 2, ..Default::default() },
//!         registry,
//!     )
//!     .unwrap(),
//! );
//!
//! let done = Arc::new(AtomicBool::new(false));
//! let done2 = done.clone();
//! let task = pool.post_fn("t1", move || done2.store(true, Ordering::SeqCst), PostWait::Block).unwrap();
//! task.join();
//! assert!(done.load(Ordering::SeqCst));
//! pool.join();
//! ```

#![warn(missing_docs)]

pub mod diagnose;
pub mod error;
pub mod executor;
pub mod logging;
pub mod task;
pub mod timer;

pub use diagnose::DiagnosticsRegistry;
pub use error::{Result, ThreadingError, TimerError};
pub use executor::{Executor, FiberExecutor, FiberExecutorConfig, PostWait, WorkerPoolConfig, WorkerPoolExecutor};
pub use task::{State, Task, TaskId};
pub use timer::{DeadlineTimer, SteadyTimer};
