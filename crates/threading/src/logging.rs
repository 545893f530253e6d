//! Logging facilities for the threading subsystem.
//!
//! This module does not implement a logging sink itself — that is an
//! external collaborator. It standardizes how this crate talks to the
//! `tracing` crate: consistent span/target names so a downstream subscriber
//! can filter threading, timer, and diagnostics traffic independently.
//!
//! # Installing a subscriber
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```

/// Span names used throughout this crate for tracing.
pub mod span_names {
    /// Executor task-processing span.
    pub const TASK: &str = "threading::task";
    /// Timer processing span.
    pub const TIMER: &str = "threading::timer";
    /// Diagnostics registry span.
    pub const DIAGNOSE: &str = "threading::diagnose";
}

/// Target names for log filtering.
pub mod targets {
    /// Core threading target.
    pub const CORE: &str = "threading";
    /// Executor target.
    pub const EXECUTOR: &str = "threading::executor";
    /// Timer system target.
    pub const TIMER: &str = "threading::timer";
    /// Diagnostics registry target.
    pub const DIAGNOSE: &str = "threading::diagnose";
}

/// A guard that emits a tracing span for the duration it is held, used to
/// bracket the lifetime of a task run or a timer fire in traces.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Creates a new performance span, active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "threading", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Macros for common tracing patterns, wrapping `tracing`'s macros with this
/// crate's target naming so call sites stay short.
#[macro_export]
macro_rules! threading_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "threading", $($arg)*)
    };
}

#[macro_export]
macro_rules! threading_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "threading", $($arg)*)
    };
}

#[macro_export]
macro_rules! threading_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "threading", $($arg)*)
    };
}
