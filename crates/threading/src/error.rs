//! Error types for the threading subsystem.

use std::fmt;

/// The main error type for threading operations.
#[derive(Debug)]
pub enum ThreadingError {
    /// A configuration value was invalid (e.g. zero thread count).
    InvalidConfig(String),
    /// A task could not be submitted because the executor's queue is full
    /// and the caller asked not to block.
    QueueFull,
    /// A task could not be submitted because the executor has been joined
    /// and is no longer accepting work.
    ExecutorClosed,
    /// `run()` panicked; the payload is the panic message, if recoverable as a string.
    TaskPanicked(String),
    /// A `sync(...)` call timed out waiting for the task to complete.
    ///
    /// Per the timeout contract this is informational only: the task is not
    /// cancelled, and the original blocking wait continues underneath.
    SyncTimeout,
    /// Timer-related error.
    Timer(TimerError),
}

impl fmt::Display for ThreadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid executor configuration: {msg}"),
            Self::QueueFull => write!(f, "executor queue is full"),
            Self::ExecutorClosed => write!(f, "executor has been joined and is closed"),
            Self::TaskPanicked(msg) => write!(f, "task panicked: {msg}"),
            Self::SyncTimeout => write!(f, "synchronous call timed out"),
            Self::Timer(err) => write!(f, "timer error: {err}"),
        }
    }
}

impl std::error::Error for ThreadingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timer(err) => Some(err),
            _ => None,
        }
    }
}

/// Timer-specific errors.
#[derive(Debug)]
pub enum TimerError {
    /// The timer has already been stopped or has never been started.
    NotArmed,
    /// The repeat interval was zero for an operation that requires repetition.
    ZeroInterval,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotArmed => write!(f, "timer is not armed"),
            Self::ZeroInterval => write!(f, "timer interval must be non-zero"),
        }
    }
}

impl std::error::Error for TimerError {}

impl From<TimerError> for ThreadingError {
    fn from(err: TimerError) -> Self {
        Self::Timer(err)
    }
}

/// A specialized `Result` type for threading operations.
pub type Result<T> = std::result::Result<T, ThreadingError>;
