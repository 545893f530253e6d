//! Steady (monotonic) and deadline (wall-clock) timers.
//!
//! Each timer owns one dedicated background thread that sleeps until the
//! next scheduled fire, then posts a freshly-created [`Task`](crate::task::Task)
//! onto its bound [`Executor`]. A late fire (the executor was busy) re-arms
//! from the *scheduled* time, not the actual fire time, so a repeating
//! timer's period does not drift.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex};

use crate::executor::{Executor, PostWait};

type FireCallback = Arc<dyn Fn(Instant) + Send + Sync>;
type DeadlineFireCallback = Arc<dyn Fn(SystemTime) + Send + Sync>;

struct SteadyState {
    delay: Duration,
    interval: Duration,
    next_fire: Instant,
    armed: bool,
    shutdown: bool,
    generation: u64,
}

/// A monotonic timer: fires once after `delay`, and if `interval` is
/// non-zero, every `interval` thereafter until [`SteadyTimer::stop`].
pub struct SteadyTimer {
    name: String,
    executor: Arc<Executor>,
    callback: FireCallback,
    state: Mutex<SteadyState>,
    cv: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SteadyTimer {
    /// Creates a stopped timer. Call [`Self::start`] to arm it.
    pub fn new(
        name: impl Into<String>,
        delay: Duration,
        interval: Duration,
        executor: Arc<Executor>,
        callback: impl Fn(Instant) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let timer = Arc::new(SteadyTimer {
            name: name.into(),
            executor,
            callback: Arc::new(callback),
            state: Mutex::new(SteadyState {
                delay,
                interval,
                next_fire: Instant::now(),
                armed: false,
                shutdown: false,
                generation: 0,
            }),
            cv: Condvar::new(),
            thread: Mutex::new(None),
        });
        let worker = timer.clone();
        let handle = std::thread::Builder::new()
            .name(format!("timer-{}", timer.name))
            .spawn(move || worker.run())
            .expect("failed to spawn timer thread");
        *timer.thread.lock() = Some(handle);
        timer
    }

    /// Builds and starts a one-shot timer.
    pub fn once(
        name: impl Into<String>,
        delay: Duration,
        executor: Arc<Executor>,
        callback: impl Fn(Instant) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let timer = Self::new(name, delay, Duration::ZERO, executor, callback);
        timer.start();
        timer
    }

    /// Builds and starts a repeating timer with first fire after `interval`.
    pub fn looping(
        name: impl Into<String>,
        interval: Duration,
        executor: Arc<Executor>,
        callback: impl Fn(Instant) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let timer = Self::new(name, interval, interval, executor, callback);
        timer.start();
        timer
    }

    /// Arms the timer. If already armed, restarts the countdown from now.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.next_fire = Instant::now() + state.delay;
        state.armed = true;
        state.generation += 1;
        self.cv.notify_all();
    }

    /// Cancels any pending fire. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.armed = false;
        state.generation += 1;
        self.cv.notify_all();
    }

    /// Sets a new delay, restarting the countdown from now if armed.
    pub fn set_delay(&self, delay: Duration) {
        let mut state = self.state.lock();
        state.delay = delay;
        if state.armed {
            state.next_fire = Instant::now() + delay;
            state.generation += 1;
            self.cv.notify_all();
        }
    }

    /// Whether the timer currently has a pending fire armed.
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            if !state.armed {
                self.cv.wait(&mut state);
                continue;
            }
            let now = Instant::now();
            if state.next_fire > now {
                let remaining = state.next_fire - now;
                self.cv.wait_for(&mut state, remaining);
                continue;
            }

            let scheduled = state.next_fire;
            let generation = state.generation;
            let interval = state.interval;
            drop(state);

            let cb = self.callback.clone();
            let _ = self
                .executor
                .post_fn(self.name.clone(), move || cb(scheduled), PostWait::DontWait);

            state = self.state.lock();
            if state.generation != generation || state.shutdown {
                continue;
            }
            if interval.is_zero() {
                state.armed = false;
            } else {
                state.next_fire = scheduled + interval;
            }
        }
    }
}

impl Drop for SteadyTimer {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.armed = false;
            self.cv.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

struct DeadlineState {
    deadline: Option<SystemTime>,
    armed: bool,
    shutdown: bool,
    generation: u64,
}

/// A wall-clock timer: fires once at an absolute [`SystemTime`].
pub struct DeadlineTimer {
    name: String,
    executor: Arc<Executor>,
    callback: DeadlineFireCallback,
    state: Mutex<DeadlineState>,
    cv: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeadlineTimer {
    /// Creates a stopped timer with no deadline set.
    pub fn new(
        name: impl Into<String>,
        executor: Arc<Executor>,
        callback: impl Fn(SystemTime) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let timer = Arc::new(DeadlineTimer {
            name: name.into(),
            executor,
            callback: Arc::new(callback),
            state: Mutex::new(DeadlineState {
                deadline: None,
                armed: false,
                shutdown: false,
                generation: 0,
            }),
            cv: Condvar::new(),
            thread: Mutex::new(None),
        });
        let worker = timer.clone();
        let handle = std::thread::Builder::new()
            .name(format!("deadline-{}", timer.name))
            .spawn(move || worker.run())
            .expect("failed to spawn timer thread");
        *timer.thread.lock() = Some(handle);
        timer
    }

    /// Arms the timer to fire once at `deadline`. A deadline already in the
    /// past fires on the next scheduler pass almost immediately.
    pub fn start_at(&self, deadline: SystemTime) {
        let mut state = self.state.lock();
        state.deadline = Some(deadline);
        state.armed = true;
        state.generation += 1;
        self.cv.notify_all();
    }

    /// Cancels any pending fire. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.armed = false;
        state.generation += 1;
        self.cv.notify_all();
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            if !state.armed {
                self.cv.wait(&mut state);
                continue;
            }
            let Some(deadline) = state.deadline else {
                self.cv.wait(&mut state);
                continue;
            };
            let now = SystemTime::now();
            match deadline.duration_since(now) {
                Ok(remaining) => {
                    self.cv.wait_for(&mut state, remaining);
                    continue;
                }
                Err(_) => {
                    // Deadline already passed; fire immediately.
                }
            }

            let generation = state.generation;
            drop(state);

            let cb = self.callback.clone();
            let _ = self
                .executor
                .post_fn(self.name.clone(), move || cb(deadline), PostWait::DontWait);

            state = self.state.lock();
            if state.generation == generation {
                // One-shot: re-arming after firing is a no-op until a new
                // deadline is set via `start_at`.
                state.armed = false;
            }
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
            state.armed = false;
            self.cv.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnose::DiagnosticsRegistry;
    use crate::executor::{FiberExecutor, FiberExecutorConfig};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn fiber_executor() -> Arc<Executor> {
        Arc::new(Executor::Fiber(FiberExecutor::new(
            FiberExecutorConfig {
                name: "timer-test".to_string(),
                ..Default::default()
            },
            Arc::new(DiagnosticsRegistry::new()),
        )))
    }

    #[test]
    fn one_shot_fires_once() {
        let exec = fiber_executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = SteadyTimer::once("once", Duration::from_millis(20), exec.clone(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        drop(timer);
    }

    #[test]
    fn repeating_fires_multiple_times() {
        let exec = fiber_executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = SteadyTimer::looping("loop", Duration::from_millis(20), exec.clone(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(110));
        timer.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn stop_before_fire_suppresses_callback() {
        let exec = fiber_executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = SteadyTimer::once("stopped", Duration::from_millis(50), exec.clone(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.stop();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deadline_timer_fires_at_absolute_time() {
        let exec = fiber_executor();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let timer = DeadlineTimer::new("deadline", exec.clone(), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        timer.start_at(SystemTime::now() + Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
