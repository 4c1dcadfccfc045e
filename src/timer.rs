//! One-shot countdown timers.
//!
//! The [`Timer`] trait is the only clock the timeout manager knows about.
//! Three implementations are provided:
//! - [`ThreadTimer`]: a countdown on a dedicated std thread (default).
//! - [`TokioTimer`]: a countdown task on a tokio runtime.
//! - [`ManualTimer`]: fires only when told to, for tests and simulations.
//!
//! A timer never decides whether a fire is still wanted; it reports the
//! expiry and the owner re-validates. Stopping only prevents future fires.

use crate::error::{Result, TimeoutError};
use crossbeam_channel::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Callback invoked by a timer when its countdown expires.
pub type FireCallback = Box<dyn FnOnce() + Send + 'static>;

/// A restartable one-shot countdown.
pub trait Timer: Send {
    /// Start counting down `delay`, calling `on_fire` on expiry.
    ///
    /// Starting an already-running timer cancels the previous countdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the countdown could not be scheduled; the timer is
    /// then inactive.
    fn start(&mut self, delay: Duration, on_fire: FireCallback) -> Result<()>;

    /// Cancel the countdown if one is running. Safe to call when idle.
    fn stop(&mut self);

    /// Whether a countdown is currently armed.
    fn is_active(&self) -> bool;
}

/// Claim the right to fire a countdown run. Exactly one of expiry or stop wins.
fn claim(flag: &AtomicBool) -> bool {
    flag.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

// ---------------------------------------------------------------------------
// ThreadTimer
// ---------------------------------------------------------------------------

struct ThreadRun {
    /// Dropping the sender wakes the countdown thread early.
    _cancel_tx: crossbeam_channel::Sender<()>,
    armed: Arc<AtomicBool>,
}

/// Countdown on a dedicated, named OS thread per run.
pub struct ThreadTimer {
    thread_name: String,
    run: Option<ThreadRun>,
}

impl ThreadTimer {
    /// Create an idle timer whose countdown threads carry `thread_name`.
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            run: None,
        }
    }
}

impl Timer for ThreadTimer {
    fn start(&mut self, delay: Duration, on_fire: FireCallback) -> Result<()> {
        self.stop();

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        let armed = Arc::new(AtomicBool::new(true));
        let run_armed = Arc::clone(&armed);

        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(delay) {
                    if claim(&run_armed) {
                        on_fire();
                    }
                }
            })
            .map_err(TimeoutError::Spawn)?;

        self.run = Some(ThreadRun {
            _cancel_tx: cancel_tx,
            armed,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.armed.store(false, Ordering::Release);
        }
    }

    fn is_active(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.armed.load(Ordering::Acquire))
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// TokioTimer
// ---------------------------------------------------------------------------

struct TokioRun {
    task: tokio::task::JoinHandle<()>,
    armed: Arc<AtomicBool>,
}

/// Countdown as a task on a tokio runtime.
///
/// Honours `tokio::time::pause` on the owning runtime, which makes it usable
/// for simulated-time runs as well as production.
pub struct TokioTimer {
    handle: tokio::runtime::Handle,
    run: Option<TokioRun>,
}

impl TokioTimer {
    /// Create an idle timer that schedules its countdowns on `handle`.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle, run: None }
    }

    /// Create an idle timer on the runtime the caller is running inside.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::Config`] when called outside a tokio runtime.
    pub fn from_current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| TimeoutError::Config(format!("tokio timer needs a runtime: {e}")))
    }
}

impl Timer for TokioTimer {
    fn start(&mut self, delay: Duration, on_fire: FireCallback) -> Result<()> {
        self.stop();

        let armed = Arc::new(AtomicBool::new(true));
        let run_armed = Arc::clone(&armed);
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if claim(&run_armed) {
                on_fire();
            }
        });

        self.run = Some(TokioRun { task, armed });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(run) = self.run.take() {
            run.armed.store(false, Ordering::Release);
            run.task.abort();
        }
    }

    fn is_active(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| run.armed.load(Ordering::Acquire))
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// ManualTimer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualState {
    armed: Option<(Duration, FireCallback)>,
    started: Vec<Duration>,
    cancelled: usize,
}

/// Timer that only fires when its [`ManualTimerHandle`] says so.
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

/// Test-side control for a [`ManualTimer`].
#[derive(Clone)]
pub struct ManualTimerHandle {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimer {
    /// Create a manual timer and the handle that drives it.
    pub fn new() -> (Self, ManualTimerHandle) {
        let state = Arc::new(Mutex::new(ManualState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            ManualTimerHandle { state },
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Timer for ManualTimer {
    fn start(&mut self, delay: Duration, on_fire: FireCallback) -> Result<()> {
        let mut state = self.lock();
        if state.armed.take().is_some() {
            state.cancelled += 1;
        }
        state.started.push(delay);
        state.armed = Some((delay, on_fire));
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        if state.armed.take().is_some() {
            state.cancelled += 1;
        }
    }

    fn is_active(&self) -> bool {
        self.lock().armed.is_some()
    }
}

impl ManualTimerHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Expire the armed countdown and run its callback.
    ///
    /// Returns `false` when nothing was armed.
    pub fn fire(&self) -> bool {
        match self.expire() {
            Some(on_fire) => {
                on_fire();
                true
            }
            None => false,
        }
    }

    /// Expire the armed countdown but hand its callback back uninvoked.
    ///
    /// Models a timer thread that has observed expiry and not yet delivered
    /// it, so tests can interleave other calls before the delivery.
    pub fn expire(&self) -> Option<FireCallback> {
        let armed = self.lock().armed.take();
        armed.map(|(delay, on_fire)| {
            debug!(delay_ms = delay.as_millis() as u64, "manual timer expired");
            on_fire
        })
    }

    /// Whether a countdown is armed.
    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }

    /// Delay of the armed countdown, if any.
    pub fn armed_delay(&self) -> Option<Duration> {
        self.lock().armed.as_ref().map(|(delay, _)| *delay)
    }

    /// Every delay the timer has been started with, oldest first.
    pub fn started_delays(&self) -> Vec<Duration> {
        self.lock().started.clone()
    }

    /// Number of times the timer has been started.
    pub fn start_count(&self) -> usize {
        self.lock().started.len()
    }

    /// Number of armed countdowns cancelled by `stop` or a restart.
    pub fn cancel_count(&self) -> usize {
        self.lock().cancelled
    }
}
