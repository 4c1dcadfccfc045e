//! The visual timeout state machine.
//!
//! Every mutation runs as a task on the manager's [`Executor`]. The
//! coordinator state sits behind a mutex only so tasks can reach it; it is
//! locked exclusively from the worker thread, so the lock is never contended
//! and the FIFO queue alone decides the order of transitions.
//!
//! # Transitions
//! - request: old request discarded, activity cleared, new request starts
//!   (`Active`) or waits (`Suspended`) depending on the dialog state.
//! - busy dialog / activated source: `Active` → `Suspended`, timer stopped.
//! - idle dialog with no active source: `Suspended` → `Active`, timer
//!   restarted with the full original delay.
//! - timer expiry: re-queued as a task; `Active` → `Finished` and the
//!   callback runs, unless the request changed in the meantime.

use super::types::{ActivityEvent, DialogUxState, TimeoutId, TimeoutSnapshot, TimeoutState};
use super::{ActivityEventObserver, DialogStateObserver, VisualTimeoutService};
use crate::config::{TimeoutConfig, TimerBackend};
use crate::error::{Result, TimeoutError};
use crate::executor::Executor;
use crate::timer::{FireCallback, ThreadTimer, Timer, TokioTimer};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Action run once when a visual timeout expires.
pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_EXECUTOR_THREAD: &str = "visual-timeout";
const DEFAULT_TIMER_THREAD: &str = "visual-timeout-timer";

struct TimeoutRequest {
    id: TimeoutId,
    delay: Duration,
    callback: Option<TimeoutCallback>,
    state: TimeoutState,
}

struct Coordinator {
    /// Route from timer expiry back onto the executor.
    shared: Weak<Shared>,
    timer: Box<dyn Timer>,
    current: Option<TimeoutRequest>,
    last_id: u64,
    /// Bumped on every timer start; an expiry from an older run is stale.
    run: u64,
    dialog_state: DialogUxState,
    active_sources: HashSet<String>,
    halted: bool,
}

struct Shared {
    executor: Executor,
    coordinator: Mutex<Coordinator>,
}

/// Coordinates the single visual timeout with dialog and GUI activity.
///
/// `request_timeout`, `stop_timeout` and `snapshot` block until the worker
/// has processed them; the observer intakes return immediately. Dropping
/// the manager shuts it down.
pub struct VisualTimeoutManager {
    shared: Arc<Shared>,
}

impl VisualTimeoutManager {
    /// Create a manager backed by a [`ThreadTimer`].
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn new() -> Result<Self> {
        Self::with_timer(
            DEFAULT_EXECUTOR_THREAD,
            Box::new(ThreadTimer::new(DEFAULT_TIMER_THREAD)),
        )
    }

    /// Create a manager from configuration.
    ///
    /// The tokio backend must be built from inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker cannot be spawned or the tokio backend
    /// is selected outside a runtime.
    pub fn from_config(config: &TimeoutConfig) -> Result<Self> {
        let timer: Box<dyn Timer> = match config.timer.backend {
            TimerBackend::Thread => Box::new(ThreadTimer::new(config.timer.thread_name.clone())),
            TimerBackend::Tokio => Box::new(TokioTimer::from_current()?),
        };
        Self::with_timer(config.executor.thread_name.clone(), timer)
    }

    /// Create a manager around an explicit timer.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn with_timer(thread_name: impl Into<String>, timer: Box<dyn Timer>) -> Result<Self> {
        let executor = Executor::new(thread_name)?;
        let shared = Arc::new_cyclic(|weak| Shared {
            executor,
            coordinator: Mutex::new(Coordinator::new(weak.clone(), timer)),
        });
        Ok(Self { shared })
    }

    /// Replace any current timeout with a new one.
    ///
    /// The previous request can no longer fire. Returns once the new request
    /// is installed, so the id is immediately usable with
    /// [`stop_timeout`](Self::stop_timeout).
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::ExecutorShutdown`] after [`shutdown`](Self::shutdown).
    pub fn request_timeout(&self, delay: Duration, callback: TimeoutCallback) -> Result<TimeoutId> {
        self.install(delay, move |_| callback)
    }

    /// Like [`request_timeout`](Self::request_timeout), but the callback is
    /// told which timeout fired.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::ExecutorShutdown`] after [`shutdown`](Self::shutdown).
    pub fn request_timeout_with<F>(&self, delay: Duration, callback: F) -> Result<TimeoutId>
    where
        F: FnOnce(TimeoutId) + Send + 'static,
    {
        self.install(delay, move |id| -> TimeoutCallback {
            Box::new(move || callback(id))
        })
    }

    fn install<M>(&self, delay: Duration, make_callback: M) -> Result<TimeoutId>
    where
        M: FnOnce(TimeoutId) -> TimeoutCallback + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared
            .executor
            .submit(move || shared.lock().request(delay, make_callback))?
            .wait()?
    }

    /// Cancel the timeout `id`.
    ///
    /// Returns `true` only when `id` is the current request and it has not yet
    /// fired or been stopped. `false` means the caller was too late and is
    /// not an error.
    pub fn stop_timeout(&self, id: TimeoutId) -> bool {
        let shared = Arc::clone(&self.shared);
        let stopped = self
            .shared
            .executor
            .submit(move || shared.lock().stop(id))
            .and_then(|handle| handle.wait());
        match stopped {
            Ok(stopped) => stopped,
            Err(e) => {
                debug!(timeout_id = %id, error = %e, "stop_timeout after shutdown");
                false
            }
        }
    }

    /// Report a dialog UX state transition.
    pub fn on_dialog_ux_state_changed(&self, state: DialogUxState) {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self
            .shared
            .executor
            .execute(move || shared.lock().dialog_changed(state))
        {
            debug!(state = %state, error = %e, "dialog state change dropped");
        }
    }

    /// Report a GUI activity event from `source`.
    ///
    /// An empty `source` is rejected here and never reaches the state machine.
    pub fn on_activity_event(&self, source: &str, event: ActivityEvent) {
        if source.is_empty() {
            error!(event = %event, "activity event rejected: empty source");
            return;
        }
        let source = source.to_owned();
        let shared = Arc::clone(&self.shared);
        if let Err(e) = self
            .shared
            .executor
            .execute(move || shared.lock().activity(source, event))
        {
            debug!(event = %event, error = %e, "activity event dropped");
        }
    }

    /// Current request, dialog state and activity, as seen by the worker.
    ///
    /// Because it is queued like any other call, the snapshot reflects every
    /// event submitted before it.
    ///
    /// # Errors
    ///
    /// Returns [`TimeoutError::ExecutorShutdown`] after shutdown.
    pub fn snapshot(&self) -> Result<TimeoutSnapshot> {
        let shared = Arc::clone(&self.shared);
        self.shared
            .executor
            .submit(move || shared.lock().snapshot())?
            .wait()
    }

    /// Stop the timer and halt the worker. Idempotent.
    ///
    /// No callback runs after this returns, except when called from inside
    /// a callback, where the current task completes first.
    pub fn shutdown(&self) {
        let shared = Arc::clone(&self.shared);
        if let Ok(handle) = self.shared.executor.submit(move || shared.lock().halt()) {
            if handle.wait().is_err() {
                warn!("visual timeout halt task did not complete");
            }
        }
        self.shared.executor.shutdown();
    }
}

impl Drop for VisualTimeoutManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl VisualTimeoutService for VisualTimeoutManager {
    fn request_timeout(&self, delay: Duration, callback: TimeoutCallback) -> Result<TimeoutId> {
        VisualTimeoutManager::request_timeout(self, delay, callback)
    }

    fn stop_timeout(&self, id: TimeoutId) -> bool {
        VisualTimeoutManager::stop_timeout(self, id)
    }
}

impl DialogStateObserver for VisualTimeoutManager {
    fn on_dialog_ux_state_changed(&self, state: DialogUxState) {
        VisualTimeoutManager::on_dialog_ux_state_changed(self, state);
    }
}

impl ActivityEventObserver for VisualTimeoutManager {
    fn on_activity_event(&self, source: &str, event: ActivityEvent) {
        VisualTimeoutManager::on_activity_event(self, source, event);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Coordinator> {
        self.coordinator.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn timer_fired(&self, id: TimeoutId, run: u64) {
        let callback = self.lock().take_expired(id, run);
        if let Some(callback) = callback {
            info!(timeout_id = %id, "visual timeout fired");
            callback();
        }
    }
}

/// Build the timer callback for run `run` of request `id`.
///
/// Expiry is never acted on from the timer's thread; it is queued and
/// checked against the state at the time the task runs.
fn fire_callback(shared: &Weak<Shared>, id: TimeoutId, run: u64) -> FireCallback {
    let shared = shared.clone();
    Box::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let task_shared = Arc::clone(&shared);
        if shared
            .executor
            .execute(move || task_shared.timer_fired(id, run))
            .is_err()
        {
            debug!(timeout_id = %id, "timer expired after shutdown; ignored");
        }
    })
}

impl Coordinator {
    fn new(shared: Weak<Shared>, timer: Box<dyn Timer>) -> Self {
        Self {
            shared,
            timer,
            current: None,
            last_id: 0,
            run: 0,
            dialog_state: DialogUxState::Idle,
            active_sources: HashSet::new(),
            halted: false,
        }
    }

    fn blocked(&self) -> bool {
        !self.dialog_state.is_idle() || !self.active_sources.is_empty()
    }

    fn request<M>(&mut self, delay: Duration, make_callback: M) -> Result<TimeoutId>
    where
        M: FnOnce(TimeoutId) -> TimeoutCallback,
    {
        if self.halted {
            return Err(TimeoutError::ExecutorShutdown);
        }

        self.timer.stop();
        if let Some(previous) = self.current.take() {
            if !previous.state.is_terminal() {
                debug!(
                    timeout_id = %previous.id,
                    state = %previous.state,
                    "visual timeout superseded"
                );
            }
        }
        self.active_sources.clear();

        self.last_id += 1;
        let id = TimeoutId(self.last_id);
        self.current = Some(TimeoutRequest {
            id,
            delay,
            callback: Some(make_callback(id)),
            state: TimeoutState::Init,
        });
        debug!(timeout_id = %id, delay_ms = millis(delay), "visual timeout requested");

        self.resume();
        Ok(id)
    }

    fn stop(&mut self, id: TimeoutId) -> bool {
        let Some(request) = self.current.as_mut() else {
            debug!(timeout_id = %id, "stop ignored: no visual timeout");
            return false;
        };
        if request.id != id || request.state.is_terminal() {
            debug!(
                timeout_id = %id,
                current_id = %request.id,
                state = %request.state,
                "stop ignored: stale visual timeout"
            );
            return false;
        }

        self.timer.stop();
        request.state = TimeoutState::Stopped;
        request.callback = None;
        debug!(timeout_id = %id, "visual timeout stopped");
        true
    }

    /// Start the countdown for a waiting request unless something blocks it.
    fn resume(&mut self) {
        let blocked = self.blocked();
        let Some(request) = self.current.as_mut() else {
            return;
        };
        if !matches!(request.state, TimeoutState::Init | TimeoutState::Suspended) {
            return;
        }
        if blocked {
            if request.state == TimeoutState::Init {
                request.state = TimeoutState::Suspended;
                debug!(timeout_id = %request.id, "visual timeout waiting for idle");
            }
            return;
        }

        self.run += 1;
        let on_fire = fire_callback(&self.shared, request.id, self.run);
        match self.timer.start(request.delay, on_fire) {
            Ok(()) => {
                request.state = TimeoutState::Active;
                debug!(
                    timeout_id = %request.id,
                    delay_ms = millis(request.delay),
                    "visual timeout counting down"
                );
            }
            Err(e) => {
                request.state = TimeoutState::Suspended;
                error!(timeout_id = %request.id, error = %e, "failed to start visual timeout timer");
            }
        }
    }

    /// Pause a running countdown. Progress is discarded.
    fn suspend(&mut self) {
        let Some(request) = self.current.as_mut() else {
            return;
        };
        if request.state != TimeoutState::Active {
            return;
        }
        self.timer.stop();
        request.state = TimeoutState::Suspended;
        debug!(timeout_id = %request.id, "visual timeout suspended");
    }

    fn dialog_changed(&mut self, state: DialogUxState) {
        if self.halted {
            return;
        }
        let previous = std::mem::replace(&mut self.dialog_state, state);
        debug!(from = %previous, to = %state, "dialog UX state changed");
        if state.is_idle() {
            self.resume();
        } else {
            self.suspend();
        }
    }

    fn activity(&mut self, source: String, event: ActivityEvent) {
        if self.halted {
            return;
        }
        debug!(source = %source, event = %event, "GUI activity event");
        match event {
            ActivityEvent::Activated => {
                self.active_sources.insert(source);
                self.suspend();
            }
            ActivityEvent::Deactivated => {
                self.active_sources.remove(&source);
                self.resume();
            }
            // The interrupting source keeps whatever slot it had.
            ActivityEvent::Interrupt => self.resume(),
            ActivityEvent::Unknown => {
                warn!(source = %source, "unknown GUI activity event ignored");
            }
        }
    }

    /// Claim the callback for an expiry, if the expiry is still current.
    fn take_expired(&mut self, id: TimeoutId, run: u64) -> Option<TimeoutCallback> {
        let current_run = self.run;
        let request = self.current.as_mut()?;
        if request.id != id || run != current_run || request.state != TimeoutState::Active {
            debug!(
                timeout_id = %id,
                current_id = %request.id,
                state = %request.state,
                "stale timer expiry dropped"
            );
            return None;
        }
        request.state = TimeoutState::Finished;
        request.callback.take()
    }

    fn halt(&mut self) {
        self.timer.stop();
        if let Some(request) = self.current.as_mut() {
            if !request.state.is_terminal() {
                request.state = TimeoutState::Stopped;
                request.callback = None;
            }
        }
        self.halted = true;
        debug!("visual timeout manager halted");
    }

    fn snapshot(&self) -> TimeoutSnapshot {
        let mut active_sources: Vec<String> = self.active_sources.iter().cloned().collect();
        active_sources.sort();
        TimeoutSnapshot {
            timeout_id: self.current.as_ref().map(|r| r.id),
            state: self.current.as_ref().map(|r| r.state),
            delay_ms: self.current.as_ref().map(|r| millis(r.delay)),
            dialog_state: self.dialog_state,
            active_sources,
            timer_active: self.timer.is_active(),
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::timer::{ManualTimer, ManualTimerHandle};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FIVE_MS: Duration = Duration::from_millis(5);

    fn manual_manager() -> (VisualTimeoutManager, ManualTimerHandle) {
        let (timer, handle) = ManualTimer::new();
        let manager = VisualTimeoutManager::with_timer("vtm-test", Box::new(timer)).unwrap();
        (manager, handle)
    }

    fn counting_callback() -> (Arc<AtomicUsize>, TimeoutCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let fired = Arc::clone(&count);
        (
            count,
            Box::new(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    fn state_of(manager: &VisualTimeoutManager) -> Option<TimeoutState> {
        manager.snapshot().unwrap().state
    }

    #[test]
    fn idle_request_counts_down_and_fires_once() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();

        let id = manager.request_timeout(FIVE_MS, callback).unwrap();
        assert_eq!(timer.armed_delay(), Some(FIVE_MS));
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));

        assert!(timer.fire());
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.timeout_id, Some(id));
        assert_eq!(snapshot.state, Some(TimeoutState::Finished));
        assert!(!snapshot.timer_active);
    }

    #[test]
    fn busy_dialog_suspends_and_idle_restarts_full_delay() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        assert_eq!(state_of(&manager), Some(TimeoutState::Suspended));
        assert!(!timer.is_armed());
        assert!(!timer.fire());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert_eq!(timer.started_delays(), vec![FIVE_MS, FIVE_MS]);

        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_busy_dialog_state_suspends() {
        for busy in [
            DialogUxState::Listening,
            DialogUxState::Expecting,
            DialogUxState::Thinking,
            DialogUxState::Speaking,
            DialogUxState::Finished,
        ] {
            let (manager, timer) = manual_manager();
            let (_, callback) = counting_callback();
            manager.request_timeout(FIVE_MS, callback).unwrap();

            manager.on_dialog_ux_state_changed(busy);
            assert_eq!(state_of(&manager), Some(TimeoutState::Suspended), "{busy}");
            assert!(!timer.is_armed());
        }
    }

    #[test]
    fn request_during_busy_dialog_waits_for_idle() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();

        manager.on_dialog_ux_state_changed(DialogUxState::Thinking);
        manager.request_timeout(FIVE_MS, callback).unwrap();
        assert_eq!(state_of(&manager), Some(TimeoutState::Suspended));
        assert_eq!(timer.start_count(), 0);

        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        assert_eq!(timer.start_count(), 0);

        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn newer_request_supersedes_older() {
        let (manager, timer) = manual_manager();
        let (first, first_cb) = counting_callback();
        let (second, second_cb) = counting_callback();

        manager
            .request_timeout(Duration::from_millis(2), first_cb)
            .unwrap();
        manager
            .request_timeout(Duration::from_millis(1), second_cb)
            .unwrap();
        assert_eq!(timer.armed_delay(), Some(Duration::from_millis(1)));

        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiry_delivered_after_supersede_is_dropped() {
        let (manager, timer) = manual_manager();
        let (first, first_cb) = counting_callback();
        let (second, second_cb) = counting_callback();

        manager.request_timeout(FIVE_MS, first_cb).unwrap();
        let late_fire = timer.expire().unwrap();
        manager.request_timeout(FIVE_MS, second_cb).unwrap();

        late_fire();
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn activity_suspends_and_deactivation_restarts_full_delay() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("src1", ActivityEvent::Activated);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Suspended));
        assert_eq!(snapshot.active_sources, vec!["src1".to_owned()]);
        assert!(!timer.is_armed());

        manager.on_activity_event("src1", ActivityEvent::Deactivated);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Active));
        assert!(snapshot.active_sources.is_empty());
        assert_eq!(timer.armed_delay(), Some(FIVE_MS));

        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deactivation_while_dialog_busy_stays_suspended() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("touch", ActivityEvent::Activated);
        manager.on_dialog_ux_state_changed(DialogUxState::Listening);
        manager.on_activity_event("touch", ActivityEvent::Deactivated);
        assert_eq!(state_of(&manager), Some(TimeoutState::Suspended));
        assert!(!timer.is_armed());

        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
    }

    #[test]
    fn all_sources_must_deactivate_before_restart() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("touch", ActivityEvent::Activated);
        manager.on_activity_event("video", ActivityEvent::Activated);
        manager.on_activity_event("touch", ActivityEvent::Deactivated);
        assert_eq!(state_of(&manager), Some(TimeoutState::Suspended));

        manager.on_activity_event("video", ActivityEvent::Deactivated);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert_eq!(timer.start_count(), 2);
    }

    #[test]
    fn repeated_events_do_not_restart_timer() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        manager.on_activity_event("src1", ActivityEvent::Deactivated);
        manager.snapshot().unwrap();
        assert_eq!(timer.start_count(), 1);
        assert_eq!(timer.cancel_count(), 0);

        manager.on_activity_event("src1", ActivityEvent::Activated);
        manager.on_activity_event("src1", ActivityEvent::Activated);
        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        manager.snapshot().unwrap();
        assert_eq!(timer.cancel_count(), 1);

        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        manager.on_activity_event("src1", ActivityEvent::Deactivated);
        manager.on_activity_event("src1", ActivityEvent::Deactivated);
        manager.snapshot().unwrap();
        assert_eq!(timer.start_count(), 2);
    }

    #[test]
    fn interrupt_keeps_active_sources() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("touch", ActivityEvent::Activated);
        manager.on_activity_event("touch", ActivityEvent::Interrupt);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Suspended));
        assert_eq!(snapshot.active_sources, vec!["touch".to_owned()]);
        assert_eq!(timer.start_count(), 1);

        manager.on_activity_event("touch", ActivityEvent::Deactivated);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
    }

    #[test]
    fn interrupt_on_running_timeout_changes_nothing() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("voice", ActivityEvent::Interrupt);
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert_eq!(timer.start_count(), 1);
        assert_eq!(timer.cancel_count(), 0);
    }

    #[test]
    fn unknown_event_is_ignored() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("touch", ActivityEvent::Unknown);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Active));
        assert!(snapshot.active_sources.is_empty());
        assert_eq!(timer.cancel_count(), 0);
    }

    #[test]
    fn empty_source_is_rejected() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("", ActivityEvent::Activated);
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Active));
        assert!(snapshot.active_sources.is_empty());
        assert!(timer.is_armed());
    }

    #[test]
    fn new_request_clears_active_sources() {
        let (manager, timer) = manual_manager();
        let (_, first) = counting_callback();
        let (_, second) = counting_callback();
        manager.request_timeout(FIVE_MS, first).unwrap();
        manager.on_activity_event("touch", ActivityEvent::Activated);
        assert_eq!(state_of(&manager), Some(TimeoutState::Suspended));

        manager.request_timeout(FIVE_MS, second).unwrap();
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(snapshot.state, Some(TimeoutState::Active));
        assert!(snapshot.active_sources.is_empty());
        assert!(timer.is_armed());
    }

    #[test]
    fn stop_accepts_only_the_current_live_id() {
        let (manager, timer) = manual_manager();
        let (first, first_cb) = counting_callback();
        let (second, second_cb) = counting_callback();

        let old = manager.request_timeout(FIVE_MS, first_cb).unwrap();
        let current = manager.request_timeout(FIVE_MS, second_cb).unwrap();

        assert!(!manager.stop_timeout(old));
        assert_eq!(state_of(&manager), Some(TimeoutState::Active));

        assert!(manager.stop_timeout(current));
        assert!(!manager.stop_timeout(current));
        assert_eq!(state_of(&manager), Some(TimeoutState::Stopped));
        assert!(!timer.is_armed());
        assert!(!timer.fire());

        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        assert_eq!(state_of(&manager), Some(TimeoutState::Stopped));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_suspended_timeout_prevents_restart() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        let id = manager.request_timeout(FIVE_MS, callback).unwrap();

        manager.on_activity_event("touch", ActivityEvent::Activated);
        assert!(manager.stop_timeout(id));
        manager.on_activity_event("touch", ActivityEvent::Deactivated);

        assert_eq!(state_of(&manager), Some(TimeoutState::Stopped));
        assert_eq!(timer.start_count(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_after_fire_returns_false() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        let id = manager.request_timeout(FIVE_MS, callback).unwrap();

        assert!(timer.fire());
        assert!(!manager.stop_timeout(id));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_with_no_request_returns_false() {
        let (manager, _timer) = manual_manager();
        assert!(!manager.stop_timeout(TimeoutId(1)));
    }

    #[test]
    fn expiry_racing_stop_does_not_fire() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        let id = manager.request_timeout(FIVE_MS, callback).unwrap();

        let late_fire = timer.expire().unwrap();
        assert!(manager.stop_timeout(id));
        late_fire();

        assert_eq!(state_of(&manager), Some(TimeoutState::Stopped));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn expiry_from_previous_run_is_dropped_after_restart() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        let late_fire = timer.expire().unwrap();
        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        late_fire();

        assert_eq!(state_of(&manager), Some(TimeoutState::Active));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiry_queued_before_suspend_still_fires() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();

        assert!(timer.fire());
        manager.on_dialog_ux_state_changed(DialogUxState::Speaking);
        let snapshot = manager.snapshot().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(snapshot.state, Some(TimeoutState::Finished));
    }

    #[test]
    fn ids_increase_and_are_never_reused() {
        let (manager, _timer) = manual_manager();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let (_, callback) = counting_callback();
            ids.push(manager.request_timeout(FIVE_MS, callback).unwrap());
        }
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn callback_may_request_next_timeout() {
        let (timer, handle) = ManualTimer::new();
        let manager =
            Arc::new(VisualTimeoutManager::with_timer("vtm-reentrant", Box::new(timer)).unwrap());
        let next_id = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&manager);
        let slot = Arc::clone(&next_id);
        manager
            .request_timeout(
                FIVE_MS,
                Box::new(move || {
                    if let Some(manager) = weak.upgrade() {
                        let id = manager
                            .request_timeout(Duration::from_millis(7), Box::new(|| {}))
                            .unwrap();
                        *slot.lock().unwrap() = Some(id);
                    }
                }),
            )
            .unwrap();

        assert!(handle.fire());
        let snapshot = manager.snapshot().unwrap();
        assert_eq!(*next_id.lock().unwrap(), snapshot.timeout_id);
        assert_eq!(snapshot.timeout_id, Some(TimeoutId(2)));
        assert_eq!(snapshot.state, Some(TimeoutState::Active));
        assert_eq!(handle.armed_delay(), Some(Duration::from_millis(7)));
    }

    #[test]
    fn callback_can_be_told_its_id() {
        let (manager, timer) = manual_manager();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);

        let id = manager
            .request_timeout_with(FIVE_MS, move |id| *slot.lock().unwrap() = Some(id))
            .unwrap();
        assert!(timer.fire());
        manager.snapshot().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(id));
    }

    #[test]
    fn shutdown_stops_timer_and_rejects_work() {
        let (manager, timer) = manual_manager();
        let (count, callback) = counting_callback();
        let id = manager.request_timeout(FIVE_MS, callback).unwrap();
        let late_fire = timer.expire().unwrap();

        manager.shutdown();
        manager.shutdown();
        late_fire();

        assert!(!timer.is_armed());
        assert!(!manager.stop_timeout(id));
        assert!(matches!(
            manager.request_timeout(FIVE_MS, Box::new(|| {})),
            Err(TimeoutError::ExecutorShutdown)
        ));
        assert!(manager.snapshot().is_err());
        manager.on_dialog_ux_state_changed(DialogUxState::Idle);
        manager.on_activity_event("touch", ActivityEvent::Activated);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_stops_running_timer() {
        let (manager, timer) = manual_manager();
        let (_, callback) = counting_callback();
        manager.request_timeout(FIVE_MS, callback).unwrap();
        assert!(timer.is_armed());

        drop(manager);
        assert!(!timer.is_armed());
    }

    #[test]
    fn manager_works_through_service_trait() {
        let (manager, timer) = manual_manager();
        let service: &dyn VisualTimeoutService = &manager;
        let (count, callback) = counting_callback();

        let id = service.request_timeout(FIVE_MS, callback).unwrap();
        assert!(timer.is_armed());
        assert!(service.stop_timeout(id));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
