//! Visual timeout coordination.
//!
//! A [`VisualTimeoutManager`] keeps at most one visual timeout alive and only
//! lets it count down while the dialog is idle and no GUI source reports
//! activity.
//!
//! # Data Flow
//! ```text
//! request_timeout / stop_timeout ─┐
//! dialog UX state changes ────────┼─► executor (one FIFO worker) ─► state machine ─► Timer
//! GUI activity events ────────────┤                                     ▲
//! timer expiry ───────────────────┘ (re-queued, re-validated) ──────────┘
//! ```

pub mod manager;
pub mod types;

pub use manager::{TimeoutCallback, VisualTimeoutManager};
pub use types::{ActivityEvent, DialogUxState, TimeoutId, TimeoutSnapshot, TimeoutState};

use crate::error::Result;
use std::time::Duration;

/// Requesting and cancelling visual timeouts.
///
/// Presentation code depends on this rather than on the concrete manager.
pub trait VisualTimeoutService: Send + Sync {
    /// Replace the current timeout with a new one and return its id.
    fn request_timeout(&self, delay: Duration, callback: TimeoutCallback) -> Result<TimeoutId>;

    /// Cancel `id` if it is still the current, live timeout.
    fn stop_timeout(&self, id: TimeoutId) -> bool;
}

/// Receives dialog UX state transitions.
pub trait DialogStateObserver: Send + Sync {
    fn on_dialog_ux_state_changed(&self, state: DialogUxState);
}

/// Receives GUI activity events.
pub trait ActivityEventObserver: Send + Sync {
    fn on_activity_event(&self, source: &str, event: ActivityEvent);
}
