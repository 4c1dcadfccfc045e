//! Visual timeout coordination for voice-assistant displays.
//!
//! A visual timeout dismisses on-screen content after a delay, but only
//! counts down while the user is not engaged with the assistant:
//! - **Dialog**: any dialog UX state other than idle pauses the countdown
//! - **GUI activity**: any named source reporting activity pauses it too
//! - **Resume**: the countdown restarts from the full delay once both clear
//!
//! All state changes are serialized on a single worker thread
//! ([`executor::Executor`]); the countdown itself is pluggable through the
//! [`timer::Timer`] trait.

pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod presentation;
pub mod timeout;
pub mod timer;

pub use config::{LifespanTimeoutConfig, TimeoutConfig, TimerBackend};
pub use error::{Result, TimeoutError};
pub use presentation::{LifespanTimeouts, PresentationLifespan, PresentationTimeout};
pub use timeout::{
    ActivityEvent, ActivityEventObserver, DialogStateObserver, DialogUxState, TimeoutCallback,
    TimeoutId, TimeoutSnapshot, TimeoutState, VisualTimeoutManager, VisualTimeoutService,
};
pub use timer::{ManualTimer, ManualTimerHandle, ThreadTimer, Timer, TokioTimer};
