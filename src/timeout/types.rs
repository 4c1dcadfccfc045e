//! Value types shared by the timeout manager and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Identifier handed out by `request_timeout`. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutId(pub u64);

impl fmt::Display for TimeoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a timeout request.
///
/// ```text
/// Init ──► Active ──fire──► Finished
///   │        ▲  │
///   │  resume│  │suspend
///   ▼        │  ▼
///   └──► Suspended
///
/// Init | Active | Suspended ──stop──► Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutState {
    /// Created, not yet started or suspended.
    Init,
    /// The timer is counting down.
    Active,
    /// Waiting for the dialog to go idle and all activity to clear.
    Suspended,
    /// Cancelled by `stop_timeout`.
    Stopped,
    /// The callback has run.
    Finished,
}

impl TimeoutState {
    /// `true` for `Stopped` and `Finished`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for TimeoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialog UX state reported by the assistant's dialog layer.
///
/// Only `Idle` lets a visual timeout run; every other value counts as busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogUxState {
    #[default]
    Idle,
    Listening,
    Expecting,
    Thinking,
    Speaking,
    Finished,
}

impl DialogUxState {
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Expecting => "expecting",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Finished => "finished",
        }
    }

    /// Parse a state name, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "expecting" => Some(Self::Expecting),
            "thinking" => Some(Self::Thinking),
            "speaking" => Some(Self::Speaking),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for DialogUxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// GUI activity signal from a named source (touch, scroll, media, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEvent {
    /// The source started being active; blocks the countdown.
    Activated,
    /// The source stopped being active.
    Deactivated,
    /// One-off interaction; re-checks whether the countdown may resume
    /// without changing which sources are active.
    Interrupt,
    /// Unrecognised event; ignored.
    #[serde(other)]
    Unknown,
}

impl ActivityEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::Deactivated => "deactivated",
            Self::Interrupt => "interrupt",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ActivityEvent {
    type Err = std::convert::Infallible;

    /// Unrecognised names map to [`ActivityEvent::Unknown`].
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "activated" => Self::Activated,
            "deactivated" => Self::Deactivated,
            "interrupt" => Self::Interrupt,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the manager, for diagnostics and the host bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSnapshot {
    /// Id of the current request, if one was ever made.
    pub timeout_id: Option<TimeoutId>,
    /// State of the current request.
    pub state: Option<TimeoutState>,
    /// Requested delay of the current request in milliseconds.
    pub delay_ms: Option<u64>,
    /// Last dialog UX state received.
    pub dialog_state: DialogUxState,
    /// Sources currently asserting activity, sorted.
    pub active_sources: Vec<String>,
    /// Whether the timer is counting down.
    pub timer_active: bool,
}

impl TimeoutSnapshot {
    /// Requested delay of the current request.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}
