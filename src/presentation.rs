//! Presentation-level use of the visual timeout.
//!
//! A presentation (a card, a rendered document) is shown with a lifespan.
//! [`LifespanTimeouts`] maps that lifespan to a default timeout and
//! [`PresentationTimeout`] keeps track of the one timeout a presentation owns.

use crate::config::LifespanTimeoutConfig;
use crate::error::Result;
use crate::timeout::{TimeoutCallback, TimeoutId, VisualTimeoutService};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// How long a presentation is meant to stay on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationLifespan {
    Transient,
    Short,
    Long,
    /// Stays until explicitly dismissed.
    Permanent,
}

impl PresentationLifespan {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Short => "short",
            Self::Long => "long",
            Self::Permanent => "permanent",
        }
    }

    /// Parse a lifespan name, case-insensitively.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "transient" => Some(Self::Transient),
            "short" => Some(Self::Short),
            "long" => Some(Self::Long),
            "permanent" => Some(Self::Permanent),
            _ => None,
        }
    }
}

impl fmt::Display for PresentationLifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifespan to default-timeout mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifespanTimeouts {
    transient: Duration,
    short: Duration,
    long: Duration,
}

impl Default for LifespanTimeouts {
    fn default() -> Self {
        Self::from_config(&LifespanTimeoutConfig::default())
    }
}

impl LifespanTimeouts {
    pub fn from_config(config: &LifespanTimeoutConfig) -> Self {
        Self {
            transient: config.transient(),
            short: config.short(),
            long: config.long(),
        }
    }

    /// Default timeout for `lifespan`; `None` for permanent presentations.
    #[must_use]
    pub fn timeout_for(&self, lifespan: PresentationLifespan) -> Option<Duration> {
        match lifespan {
            PresentationLifespan::Transient => Some(self.transient),
            PresentationLifespan::Short => Some(self.short),
            PresentationLifespan::Long => Some(self.long),
            PresentationLifespan::Permanent => None,
        }
    }
}

/// The visual timeout owned by a single presentation.
pub struct PresentationTimeout {
    service: Arc<dyn VisualTimeoutService>,
    timeouts: LifespanTimeouts,
    id: Mutex<Option<TimeoutId>>,
}

impl PresentationTimeout {
    pub fn new(service: Arc<dyn VisualTimeoutService>, timeouts: LifespanTimeouts) -> Self {
        Self {
            service,
            timeouts,
            id: Mutex::new(None),
        }
    }

    /// Request the timeout for a presentation being shown.
    ///
    /// `timeout` overrides the lifespan default. A permanent presentation
    /// without an override requests nothing and returns `Ok(None)`.
    /// Any timeout this presentation held before is forgotten; the manager
    /// already discards it when the new request lands.
    ///
    /// # Errors
    ///
    /// Returns an error if the manager has shut down.
    pub fn start(
        &self,
        lifespan: PresentationLifespan,
        timeout: Option<Duration>,
        callback: TimeoutCallback,
    ) -> Result<Option<TimeoutId>> {
        let Some(delay) = timeout.or_else(|| self.timeouts.timeout_for(lifespan)) else {
            debug!(lifespan = %lifespan, "presentation has no visual timeout");
            *self.lock() = None;
            return Ok(None);
        };

        let id = self.service.request_timeout(delay, callback)?;
        debug!(
            lifespan = %lifespan,
            timeout_id = %id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "presentation visual timeout requested"
        );
        *self.lock() = Some(id);
        Ok(Some(id))
    }

    /// Stop this presentation's timeout, e.g. when it is dismissed.
    ///
    /// Returns `true` if the timeout was still live.
    pub fn stop(&self) -> bool {
        let Some(id) = self.lock().take() else {
            return false;
        };
        self.service.stop_timeout(id)
    }

    /// Id of the timeout this presentation last requested.
    pub fn timeout_id(&self) -> Option<TimeoutId> {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TimeoutId>> {
        self.id.lock().unwrap_or_else(|e| e.into_inner())
    }
}
