//! Host command channel and router for native shell integrations.

use crate::error::{Result, TimeoutError};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_TIMEOUT_FIRED, EVENT_VERSION, EventEnvelope,
    ResponseEnvelope,
};
use crate::presentation::{LifespanTimeouts, PresentationLifespan};
use crate::timeout::{ActivityEvent, DialogUxState, TimeoutId, VisualTimeoutManager};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            TimeoutError::Protocol(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| {
                TimeoutError::Channel(format!("failed to send host command request: {e}"))
            })?;

        response_rx
            .await
            .map_err(|e| TimeoutError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Routes host commands onto a [`VisualTimeoutManager`].
pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
    manager: Arc<VisualTimeoutManager>,
    timeouts: LifespanTimeouts,
}

#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    manager: Arc<VisualTimeoutManager>,
    timeouts: LifespanTimeouts,
) -> (HostCommandClient, HostCommandServer) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    (
        HostCommandClient {
            request_tx,
            event_tx: event_tx.clone(),
        },
        HostCommandServer {
            request_rx,
            event_tx,
            manager,
            timeouts,
        },
    )
}

impl HostCommandServer {
    /// Serve requests until every client is dropped.
    ///
    /// Routing errors are answered with an error envelope carrying the
    /// request id; they never end the loop.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let response = match self.route(&request.envelope) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request.envelope.request_id,
                        command = request.envelope.command.as_str(),
                        error = %e,
                        "host command rejected"
                    );
                    ResponseEnvelope::error(request.envelope.request_id.clone(), e.to_string())
                }
            };
            let _ = request.response_tx.send(Ok(response));
        }
    }

    /// Route a command envelope to the appropriate handler.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"pong": true}),
            )),
            CommandName::HostVersion => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({
                    "contract_version": EVENT_VERSION,
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )),
            CommandName::TimeoutRequest => self.handle_timeout_request(envelope),
            CommandName::TimeoutRequestLifespan => self.handle_timeout_request_lifespan(envelope),
            CommandName::TimeoutStop => self.handle_timeout_stop(envelope),
            CommandName::TimeoutStatus => self.handle_timeout_status(envelope),
            CommandName::DialogState => self.handle_dialog_state(envelope),
            CommandName::ActivityEvent => self.handle_activity_event(envelope),
            CommandName::RuntimeStop => self.handle_runtime_stop(envelope),
        }
    }

    fn handle_timeout_request(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let delay = parse_delay(&envelope.payload, "timeout.request")?
            .ok_or_else(|| {
                TimeoutError::Protocol("timeout.request requires payload.delay_ms".to_owned())
            })?;
        let id = self.request(delay)?;

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"timeout_id": id, "delay_ms": millis(delay)}),
        ))
    }

    fn handle_timeout_request_lifespan(
        &self,
        envelope: &CommandEnvelope,
    ) -> Result<ResponseEnvelope> {
        let lifespan = parse_lifespan(&envelope.payload)?;
        let delay = parse_delay(&envelope.payload, "timeout.request_lifespan")?
            .or_else(|| self.timeouts.timeout_for(lifespan));

        let Some(delay) = delay else {
            return Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                serde_json::json!({"timeout_id": null, "lifespan": lifespan}),
            ));
        };
        let id = self.request(delay)?;

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({
                "timeout_id": id,
                "lifespan": lifespan,
                "delay_ms": millis(delay),
            }),
        ))
    }

    fn handle_timeout_stop(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = parse_timeout_id(&envelope.payload)?;
        let stopped = self.manager.stop_timeout(id);

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"timeout_id": id, "stopped": stopped}),
        ))
    }

    fn handle_timeout_status(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let snapshot = self.manager.snapshot()?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::to_value(snapshot)?,
        ))
    }

    fn handle_dialog_state(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let state = parse_dialog_state(&envelope.payload)?;
        self.manager.on_dialog_ux_state_changed(state);

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "state": state}),
        ))
    }

    fn handle_activity_event(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let source = parse_non_empty_field(&envelope.payload, "source", "activity.event")?;
        let event = parse_non_empty_field(&envelope.payload, "event", "activity.event")?
            .parse::<ActivityEvent>()
            .unwrap_or(ActivityEvent::Unknown);
        self.manager.on_activity_event(&source, event);

        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true, "source": source, "event": event}),
        ))
    }

    fn handle_runtime_stop(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        self.manager.shutdown();
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            serde_json::json!({"accepted": true}),
        ))
    }

    /// Request a timeout whose expiry is announced as a `timeout.fired` event.
    fn request(&self, delay: Duration) -> Result<TimeoutId> {
        let event_tx = self.event_tx.clone();
        self.manager.request_timeout_with(delay, move |id| {
            emit_event(
                &event_tx,
                EVENT_TIMEOUT_FIRED,
                serde_json::json!({"timeout_id": id}),
            );
        })
    }
}

fn emit_event(event_tx: &broadcast::Sender<EventEnvelope>, event: &str, payload: serde_json::Value) {
    let envelope = EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
    // No subscribers is not an error.
    let _ = event_tx.send(envelope);
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn parse_delay(payload: &serde_json::Value, command: &str) -> Result<Option<Duration>> {
    match payload.get("delay_ms") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => raw.as_u64().map(Duration::from_millis).map(Some).ok_or_else(|| {
            TimeoutError::Protocol(format!(
                "{command} requires payload.delay_ms to be a non-negative integer"
            ))
        }),
    }
}

fn parse_lifespan(payload: &serde_json::Value) -> Result<PresentationLifespan> {
    let raw = parse_non_empty_field(payload, "lifespan", "timeout.request_lifespan")?;
    PresentationLifespan::parse(&raw).ok_or_else(|| {
        TimeoutError::Protocol(format!(
            "unsupported lifespan `{raw}` (expected transient/short/long/permanent)"
        ))
    })
}

fn parse_timeout_id(payload: &serde_json::Value) -> Result<TimeoutId> {
    payload
        .get("timeout_id")
        .and_then(serde_json::Value::as_u64)
        .map(TimeoutId)
        .ok_or_else(|| {
            TimeoutError::Protocol("timeout.stop requires integer payload.timeout_id".to_owned())
        })
}

fn parse_dialog_state(payload: &serde_json::Value) -> Result<DialogUxState> {
    let raw = parse_non_empty_field(payload, "state", "dialog.state")?;
    DialogUxState::parse(&raw).ok_or_else(|| {
        TimeoutError::Protocol(format!(
            "unsupported dialog state `{raw}` \
             (expected idle/listening/expecting/thinking/speaking/finished)"
        ))
    })
}

fn parse_non_empty_field(payload: &serde_json::Value, field: &str, command: &str) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(serde_json::Value::as_str) else {
        return Err(TimeoutError::Protocol(format!(
            "{command} requires payload.{field}"
        )));
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimeoutError::Protocol(format!(
            "{command} requires a non-empty {field}"
        )));
    }
    Ok(trimmed.to_owned())
}
