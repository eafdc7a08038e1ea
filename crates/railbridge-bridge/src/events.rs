//! Structured audit events for bridge lifecycle transitions.
//!
//! Every transition emits a [`BridgeEvent`] through an [`EventSink`]. The
//! default sink logs the serialized envelope via `tracing`; the envelope
//! shape is forward-compatible, so consumers must tolerate unknown fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

use railbridge_types::timestamp::UnixTimestamp;

use crate::job::BridgeJob;

/// Current version of the event envelope.
pub const EVENT_VERSION: u16 = 1;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeEventType {
    BridgeStart,
    BridgeAttempt,
    BridgeSuccess,
    BridgeFailure,
}

impl Display for BridgeEventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// The per-event payload: job context plus attempt accounting and, on
/// failure, error details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEventPayload {
    pub job_id: String,
    pub source_tx: String,
    pub source_network: String,
    pub destination_network: String,
    pub amount: String,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recoverability: Option<String>,
}

/// At-least-once event envelope.
///
/// Consumers must treat unknown fields as forward-compatible; deserialization
/// here ignores them for the same reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub event_id: String,
    pub event_type: BridgeEventType,
    pub event_version: u16,
    pub occurred_at: UnixTimestamp,
    pub idempotency_key: String,
    pub payload: BridgeEventPayload,
}

impl BridgeEvent {
    /// Builds an event for `job` at `attempt` of `max_attempts`.
    pub fn for_job(
        event_type: BridgeEventType,
        job: &BridgeJob,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            event_id: fresh_event_id(),
            event_type,
            event_version: EVENT_VERSION,
            occurred_at: UnixTimestamp::now(),
            idempotency_key: job.idempotency_key.clone(),
            payload: BridgeEventPayload {
                job_id: job.id.clone(),
                source_tx: job.source_tx_hash.clone(),
                source_network: job.source_network.to_string(),
                destination_network: job.destination_network.to_string(),
                amount: job.amount.clone(),
                attempt,
                max_attempts,
                error: None,
                error_code: None,
                recoverability: None,
            },
        }
    }

    /// Attaches failure details to the event.
    pub fn with_error(
        mut self,
        error: String,
        error_code: Option<String>,
        recoverability: Option<String>,
    ) -> Self {
        self.payload.error = Some(error);
        self.payload.error_code = error_code;
        self.payload.recoverability = recoverability;
        self
    }
}

fn fresh_event_id() -> String {
    let mut bytes = [0u8; 16];
    rand::fill(&mut bytes);
    format!("ev_{}", hex::encode(bytes))
}

/// Destination for audit events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BridgeEvent);
}

/// Default sink: one structured log record per event, with the envelope
/// serialized into the `envelope` field for downstream collectors.
#[derive(Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: BridgeEvent) {
        let envelope = serde_json::to_string(&event).unwrap_or_default();
        tracing::info!(
            event = %event.event_type,
            job_id = %event.payload.job_id,
            idempotency_key = %event.idempotency_key,
            source_tx = %event.payload.source_tx,
            source_network = %event.payload.source_network,
            destination_network = %event.payload.destination_network,
            amount = %event.payload.amount,
            attempt = event.payload.attempt,
            max_attempts = event.payload.max_attempts,
            error = event.payload.error.as_deref().unwrap_or(""),
            envelope = %envelope,
            "bridge lifecycle event"
        );
    }
}

/// Sink capturing events in memory, for assertions in tests.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<BridgeEvent>>,
}

impl RecordingEventSink {
    pub fn events(&self) -> Vec<BridgeEvent> {
        self.events.lock().expect("event sink poisoned").clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: BridgeEvent) {
        self.events.lock().expect("event sink poisoned").push(event);
    }
}
