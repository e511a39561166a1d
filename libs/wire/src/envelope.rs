//! Typed `{action, payload}` envelopes for the collector protocol.
//!
//! Outbound frames are built through [`Envelope`], which serializes with the
//! action as an adjacent tag so the wire shape is exactly
//! `{"action": "...", "payload": {...}}`. Inbound frames are only ever
//! inspected for their `action` field; collectors are free to send actions
//! this client does not understand, and those must be ignored rather than
//! rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-initiated request to re-run the time synchronization handshake.
pub const ACTION_REQUEST_TIME_SYNC: &str = "requestTimeSync";

/// A single client-to-collector wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "camelCase")]
pub enum Envelope {
    /// Clock handshake so the collector can align client timestamps.
    TimeSync(TimeSyncPayload),
    /// Periodic keep-alive.
    Heartbeat(HeartbeatPayload),
    /// Opens a new workflow on the collector.
    CreateWorkflow(CreateWorkflowPayload),
    /// A structured log event attached to a workflow.
    Log(LogPayload),
    /// Marks a workflow as finished.
    EndWorkflow(EndWorkflowPayload),
}

impl Envelope {
    /// Encode the envelope as a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Read the `action` discriminator off an inbound frame.
///
/// Returns `None` when the frame is not a JSON object or carries no string
/// `action` field; callers treat both the same as an unknown action.
pub fn peek_action(frame: &str) -> Option<String> {
    let value: Value = serde_json::from_str(frame).ok()?;
    value
        .get("action")
        .and_then(|a| a.as_str())
        .map(String::from)
}

/// Payload of the `timeSync` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncPayload {
    /// High-resolution client clock reading, epoch milliseconds as a float
    /// rendered to a string.
    pub client_time: String,
}

/// Payload of the `heartbeat` action. Intentionally empty; serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

/// Payload of the `createWorkflow` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkflowPayload {
    pub workflow_id: String,
    pub title: String,
    pub description: String,
}

/// Kind of body attached to a `log` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyType {
    Chart,
    Image,
    Object,
}

/// Payload of the `log` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub workflow_id: String,
    pub message: String,
    /// Arbitrary JSON body; the collector renders it according to `body_type`.
    pub body: Value,
    pub body_type: BodyType,
    /// ISO-8601 wall-clock time of the event.
    pub timestamp: String,
    /// High-resolution client clock reading, for skew correction.
    pub client_time: String,
    /// Client-side sequence number within the workflow.
    pub order: u64,
    /// Label identifying the emitting process.
    pub origin: String,
}

/// Payload of the `endWorkflow` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndWorkflowPayload {
    pub workflow_id: String,
    pub timestamp: String,
    pub client_time: String,
    pub order: u64,
    pub origin: String,
}
