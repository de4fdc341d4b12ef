//! Message envelopes as they appear on the wire.
//!
//! Bodies stay as raw JSON here; [`crate::events`] and [`crate::responses`]
//! turn them into typed values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sequence number used to correlate a request with its reply.
pub type Seq = i64;

/// A message received from the debug adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Response(Response),
    Event(Event),
    /// A reverse request initiated by the adapter.
    Request(Request),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub seq: Seq,
    pub request_seq: Seq,
    pub success: bool,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Response {
    /// Human readable reason for a failed reply.
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("{} request failed", self.command))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub seq: Seq,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

/// A message written to the other end of the connection.
///
/// Clients only ever send requests; responses and events are written by
/// adapter doubles in tests.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutgoingMessage {
    Request(Request),
    Response(Response),
    Event(Event),
}
