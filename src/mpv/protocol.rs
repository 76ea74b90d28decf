//! MPV JSON IPC protocol types.
//!
//! Reference: https://mpv.io/manual/master/#json-ipc

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes used in [`MpvResponse::error`]. mpv itself only ever sends
/// `success` or a failure string; the remaining codes are synthesized locally
/// so callers can treat every failure as a response and check one field.
pub mod response_codes {
  pub const SUCCESS: &str = "success";
  pub const NOT_CONNECTED: &str = "not_connected";
  pub const TIMEOUT: &str = "timeout";
  pub const DISCONNECTED: &str = "disconnected";
  pub const RECONNECTION_FAILED: &str = "reconnection_failed";
}

/// Command sent to mpv via IPC, one JSON line on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct MpvRequest {
  pub command: Vec<Value>,
  pub request_id: i64,
}

/// Response from mpv for a command.
#[derive(Debug, Clone, Deserialize)]
pub struct MpvResponse {
  /// "success" or an error code.
  pub error: String,
  /// Response data (command-specific).
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: i64,
}

impl MpvResponse {
  /// Check if the command succeeded.
  pub fn is_success(&self) -> bool {
    self.error == response_codes::SUCCESS
  }

  /// Build a locally-synthesized failure response (never went over the wire).
  pub(crate) fn local_failure(code: &str) -> Self {
    Self {
      error: code.to_string(),
      data: None,
      request_id: 0,
    }
  }
}

/// Event sent by mpv (property changes, playback events, etc.).
#[derive(Debug, Clone, Deserialize)]
pub struct MpvEvent {
  /// Event type (e.g., "property-change", "end-file", "file-loaded").
  pub event: String,
  /// Observer ID for property-change events.
  pub id: Option<i64>,
  /// Property name for property-change events.
  pub name: Option<String>,
  /// Event data.
  pub data: Option<Value>,
  /// Reason for end-file events (e.g., "eof", "stop", "quit", "error").
  pub reason: Option<String>,
}

/// Message received from mpv IPC (either response or event).
#[derive(Debug, Clone)]
pub enum MpvMessage {
  Response(MpvResponse),
  Event(MpvEvent),
}

impl MpvMessage {
  /// Parse a JSON line from mpv. Responses carry a `request_id`; everything
  /// else must carry an `event` key or the line is rejected.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("request_id").is_some() {
      Ok(MpvMessage::Response(serde_json::from_value(value)?))
    } else {
      Ok(MpvMessage::Event(serde_json::from_value(value)?))
    }
  }
}
