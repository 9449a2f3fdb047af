//! Messages exchanged with the relay
//!
//! Every text record is a JSON object discriminated by its `type` field.
//! Binary messages carry one encoded camera frame.

use crate::error::LinkError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sortline_core::types::{Detection, FusedReport, RobotCommand, RobotStatus};
use tracing::debug;

/// Records the agent sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Hello { client: String, version: String },
    Detection { detections: Vec<Detection>, timestamp: f64 },
    RobotCommand { command: RobotCommand },
}

impl OutboundMessage {
    pub fn hello(client: &str, version: &str) -> Self {
        OutboundMessage::Hello {
            client: client.to_string(),
            version: version.to_string(),
        }
    }

    pub fn detection(report: FusedReport) -> Self {
        OutboundMessage::Detection {
            detections: report.detections,
            timestamp: report.timestamp,
        }
    }

    pub fn robot_command(command: RobotCommand) -> Self {
        OutboundMessage::RobotCommand { command }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Hello { .. } => "hello",
            OutboundMessage::Detection { .. } => "detection",
            OutboundMessage::RobotCommand { .. } => "robot_command",
        }
    }

    pub fn to_text(&self) -> Result<String, LinkError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound traffic the agent acts on
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// One encoded image
    Frame(Bytes),
    Control { enabled: bool },
    RobotStatus(RobotStatus),
}

/// Parse one text record.
///
/// Returns `Ok(None)` for well-formed records of a type the agent does not
/// handle (`frame_metadata` and the like).
pub fn parse_record(text: &str) -> Result<Option<InboundEvent>, LinkError> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| LinkError::Protocol(format!("malformed record: {}", e)))?;
    let record = value
        .as_object()
        .ok_or_else(|| LinkError::Protocol("record is not a JSON object".to_string()))?;
    let kind = record
        .get("type")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| LinkError::Protocol("record has no type".to_string()))?;

    match kind {
        "control_status" => {
            let enabled = record.get("enabled").and_then(JsonValue::as_bool).unwrap_or(false);
            Ok(Some(InboundEvent::Control { enabled }))
        }
        "robot_status" => {
            let status = record
                .get("status")
                .cloned()
                .unwrap_or_else(|| JsonValue::Object(Default::default()));
            Ok(Some(InboundEvent::RobotStatus(RobotStatus::new(status))))
        }
        other => {
            debug!("Ignoring '{}' record", other);
            Ok(None)
        }
    }
}
