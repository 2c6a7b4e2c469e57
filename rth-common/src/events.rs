//! Log-event model: raw device log records and their classified forms.
//!
//! Raw records are `{type, message}` pairs as delivered by the build
//! service's log poll. Classification turns each record into exactly one
//! [`LogEvent`]; events are ephemeral and never persisted.

use serde::{Deserialize, Serialize};

/// Marker prefix the on-device test framework puts on its protocol lines.
/// Everything after the marker is a JSON-encoded [`ImpUnitMessage`].
pub const IMPUNIT_MARKER: &str = "__IMPUNIT__";

/// A raw log record as delivered by the build service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Record type (e.g. "status", "server.log", "agent.error").
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record payload.
    pub message: String,
}

impl LogRecord {
    pub fn new(record_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            message: message.into(),
        }
    }
}

/// A classified device log event.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// The agent VM restarted (new code revision took effect).
    AgentRestarted,
    /// Program storage usage report.
    CodeSpaceUsage { percent: f64 },
    /// The device rejected the revision for lack of code space.
    OutOfCodeSpace,
    /// The device (re)connected to the server.
    DeviceConnected,
    /// The device dropped off the server.
    DeviceDisconnected,
    /// Exit code report from the previous device run.
    LastExitCode { message: String },
    /// Test-framework protocol message.
    ImpUnit(ImpUnitMessage),
    /// Runtime error reported by agent code.
    AgentError { message: String },
    /// Runtime error reported by device code.
    DeviceError { message: String },
    /// Power state change narration.
    PowerState { message: String },
    /// Firmware version narration.
    Firmware { message: String },
    /// Anything the classifier has no mapping for.
    Unknown { record_type: String, message: String },
}

/// Message kinds produced by the on-device test framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImpUnitType {
    /// Test session started on the device/agent.
    Start,
    /// Per-test progress (setUp/tearDown/test method narration).
    Status,
    /// A test assertion failed.
    Fail,
    /// Final counters; always ends the session.
    Result,
}

impl std::fmt::Display for ImpUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Status => write!(f, "STATUS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Result => write!(f, "RESULT"),
        }
    }
}

/// A decoded test-framework protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpUnitMessage {
    /// Session id the message belongs to. Messages for other sessions are
    /// discarded, not errors (stale output from a previous run attempt).
    pub session: String,
    #[serde(rename = "type")]
    pub message_type: ImpUnitType,
    #[serde(default)]
    pub message: ImpUnitBody,
}

/// ImpUnit message body: free text for START/STATUS/FAIL, counters for
/// RESULT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImpUnitBody {
    Counters(ImpUnitCounters),
    Text(String),
}

impl Default for ImpUnitBody {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ImpUnitBody {
    /// Body text, empty for counter bodies.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Counters(_) => "",
        }
    }
}

/// Final session counters reported by a RESULT message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpUnitCounters {
    pub tests: u32,
    pub assertions: u32,
    pub failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_start_message() {
        let json = r#"{"session":"a1b2c3","type":"START","message":"session started"}"#;
        let msg: ImpUnitMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.session, "a1b2c3");
        assert_eq!(msg.message_type, ImpUnitType::Start);
        assert_eq!(msg.message.as_text(), "session started");
    }

    #[test]
    fn parse_result_message_with_counters() {
        let json = r#"{"session":"a1b2c3","type":"RESULT","message":{"tests":3,"assertions":5,"failures":1}}"#;
        let msg: ImpUnitMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message_type, ImpUnitType::Result);
        match msg.message {
            ImpUnitBody::Counters(c) => {
                assert_eq!(c.tests, 3);
                assert_eq!(c.assertions, 5);
                assert_eq!(c.failures, 1);
            }
            ImpUnitBody::Text(_) => panic!("expected counters body"),
        }
    }

    #[test]
    fn parse_message_without_body() {
        let json = r#"{"session":"a1b2c3","type":"STATUS"}"#;
        let msg: ImpUnitMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.message.as_text(), "");
    }

    #[test]
    fn reject_unknown_message_type() {
        let json = r#"{"session":"a1b2c3","type":"NOPE","message":"x"}"#;
        assert!(serde_json::from_str::<ImpUnitMessage>(json).is_err());
    }

    #[test]
    fn log_record_wire_shape_uses_type_key() {
        let record: LogRecord =
            serde_json::from_str(r#"{"type":"server.log","message":"hello"}"#).unwrap();
        assert_eq!(record.record_type, "server.log");
        assert_eq!(record.message, "hello");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"server.log\""));
    }
}
