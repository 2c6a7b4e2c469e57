//! Device log classification and the poll loop.
//!
//! [`classify`] maps every raw `{type, message}` record to exactly one
//! [`LogEvent`]. [`LogStream`] owns the long-poll loop against the build
//! service: stale cursors resubscribe transparently (an explicit loop, so
//! long sessions with many token refreshes cannot grow the stack), benign
//! poll timeouts retry silently, and only genuine transport faults end
//! the stream.

use crate::api::{ApiError, BuildApi, LogCursor};
use rth_common::{DeviceId, ImpUnitMessage, LogEvent, LogRecord, TestError, TestKind, IMPUNIT_MARKER};
use std::sync::LazyLock;
use tracing::{debug, trace};

static CODE_SPACE_USAGE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(\d+(?:\.\d+)?)% program storage used$").expect("valid regex")
});

/// Classify one raw log record.
///
/// `server.log` / `agent.log` records are test-framework lines only when
/// they match the requested test kind: `device` sessions read `server.*`
/// and `agent` sessions read `agent.*`. That asymmetry is a quirk of the
/// service's record naming and is load-bearing — do not normalize it.
///
/// A framework line that fails to decode is an error, not an `Unknown`.
pub fn classify(record: &LogRecord, kind: TestKind) -> Result<LogEvent, TestError> {
    let message = record.message.as_str();
    let event = match record.record_type.as_str() {
        "status" => classify_status(message),
        "lastexitcode" => LogEvent::LastExitCode {
            message: message.to_string(),
        },
        "server.log" if kind == TestKind::Device => return classify_framework_line(record),
        "agent.log" if kind == TestKind::Agent => return classify_framework_line(record),
        "server.error" => LogEvent::DeviceError {
            message: message.to_string(),
        },
        "agent.error" => LogEvent::AgentError {
            message: message.to_string(),
        },
        "powerstate" => LogEvent::PowerState {
            message: message.to_string(),
        },
        "firmware" => LogEvent::Firmware {
            message: message.to_string(),
        },
        _ => LogEvent::Unknown {
            record_type: record.record_type.clone(),
            message: message.to_string(),
        },
    };
    Ok(event)
}

fn classify_status(message: &str) -> LogEvent {
    if let Some(captures) = CODE_SPACE_USAGE.captures(message) {
        // The capture is digits-and-dot by construction.
        let percent = captures[1].parse::<f64>().unwrap_or(0.0);
        return LogEvent::CodeSpaceUsage { percent };
    }
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("agent restarted") {
        LogEvent::AgentRestarted
    } else if lowered.contains("out of code space") || message == "Out of space" {
        LogEvent::OutOfCodeSpace
    } else if message == "Device connected" {
        LogEvent::DeviceConnected
    } else if message == "Device disconnected" {
        LogEvent::DeviceDisconnected
    } else {
        LogEvent::Unknown {
            record_type: "status".to_string(),
            message: message.to_string(),
        }
    }
}

fn classify_framework_line(record: &LogRecord) -> Result<LogEvent, TestError> {
    let Some(payload) = record.message.strip_prefix(IMPUNIT_MARKER) else {
        // A plain device/agent print, not a framework line.
        return Ok(LogEvent::Unknown {
            record_type: record.record_type.clone(),
            message: record.message.clone(),
        });
    };
    let message: ImpUnitMessage = serde_json::from_str(payload).map_err(|e| {
        TestError::Unclassified(format!("Failed to parse test framework message: {e}"))
    })?;
    Ok(LogEvent::ImpUnit(message))
}

/// One delivered poll tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// The stream is connected; no data this tick.
    Ready,
    /// Records, in service delivery order.
    Records(Vec<LogRecord>),
}

/// The device log poll loop.
pub struct LogStream<'a, A: BuildApi> {
    api: &'a A,
    device_id: DeviceId,
    cursor: Option<LogCursor>,
}

impl<'a, A: BuildApi> LogStream<'a, A> {
    pub fn new(api: &'a A, device_id: DeviceId) -> Self {
        Self {
            api,
            device_id,
            cursor: None,
        }
    }

    /// Fetch the next tick.
    ///
    /// Subscribes lazily on first use and re-subscribes whenever the
    /// service reports a stale cursor; neither case surfaces to the
    /// caller. A fatal transport error ends the stream with a
    /// `RemoteService` error.
    pub async fn next_batch(&mut self) -> Result<Batch, TestError> {
        loop {
            let cursor = match &self.cursor {
                Some(cursor) => cursor.clone(),
                None => {
                    let cursor = self
                        .api
                        .subscribe_logs(&self.device_id)
                        .await
                        .map_err(|e| TestError::RemoteService(e.to_string()))?;
                    self.cursor = Some(cursor.clone());
                    cursor
                }
            };

            match self.api.poll_logs(&self.device_id, &cursor).await {
                Ok(poll) => {
                    self.cursor = Some(poll.cursor);
                    return Ok(match poll.records {
                        Some(records) => Batch::Records(records),
                        None => Batch::Ready,
                    });
                }
                Err(ApiError::StaleCursor) => {
                    debug!(device = %self.device_id, "log poll cursor stale, resubscribing");
                    self.cursor = None;
                }
                Err(ApiError::PollTimeout) => {
                    trace!(device = %self.device_id, "log poll window lapsed, retrying");
                }
                Err(err) => return Err(TestError::RemoteService(err.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::{MockBuildApi, PollStep};
    use rth_common::{ImpUnitBody, ImpUnitType};

    const RESULT_LINE: &str =
        r#"__IMPUNIT__{"session":"abc","type":"RESULT","message":{"tests":3,"assertions":5,"failures":1}}"#;

    #[test]
    fn server_log_impunit_classifies_for_device_kind() {
        let record = LogRecord::new("server.log", RESULT_LINE);
        let event = classify(&record, TestKind::Device).unwrap();
        match event {
            LogEvent::ImpUnit(msg) => {
                assert_eq!(msg.session, "abc");
                assert_eq!(msg.message_type, ImpUnitType::Result);
                match msg.message {
                    ImpUnitBody::Counters(c) => assert_eq!(c.failures, 1),
                    ImpUnitBody::Text(_) => panic!("expected counters"),
                }
            }
            other => panic!("expected ImpUnit, got {other:?}"),
        }
    }

    #[test]
    fn server_log_impunit_is_not_relevant_for_agent_kind() {
        let record = LogRecord::new("server.log", RESULT_LINE);
        let event = classify(&record, TestKind::Agent).unwrap();
        assert!(matches!(event, LogEvent::Unknown { .. }));
    }

    #[test]
    fn agent_log_impunit_classifies_for_agent_kind() {
        let record = LogRecord::new("agent.log", RESULT_LINE);
        let event = classify(&record, TestKind::Agent).unwrap();
        assert!(matches!(event, LogEvent::ImpUnit(_)));
    }

    #[test]
    fn corrupt_framework_line_is_an_error() {
        let record = LogRecord::new("server.log", "__IMPUNIT__{not json");
        let err = classify(&record, TestKind::Device).unwrap_err();
        assert!(matches!(err, TestError::Unclassified(_)));
    }

    #[test]
    fn untagged_server_log_is_unknown() {
        let record = LogRecord::new("server.log", "plain debug print");
        let event = classify(&record, TestKind::Device).unwrap();
        assert!(matches!(event, LogEvent::Unknown { .. }));
    }

    #[test]
    fn status_records_classify_by_message() {
        let cases = [
            ("Agent restarted", LogEvent::AgentRestarted),
            ("Device connected", LogEvent::DeviceConnected),
            ("Device disconnected", LogEvent::DeviceDisconnected),
            ("Out of space", LogEvent::OutOfCodeSpace),
            (
                "42.5% program storage used",
                LogEvent::CodeSpaceUsage { percent: 42.5 },
            ),
        ];
        for (message, expected) in cases {
            let record = LogRecord::new("status", message);
            assert_eq!(classify(&record, TestKind::Device).unwrap(), expected);
        }
    }

    #[test]
    fn error_and_narration_records_classify() {
        let record = LogRecord::new("server.error", "index out of range");
        assert_eq!(
            classify(&record, TestKind::Device).unwrap(),
            LogEvent::DeviceError {
                message: "index out of range".to_string()
            }
        );
        let record = LogRecord::new("agent.error", "null reference");
        assert_eq!(
            classify(&record, TestKind::Agent).unwrap(),
            LogEvent::AgentError {
                message: "null reference".to_string()
            }
        );
        let record = LogRecord::new("powerstate", "online");
        assert!(matches!(
            classify(&record, TestKind::Device).unwrap(),
            LogEvent::PowerState { .. }
        ));
        let record = LogRecord::new("firmware", "release-36.13");
        assert!(matches!(
            classify(&record, TestKind::Device).unwrap(),
            LogEvent::Firmware { .. }
        ));
    }

    #[test]
    fn unmatched_type_is_unknown() {
        let record = LogRecord::new("something.new", "payload");
        let event = classify(&record, TestKind::Device).unwrap();
        assert_eq!(
            event,
            LogEvent::Unknown {
                record_type: "something.new".to_string(),
                message: "payload".to_string()
            }
        );
    }

    #[tokio::test]
    async fn stream_delivers_records_and_ready_ticks() {
        let api = MockBuildApi::new("m");
        api.push_empty();
        api.push_records(vec![LogRecord::new("status", "Device connected")]);

        let mut stream = LogStream::new(&api, DeviceId::new("d1"));
        assert_eq!(stream.next_batch().await.unwrap(), Batch::Ready);
        assert_eq!(
            stream.next_batch().await.unwrap(),
            Batch::Records(vec![LogRecord::new("status", "Device connected")])
        );
        assert_eq!(api.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn stale_cursor_resubscribes_and_continues() {
        let api = MockBuildApi::new("m");
        api.push_records(vec![LogRecord::new("status", "Device connected")]);
        api.push_poll(PollStep::Stale);
        api.push_records(vec![LogRecord::new("status", "Device disconnected")]);

        let mut stream = LogStream::new(&api, DeviceId::new("d1"));
        assert!(matches!(
            stream.next_batch().await.unwrap(),
            Batch::Records(_)
        ));
        // The stale poll is absorbed: same call keeps delivering.
        assert_eq!(
            stream.next_batch().await.unwrap(),
            Batch::Records(vec![LogRecord::new("status", "Device disconnected")])
        );
        assert_eq!(api.subscribe_count(), 2);
    }

    #[tokio::test]
    async fn poll_timeout_retries_silently() {
        let api = MockBuildApi::new("m");
        api.push_poll(PollStep::Timeout);
        api.push_empty();

        let mut stream = LogStream::new(&api, DeviceId::new("d1"));
        assert_eq!(stream.next_batch().await.unwrap(), Batch::Ready);
        assert_eq!(api.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn fatal_transport_error_ends_the_stream() {
        let api = MockBuildApi::new("m");
        api.push_poll(PollStep::Fatal("connection reset".to_string()));

        let mut stream = LogStream::new(&api, DeviceId::new("d1"));
        let err = stream.next_batch().await.unwrap_err();
        assert!(matches!(err, TestError::RemoteService(_)));
    }

    #[tokio::test]
    async fn many_token_refreshes_do_not_recurse() {
        let api = MockBuildApi::new("m");
        for _ in 0..500 {
            api.push_poll(PollStep::Stale);
        }
        api.push_empty();

        let mut stream = LogStream::new(&api, DeviceId::new("d1"));
        assert_eq!(stream.next_batch().await.unwrap(), Batch::Ready);
        assert_eq!(api.subscribe_count(), 501);
    }
}
