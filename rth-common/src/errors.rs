//! Error taxonomy for test-session orchestration.
//!
//! The taxonomy is deliberately flat: the scheduler dispatches its stop
//! policy on the error kind alone, so there is no hierarchy to match
//! against. Every variant carries a human-readable message and nothing
//! else.

use serde::Serialize;
use thiserror::Error;

/// All error kinds the session/classifier/scheduler layers can produce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TestError {
    /// The target device is assigned to a different model than configured.
    #[error("Device model mismatch: {0}")]
    WrongModel(String),

    /// The target device is not online and the test needs device code.
    #[error("Device is in \"{0}\" powerstate")]
    DevicePowerstate(String),

    /// No session start observed within the session-start watchdog window.
    #[error("Session startup timeout")]
    SessionStartTimeout,

    /// No test message observed within the test-message watchdog window.
    #[error("Testing timeout")]
    SessionTestMessagesTimeout,

    /// A test assertion failed (ImpUnit FAIL message).
    #[error("{0}")]
    TestMethod(String),

    /// An ImpUnit message arrived in a state that cannot accept it.
    #[error("{0}")]
    TestState(String),

    /// The session finished with a non-zero failure count. Informational:
    /// the counters already carry the detail and the session has already
    /// stopped itself.
    #[error("{0}")]
    SessionFailed(String),

    /// The device dropped off the server mid-session.
    #[error("Device disconnected")]
    DeviceDisconnected,

    /// Runtime error reported by device code.
    #[error("Device runtime error: {0}")]
    DeviceRuntime(String),

    /// Runtime error reported by agent code.
    #[error("Agent runtime error: {0}")]
    AgentRuntime(String),

    /// Device-side fault (out of memory, out of code space, exit codes).
    #[error("Device error: {0}")]
    Device(String),

    /// The build service itself failed (HTTP/network/timeout).
    #[error("Remote service error: {0}")]
    RemoteService(String),

    /// Anything outside the closed taxonomy (e.g. a corrupt test-framework
    /// line). Handled by the scheduler's catch-all policy row.
    #[error("{0}")]
    Unclassified(String),
}

/// Stop flags produced by the scheduler's error-policy table.
///
/// Each flag is independent: `stop_session` ends the current log stream,
/// `stop_device` skips the device's remaining test files, `stop_command`
/// aborts the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StopFlags {
    pub stop_session: bool,
    pub stop_device: bool,
    pub stop_command: bool,
}

impl TestError {
    /// The scheduler's error-policy table.
    ///
    /// `stop_on_failure` is the user's configuration: when set, any failure
    /// that stops a session also escalates to aborting the whole command.
    pub fn stop_policy(&self, stop_on_failure: bool) -> StopFlags {
        match self {
            // A failed assertion only ends the session when the user asked
            // to stop on failure; otherwise the session keeps running until
            // its RESULT message.
            Self::TestMethod(_) => StopFlags {
                stop_session: stop_on_failure,
                stop_device: false,
                stop_command: stop_on_failure,
            },

            // Informational: the RESULT counters already captured the
            // failure and the session has stopped itself.
            Self::SessionFailed(_) => StopFlags::default(),

            // Device-level preconditions failed; no point trying the
            // remaining files on this device.
            Self::WrongModel(_) | Self::DevicePowerstate(_) => StopFlags {
                stop_session: true,
                stop_device: true,
                stop_command: stop_on_failure,
            },

            // Everything else ends the session and escalates only when
            // stop-on-failure is configured.
            Self::TestState(_)
            | Self::SessionStartTimeout
            | Self::SessionTestMessagesTimeout
            | Self::DeviceDisconnected
            | Self::DeviceRuntime(_)
            | Self::AgentRuntime(_)
            | Self::Device(_)
            | Self::RemoteService(_)
            | Self::Unclassified(_) => StopFlags {
                stop_session: true,
                stop_device: false,
                stop_command: stop_on_failure,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(session: bool, device: bool, command: bool) -> StopFlags {
        StopFlags {
            stop_session: session,
            stop_device: device,
            stop_command: command,
        }
    }

    #[test]
    fn test_method_error_stops_only_with_stop_on_failure() {
        let err = TestError::TestMethod("Expected 1, got 2".to_string());
        assert_eq!(err.stop_policy(false), flags(false, false, false));
        assert_eq!(err.stop_policy(true), flags(true, false, true));
    }

    #[test]
    fn test_state_error_always_stops_session() {
        let err = TestError::TestState("Invalid test session state".to_string());
        assert_eq!(err.stop_policy(false), flags(true, false, false));
        assert_eq!(err.stop_policy(true), flags(true, false, true));
    }

    #[test]
    fn session_failed_is_a_policy_no_op() {
        let err = TestError::SessionFailed("2 tests failed".to_string());
        assert_eq!(err.stop_policy(false), StopFlags::default());
        assert_eq!(err.stop_policy(true), StopFlags::default());
    }

    #[test]
    fn device_faults_stop_session_not_device() {
        for err in [
            TestError::DeviceDisconnected,
            TestError::DeviceRuntime("index out of range".to_string()),
            TestError::AgentRuntime("null reference".to_string()),
            TestError::Device("Out of memory".to_string()),
        ] {
            assert_eq!(err.stop_policy(false), flags(true, false, false));
            assert_eq!(err.stop_policy(true), flags(true, false, true));
        }
    }

    #[test]
    fn device_precondition_errors_stop_device() {
        let wrong = TestError::WrongModel("expected m1, device is on m2".to_string());
        let power = TestError::DevicePowerstate("offline".to_string());
        assert_eq!(wrong.stop_policy(false), flags(true, true, false));
        assert_eq!(power.stop_policy(true), flags(true, true, true));
    }

    #[test]
    fn timeouts_stop_session_and_escalate_conditionally() {
        for err in [
            TestError::SessionStartTimeout,
            TestError::SessionTestMessagesTimeout,
        ] {
            assert_eq!(err.stop_policy(false), flags(true, false, false));
            assert_eq!(err.stop_policy(true), flags(true, false, true));
        }
    }

    #[test]
    fn remote_service_and_unclassified_share_the_default_row() {
        let remote = TestError::RemoteService("504 Gateway Timeout".to_string());
        let other = TestError::Unclassified("failed to parse test message".to_string());
        assert_eq!(remote.stop_policy(false), flags(true, false, false));
        assert_eq!(other.stop_policy(true), flags(true, false, true));
    }

    #[test]
    fn messages_render_through_display() {
        let err = TestError::Device("Out of code space".to_string());
        assert_eq!(err.to_string(), "Device error: Out of code space");
        let err = TestError::DevicePowerstate("offline".to_string());
        assert_eq!(err.to_string(), "Device is in \"offline\" powerstate");
    }
}
