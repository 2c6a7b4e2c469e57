//! Per-test-file session state machine.
//!
//! A session interprets the classified log events for one test file run
//! and turns them into pass/fail/progress semantics. It has no direct
//! acknowledgement channel from the device: everything is inferred from
//! the log stream, so the machine tolerates noise (stale framework lines
//! from earlier sessions, pre-restart exit codes, duplicate narration)
//! while treating genuine protocol violations as errors.

use crate::api::BuildApi;
use crate::narrator::Severity;
use rand::distr::Alphanumeric;
use rand::RngExt;
use rth_common::{
    ImpUnitBody, ImpUnitMessage, ImpUnitType, LogEvent, ModelId, Revision, TestError,
};
use tracing::debug;

/// Narrate code space usage above this as a warning.
const CODE_SPACE_WARNING_PERCENT: f64 = 80.0;

/// Session lifecycle. `Ready` means the agent restart has been observed;
/// `Started` means the framework's START message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initialized,
    Ready,
    Started,
    Finished,
}

/// What a session emits while consuming events. The owner (scheduler)
/// narrates messages, resets watchdogs on `Started`/`TestMessage`/
/// `Result`, and routes errors through the stop-policy table.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Message(Severity, String),
    Error(TestError),
    /// Framework START observed; session-start watchdog can stand down.
    Started,
    /// Any framework message for this session; test-message liveness.
    TestMessage,
    /// Framework RESULT observed; counters are final.
    Result,
}

pub struct TestSession {
    id: String,
    state: SessionState,
    pub tests: u32,
    pub assertions: u32,
    pub failures: u32,
    code_space_usage: Option<f64>,
    result_seen: bool,
    /// Did any error occur during this session.
    pub error: bool,
    /// Should the log stream stop at the next loop iteration.
    pub stop: bool,
}

impl TestSession {
    pub fn new() -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>()
            .to_lowercase();
        Self::with_id(id)
    }

    /// Fixed-id constructor for deterministic tests.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Initialized,
            tests: 0,
            assertions: 0,
            failures: 0,
            code_space_usage: None,
            result_seen: false,
            error: false,
            stop: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether a RESULT message was observed (counters are final).
    pub fn received_result(&self) -> bool {
        self.result_seen
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Push the bundled code and restart the model.
    ///
    /// Either call failing raises the service's error and finishes the
    /// session immediately; retries belong to the service client, not
    /// here.
    pub async fn start<A: BuildApi>(
        &mut self,
        api: &A,
        model_id: &ModelId,
        device_code: &str,
        agent_code: &str,
    ) -> Result<Revision, TestError> {
        let result = async {
            let revision = api
                .create_revision(model_id, device_code, agent_code)
                .await?;
            api.restart_model(model_id).await?;
            Ok::<Revision, crate::api::ApiError>(revision)
        }
        .await;

        match result {
            Ok(revision) => Ok(revision),
            Err(err) => {
                self.error = true;
                self.stop = true;
                self.state = SessionState::Finished;
                Err(err.into())
            }
        }
    }

    /// Consume one classified event, producing signals for the owner.
    pub fn apply(&mut self, event: LogEvent) -> Vec<SessionSignal> {
        let mut signals = Vec::new();
        match event {
            LogEvent::AgentRestarted => {
                signals.push(SessionSignal::Message(
                    Severity::Info,
                    "Agent restarted".to_string(),
                ));
                // Only the first restart transitions; later ones are
                // narration-only (device-side reboots mid-run).
                if self.state == SessionState::Initialized {
                    self.state = SessionState::Ready;
                }
            }

            LogEvent::CodeSpaceUsage { percent } => {
                if self.code_space_usage != Some(percent) {
                    self.code_space_usage = Some(percent);
                    let severity = if percent > CODE_SPACE_WARNING_PERCENT {
                        Severity::Warning
                    } else {
                        Severity::Info
                    };
                    signals.push(SessionSignal::Message(
                        severity,
                        format!("Device code space usage: {percent:.1}%"),
                    ));
                }
            }

            LogEvent::OutOfCodeSpace => {
                signals.push(self.raise(TestError::Device("Out of code space".to_string())));
            }

            LogEvent::DeviceConnected => {
                signals.push(SessionSignal::Message(
                    Severity::Info,
                    "Device connected".to_string(),
                ));
            }

            LogEvent::DeviceDisconnected => {
                signals.push(self.raise(TestError::DeviceDisconnected));
            }

            LogEvent::LastExitCode { message } => {
                // Pre-restart noise: the previous run's exit code arrives
                // before our revision takes effect.
                if self.state != SessionState::Initialized {
                    let error = if message.to_ascii_lowercase().contains("out of memory") {
                        TestError::Device("Out of memory".to_string())
                    } else {
                        TestError::Device(message)
                    };
                    signals.push(self.raise(error));
                }
            }

            LogEvent::ImpUnit(message) => {
                self.apply_impunit(message, &mut signals);
            }

            LogEvent::DeviceError { message } => {
                signals.push(self.raise(TestError::DeviceRuntime(message)));
            }

            LogEvent::AgentError { message } => {
                signals.push(self.raise(TestError::AgentRuntime(message)));
            }

            LogEvent::PowerState { message } => {
                signals.push(SessionSignal::Message(
                    Severity::Info,
                    format!("Powerstate: {message}"),
                ));
            }

            LogEvent::Firmware { message } => {
                signals.push(SessionSignal::Message(
                    Severity::Info,
                    format!("Firmware: {message}"),
                ));
            }

            LogEvent::Unknown {
                record_type,
                message,
            } => {
                debug!(%record_type, %message, "unclassified log record");
            }
        }
        signals
    }

    fn apply_impunit(&mut self, message: ImpUnitMessage, signals: &mut Vec<SessionSignal>) {
        if message.session != self.id {
            // Stale output from a previous run attempt; not an error.
            debug!(
                theirs = %message.session,
                ours = %self.id,
                "discarding framework message for another session"
            );
            return;
        }

        signals.push(SessionSignal::TestMessage);

        match message.message_type {
            ImpUnitType::Start => {
                if self.state == SessionState::Ready {
                    self.state = SessionState::Started;
                    signals.push(SessionSignal::Message(
                        Severity::Test,
                        "Test session started".to_string(),
                    ));
                    signals.push(SessionSignal::Started);
                } else {
                    signals.push(self.raise(TestError::TestState(
                        "Invalid test session state".to_string(),
                    )));
                }
            }

            ImpUnitType::Status => {
                if self.state == SessionState::Started {
                    signals.push(status_message(message.message.as_text()));
                } else {
                    signals.push(self.raise(TestError::TestState(
                        "Invalid test session state".to_string(),
                    )));
                }
            }

            ImpUnitType::Fail => {
                if self.state == SessionState::Started {
                    // A failed assertion; the session keeps running until
                    // RESULT unless the owner's stop policy says otherwise.
                    signals.push(
                        self.raise(TestError::TestMethod(message.message.as_text().to_string())),
                    );
                } else {
                    signals.push(self.raise(TestError::TestState(
                        "Invalid test session state".to_string(),
                    )));
                }
            }

            ImpUnitType::Result => {
                if self.state != SessionState::Started {
                    signals.push(self.raise(TestError::TestState(
                        "Invalid test session state".to_string(),
                    )));
                    return;
                }
                self.state = SessionState::Finished;
                // RESULT always ends the session, pass or fail.
                self.stop = true;
                self.result_seen = true;
                signals.push(SessionSignal::Result);
                match message.message {
                    ImpUnitBody::Counters(counters) => {
                        self.tests = counters.tests;
                        self.assertions = counters.assertions;
                        self.failures = counters.failures;
                        if counters.failures > 0 {
                            signals.push(self.raise(TestError::SessionFailed(format!(
                                "{} test{} failed",
                                counters.failures,
                                if counters.failures == 1 { "" } else { "s" }
                            ))));
                        } else {
                            signals.push(SessionSignal::Message(
                                Severity::Test,
                                format!(
                                    "Success: {} tests, {} assertions",
                                    counters.tests, counters.assertions
                                ),
                            ));
                        }
                    }
                    ImpUnitBody::Text(_) => {
                        signals.push(self.raise(TestError::Unclassified(
                            "RESULT message without counters".to_string(),
                        )));
                    }
                }
            }
        }
    }

    fn raise(&mut self, error: TestError) -> SessionSignal {
        self.error = true;
        SessionSignal::Error(error)
    }
}

impl Default for TestSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a STATUS body: setUp/tearDown lines get dedicated phrasing,
/// everything else passes through verbatim.
fn status_message(text: &str) -> SessionSignal {
    let message = if let Some(case) = text.strip_suffix("::setUp()") {
        format!("Setting up {case}")
    } else if let Some(case) = text.strip_suffix("::tearDown()") {
        format!("Tearing down {case}")
    } else {
        text.to_string()
    };
    SessionSignal::Message(Severity::Test, message)
}
