//! Device/file scheduling loop.
//!
//! Runs every discovered test file against every configured device,
//! strictly sequentially: revision pushes race on the model's single
//! "current code" slot and interleaved narration would be unreadable, so
//! throughput is deliberately traded for determinism. Owns both liveness
//! watchdogs, instantiates one [`TestSession`] per file, and applies the
//! three-tier stop policy (`stop_session` / `stop_device` /
//! `stop_command`) from the error taxonomy.

use crate::api::BuildApi;
use crate::bundle::SourceBundler;
use crate::logs::{classify, Batch, LogStream};
use crate::narrator::Narrator;
use crate::session::{SessionSignal, TestSession};
use crate::watchdog::Watchdog;
use rth_common::discovery::{discover_tests, DiscoveryError};
use rth_common::{DeviceId, HarnessConfig, ModelId, TestError, TestFile, TestKind};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Fixed slack added to the per-test timeout for the test-message
/// watchdog, covering poll latency.
const TEST_MESSAGE_SLACK_SECONDS: f64 = 5.0;

const SESSION_START_WATCHDOG: &str = "session-start";
const TEST_MESSAGES_WATCHDOG: &str = "test-messages";

/// Run-wide state mutated by the error policy.
#[derive(Debug, Default)]
struct RunFlags {
    failed: bool,
    stop_device: bool,
    stop_command: bool,
}

pub struct DeviceTestScheduler<A: BuildApi, B: SourceBundler> {
    config: HarnessConfig,
    project_root: PathBuf,
    api: A,
    bundler: B,
    narrator: Narrator,
    flags: RunFlags,
}

impl<A: BuildApi, B: SourceBundler> DeviceTestScheduler<A, B> {
    pub fn new(config: HarnessConfig, project_root: PathBuf, api: A, bundler: B) -> Self {
        Self {
            config,
            project_root,
            api,
            bundler,
            narrator: Narrator::new(),
            flags: RunFlags::default(),
        }
    }

    /// The build service handle, mainly for test inspection.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Run all discovered test files against all configured devices.
    /// Returns overall success.
    pub async fn run(&mut self) -> Result<bool, DiscoveryError> {
        let tests = discover_tests(&self.project_root, &self.config.test_files)?;
        if tests.is_empty() {
            self.narrator.warning("No test files found");
            return Ok(!self.flags.failed);
        }
        self.narrator
            .info(&format!("Found {} test file(s)", tests.len()));

        let model_id = ModelId::new(self.config.model_id.clone());
        let devices: Vec<DeviceId> = self
            .config
            .devices
            .iter()
            .map(|d| DeviceId::new(d.clone()))
            .collect();

        for device_id in devices {
            self.flags.stop_device = false;
            for test in &tests {
                self.run_test_file(&model_id, &device_id, test).await;
                if self.flags.stop_device || self.flags.stop_command {
                    break;
                }
            }
            if self.flags.stop_command {
                self.narrator.warning("Stopping the run");
                break;
            }
        }

        self.narrator.blank_line();
        if self.flags.failed {
            self.narrator.error("Testing failed");
        } else {
            self.narrator.info("Testing succeeded");
        }
        Ok(!self.flags.failed)
    }

    async fn run_test_file(&mut self, model_id: &ModelId, device_id: &DeviceId, test: &TestFile) {
        self.narrator.blank_line();
        self.narrator
            .info(&format!("Using {} test file {}", test.kind, test.name));

        let mut session = TestSession::new();
        debug!(session = session.id(), file = %test.name, device = %device_id, "test session created");

        // Fresh watchdogs and channel per file run, so a stray signal from
        // a previous session cannot surface here. The startup window opens
        // with the session itself and so covers bundling, descriptor
        // fetches, and the code push.
        let (wd_tx, mut wd_rx) = mpsc::unbounded_channel();
        let mut start_watchdog = Watchdog::new(
            SESSION_START_WATCHDOG,
            Duration::from_secs_f64(self.config.session_start_timeout),
            wd_tx.clone(),
        );
        let mut message_watchdog = Watchdog::new(
            TEST_MESSAGES_WATCHDOG,
            Duration::from_secs_f64(self.config.timeout + TEST_MESSAGE_SLACK_SECONDS),
            wd_tx,
        );
        if let Err(err) = start_watchdog.start() {
            self.handle_session_error(&mut session, TestError::Unclassified(err.to_string()));
            return;
        }

        // Agent-only: no device source configured and the file targets the
        // agent, so an offline device cannot block the run.
        let agent_only = test.kind == TestKind::Agent && self.config.device_file.is_none();

        let bundle = match self.bundler.bundle(test, session.id()) {
            Ok(bundle) => bundle,
            Err(err) => {
                self.handle_session_error(&mut session, TestError::Unclassified(err.to_string()));
                return;
            }
        };

        // Device preconditions.
        let device = match self.api.get_device(device_id).await {
            Ok(device) => device,
            Err(err) => {
                self.handle_session_error(&mut session, err.into());
                return;
            }
        };
        if device.model_id.as_str() != self.config.model_id {
            self.handle_session_error(
                &mut session,
                TestError::WrongModel(format!(
                    "Device {} is assigned to model {}, expected {}",
                    device.name, device.model_id, self.config.model_id
                )),
            );
            return;
        }
        if !agent_only && !device.is_online() {
            self.handle_session_error(
                &mut session,
                TestError::DevicePowerstate(device.powerstate.clone()),
            );
            return;
        }
        match self.api.get_model(model_id).await {
            Ok(model) => self.narrator.info(&format!(
                "Using device {} on model {}",
                device.name, model.name
            )),
            Err(err) => {
                self.handle_session_error(&mut session, err.into());
                return;
            }
        }
        if agent_only {
            self.narrator.info("Agent-only test, device code not deployed");
        }

        match session
            .start(&self.api, model_id, &bundle.device_code, &bundle.agent_code)
            .await
        {
            Ok(revision) => self.narrator.info(&format!(
                "Created code revision {}, restarting model",
                revision.version
            )),
            Err(err) => {
                self.handle_session_error(&mut session, err);
                return;
            }
        }

        let mut stream = LogStream::new(&self.api, device_id.clone());
        while !session.stop {
            tokio::select! {
                batch = stream.next_batch() => match batch {
                    Ok(Batch::Ready) => {
                        debug!(device = %device_id, "log stream connected, no data yet");
                    }
                    Ok(Batch::Records(records)) => {
                        for record in records {
                            match classify(&record, test.kind) {
                                Ok(event) => {
                                    let signals = session.apply(event);
                                    Self::process_signals(
                                        &self.narrator,
                                        &self.config,
                                        &mut self.flags,
                                        &mut session,
                                        signals,
                                        &mut start_watchdog,
                                        &mut message_watchdog,
                                    );
                                }
                                Err(err) => Self::handle_error(
                                    &self.narrator,
                                    &self.config,
                                    &mut self.flags,
                                    &mut session,
                                    err,
                                ),
                            }
                            if session.stop {
                                break;
                            }
                        }
                    }
                    Err(err) => Self::handle_error(
                        &self.narrator,
                        &self.config,
                        &mut self.flags,
                        &mut session,
                        err,
                    ),
                },
                Some(name) = wd_rx.recv() => {
                    let err = if name == SESSION_START_WATCHDOG {
                        TestError::SessionStartTimeout
                    } else {
                        TestError::SessionTestMessagesTimeout
                    };
                    Self::handle_error(
                        &self.narrator,
                        &self.config,
                        &mut self.flags,
                        &mut session,
                        err,
                    );
                }
            }
        }
        start_watchdog.stop();
        message_watchdog.stop();

        if session.received_result() {
            self.narrator.info(&format!(
                "Tests: {}, Assertions: {}, Failures: {}",
                session.tests, session.assertions, session.failures
            ));
        }
        debug!(session = session.id(), error = session.error, "test session done");
    }

    fn process_signals(
        narrator: &Narrator,
        config: &HarnessConfig,
        flags: &mut RunFlags,
        session: &mut TestSession,
        signals: Vec<SessionSignal>,
        start_watchdog: &mut Watchdog,
        message_watchdog: &mut Watchdog,
    ) {
        for signal in signals {
            match signal {
                SessionSignal::Message(severity, text) => narrator.narrate(severity, &text),
                SessionSignal::Started => {
                    start_watchdog.stop();
                    if let Err(err) = message_watchdog.reset() {
                        Self::handle_error(
                            narrator,
                            config,
                            flags,
                            session,
                            TestError::Unclassified(err.to_string()),
                        );
                    }
                }
                SessionSignal::TestMessage => {
                    // Liveness kick; only meaningful once the message
                    // watchdog is running (START arms it).
                    if message_watchdog.is_armed()
                        && let Err(err) = message_watchdog.reset()
                    {
                        Self::handle_error(
                            narrator,
                            config,
                            flags,
                            session,
                            TestError::Unclassified(err.to_string()),
                        );
                    }
                }
                SessionSignal::Result => message_watchdog.stop(),
                SessionSignal::Error(err) => {
                    Self::handle_error(narrator, config, flags, session, err);
                }
            }
        }
    }

    /// Route one error through narration and the stop-policy table.
    fn handle_error(
        narrator: &Narrator,
        config: &HarnessConfig,
        flags: &mut RunFlags,
        session: &mut TestSession,
        err: TestError,
    ) {
        match &err {
            // Test-scoped failure narration; the counters line follows.
            TestError::SessionFailed(message) => narrator.test(&format!("Failure: {message}")),
            _ => narrator.error(&err.to_string()),
        }

        flags.failed = true;
        session.error = true;

        let stop = err.stop_policy(config.stop_on_failure);
        debug!(?err, ?stop, "error routed through stop policy");
        if stop.stop_session {
            session.stop = true;
        }
        flags.stop_device |= stop.stop_device;
        flags.stop_command |= stop.stop_command;
    }

    fn handle_session_error(&mut self, session: &mut TestSession, err: TestError) {
        Self::handle_error(
            &self.narrator,
            &self.config,
            &mut self.flags,
            session,
            err,
        );
    }
}
