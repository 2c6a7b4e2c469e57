//! Scripted in-memory [`BuildApi`] for tests.
//!
//! No sockets: poll behavior is a queue of [`PollStep`]s consumed one per
//! poll call. Scripted record messages may contain the `{session}`
//! placeholder, which is substituted with the session id extracted from
//! the most recently pushed code revision — the same way a real device
//! echoes back the id bound into its bundle.

use super::{ApiError, BuildApi, LogCursor, LogPoll};
use rth_common::{DeviceDescriptor, DeviceId, LogRecord, ModelDescriptor, ModelId, Revision};
use std::collections::{HashMap, VecDeque};
use std::sync::{LazyLock, Mutex, MutexGuard};
use std::time::Duration;

static SESSION_BINDING: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"IMP_TEST_SESSION_ID\s*<-\s*"([A-Za-z0-9]+)""#).expect("valid regex")
});

/// One scripted poll outcome.
#[derive(Debug, Clone)]
pub enum PollStep {
    /// Deliver a batch of records.
    Records(Vec<LogRecord>),
    /// Connected, no data yet (the `ready` tick).
    Empty,
    /// Stale cursor; the stream must resubscribe.
    Stale,
    /// Benign long-poll timeout; the stream must retry silently.
    Timeout,
    /// Fatal transport error; the stream must end.
    Fatal(String),
}

/// A revision pushed through the mock.
#[derive(Debug, Clone)]
pub struct PushedRevision {
    pub model_id: ModelId,
    pub device_code: String,
    pub agent_code: String,
}

#[derive(Default)]
struct Inner {
    devices: HashMap<String, DeviceDescriptor>,
    model_name: String,
    polls: VecDeque<PollStep>,
    revisions: Vec<PushedRevision>,
    restarts: Vec<ModelId>,
    subscribe_count: u32,
    next_version: u64,
    sessions: Vec<String>,
    fail_create_revision: Option<String>,
    fail_restart: Option<String>,
    create_revision_delay: Option<Duration>,
}

pub struct MockBuildApi {
    inner: Mutex<Inner>,
}

impl MockBuildApi {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                model_name: model_name.into(),
                next_version: 1,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a device descriptor under `device_id`.
    pub fn add_device(
        &self,
        device_id: &str,
        model_id: &str,
        powerstate: &str,
        name: &str,
    ) -> &Self {
        self.lock().devices.insert(
            device_id.to_string(),
            DeviceDescriptor {
                model_id: ModelId::new(model_id),
                powerstate: powerstate.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn push_poll(&self, step: PollStep) -> &Self {
        self.lock().polls.push_back(step);
        self
    }

    pub fn push_records(&self, records: Vec<LogRecord>) -> &Self {
        self.push_poll(PollStep::Records(records))
    }

    pub fn push_empty(&self) -> &Self {
        self.push_poll(PollStep::Empty)
    }

    /// Make the next `create_revision` call fail with an HTTP 500.
    pub fn fail_create_revision(&self, message: &str) -> &Self {
        self.lock().fail_create_revision = Some(message.to_string());
        self
    }

    /// Make the next `restart_model` call fail with an HTTP 500.
    pub fn fail_restart(&self, message: &str) -> &Self {
        self.lock().fail_restart = Some(message.to_string());
        self
    }

    /// Delay every `create_revision` call, for timing tests.
    pub fn delay_create_revision(&self, delay: Duration) -> &Self {
        self.lock().create_revision_delay = Some(delay);
        self
    }

    /// Revisions pushed so far.
    pub fn revisions(&self) -> Vec<PushedRevision> {
        self.lock().revisions.clone()
    }

    /// Models restarted so far.
    pub fn restarts(&self) -> Vec<ModelId> {
        self.lock().restarts.clone()
    }

    /// How many times a log stream was (re)opened.
    pub fn subscribe_count(&self) -> u32 {
        self.lock().subscribe_count
    }

    /// Session ids extracted from pushed revisions, in push order.
    pub fn sessions(&self) -> Vec<String> {
        self.lock().sessions.clone()
    }

    fn substitute_session(inner: &Inner, records: Vec<LogRecord>) -> Vec<LogRecord> {
        let session = inner.sessions.last().cloned().unwrap_or_default();
        records
            .into_iter()
            .map(|record| LogRecord {
                record_type: record.record_type,
                message: record.message.replace("{session}", &session),
            })
            .collect()
    }
}

impl BuildApi for MockBuildApi {
    async fn create_revision(
        &self,
        model_id: &ModelId,
        device_code: &str,
        agent_code: &str,
    ) -> Result<Revision, ApiError> {
        let delay = self.lock().create_revision_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        if let Some(message) = inner.fail_create_revision.take() {
            return Err(ApiError::Http {
                status: 500,
                message,
            });
        }
        for code in [device_code, agent_code] {
            if let Some(capture) = SESSION_BINDING.captures(code) {
                inner.sessions.push(capture[1].to_string());
                break;
            }
        }
        inner.revisions.push(PushedRevision {
            model_id: model_id.clone(),
            device_code: device_code.to_string(),
            agent_code: agent_code.to_string(),
        });
        let version = inner.next_version;
        inner.next_version += 1;
        Ok(Revision {
            version,
            created_at: chrono::Utc::now(),
        })
    }

    async fn restart_model(&self, model_id: &ModelId) -> Result<(), ApiError> {
        let mut inner = self.lock();
        if let Some(message) = inner.fail_restart.take() {
            return Err(ApiError::Http {
                status: 500,
                message,
            });
        }
        inner.restarts.push(model_id.clone());
        Ok(())
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceDescriptor, ApiError> {
        self.lock()
            .devices
            .get(device_id.as_str())
            .cloned()
            .ok_or_else(|| ApiError::Http {
                status: 404,
                message: format!("device {device_id} not found"),
            })
    }

    async fn get_model(&self, _model_id: &ModelId) -> Result<ModelDescriptor, ApiError> {
        Ok(ModelDescriptor {
            name: self.lock().model_name.clone(),
        })
    }

    async fn subscribe_logs(&self, _device_id: &DeviceId) -> Result<LogCursor, ApiError> {
        let mut inner = self.lock();
        inner.subscribe_count += 1;
        Ok(LogCursor(format!("cursor-{}", inner.subscribe_count)))
    }

    async fn poll_logs(
        &self,
        _device_id: &DeviceId,
        cursor: &LogCursor,
    ) -> Result<LogPoll, ApiError> {
        // Keep scripted streams from busy-spinning the scheduler loop.
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut inner = self.lock();
        let step = inner
            .polls
            .pop_front()
            .unwrap_or_else(|| PollStep::Fatal("mock poll script exhausted".to_string()));
        match step {
            PollStep::Records(records) => {
                let records = Self::substitute_session(&inner, records);
                Ok(LogPoll {
                    records: Some(records),
                    cursor: cursor.clone(),
                })
            }
            PollStep::Empty => Ok(LogPoll {
                records: None,
                cursor: cursor.clone(),
            }),
            PollStep::Stale => Err(ApiError::StaleCursor),
            PollStep::Timeout => Err(ApiError::PollTimeout),
            PollStep::Fatal(message) => Err(ApiError::Network(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_id_is_extracted_from_pushed_code() {
        let api = MockBuildApi::new("test model");
        let code = "IMP_TEST_SESSION_ID <- \"ab12cd34\";\nserver.log(\"hi\");";
        api.create_revision(&ModelId::new("m1"), code, "")
            .await
            .unwrap();
        assert_eq!(api.sessions(), vec!["ab12cd34".to_string()]);
    }

    #[tokio::test]
    async fn scripted_records_substitute_session_placeholder() {
        let api = MockBuildApi::new("test model");
        let code = "IMP_TEST_SESSION_ID <- \"ab12cd34\";";
        api.create_revision(&ModelId::new("m1"), code, "")
            .await
            .unwrap();
        api.push_records(vec![LogRecord::new(
            "server.log",
            r#"__IMPUNIT__{"session":"{session}","type":"START","message":"go"}"#,
        )]);

        let poll = api
            .poll_logs(&DeviceId::new("d1"), &LogCursor("c".to_string()))
            .await
            .unwrap();
        let records = poll.records.unwrap();
        assert!(records[0].message.contains("\"session\":\"ab12cd34\""));
    }

    #[tokio::test]
    async fn exhausted_script_is_a_fatal_error() {
        let api = MockBuildApi::new("test model");
        let err = api
            .poll_logs(&DeviceId::new("d1"), &LogCursor("c".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
