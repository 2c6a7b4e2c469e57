//! Build-service client boundary.
//!
//! The core talks to the cloud build/deploy service through the
//! [`BuildApi`] trait: six operations, no more. The HTTP implementation
//! lives in [`http`]; [`mock`] carries the scripted implementation the
//! tests drive.

pub mod http;
pub mod mock;

use rth_common::{DeviceDescriptor, DeviceId, LogRecord, ModelDescriptor, ModelId, Revision, TestError};
use thiserror::Error;

/// Errors the build-service client can produce.
///
/// `StaleCursor` and `PollTimeout` are recoverable by the log stream
/// (resubscribe and silent retry respectively); everything else is fatal
/// for the current session.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The log poll cursor has gone stale; resubscribe for a fresh one.
    #[error("Log poll cursor is stale")]
    StaleCursor,

    /// No data arrived within the long-poll window; poll again.
    #[error("Log poll timed out")]
    PollTimeout,

    /// The service answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(String),

    /// The service answered with a body we could not decode.
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl From<ApiError> for TestError {
    fn from(err: ApiError) -> Self {
        TestError::RemoteService(err.to_string())
    }
}

/// Opaque poll cursor for a device log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor(pub String);

impl LogCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One poll tick. `records: None` means the stream is connected but has
/// no data yet.
#[derive(Debug, Clone)]
pub struct LogPoll {
    pub records: Option<Vec<LogRecord>>,
    pub cursor: LogCursor,
}

/// The build service's operations as the core consumes them.
#[allow(async_fn_in_trait)]
pub trait BuildApi {
    /// Create a code revision for the model from device + agent source.
    async fn create_revision(
        &self,
        model_id: &ModelId,
        device_code: &str,
        agent_code: &str,
    ) -> Result<Revision, ApiError>;

    /// Restart all devices assigned to the model.
    async fn restart_model(&self, model_id: &ModelId) -> Result<(), ApiError>;

    /// Fetch a device descriptor.
    async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceDescriptor, ApiError>;

    /// Fetch a model descriptor.
    async fn get_model(&self, model_id: &ModelId) -> Result<ModelDescriptor, ApiError>;

    /// Open a log stream for the device, returning the initial poll cursor.
    async fn subscribe_logs(&self, device_id: &DeviceId) -> Result<LogCursor, ApiError>;

    /// Long-poll the log stream once.
    async fn poll_logs(&self, device_id: &DeviceId, cursor: &LogCursor)
    -> Result<LogPoll, ApiError>;
}
