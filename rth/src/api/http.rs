//! Thin JSON-over-HTTPS implementation of [`BuildApi`].
//!
//! Stateless request/response plumbing only; retry and recovery decisions
//! belong to the callers (the log stream resubscribes on stale cursors,
//! the session treats everything else as fatal).

use super::{ApiError, BuildApi, LogCursor, LogPoll};
use rth_common::{DeviceDescriptor, DeviceId, LogRecord, ModelDescriptor, ModelId, Revision};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Request timeout for plain (non-polling) calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-poll window. The service holds the request open until data
/// arrives or the window lapses; a lapse surfaces as the benign
/// [`ApiError::PollTimeout`].
const POLL_TIMEOUT: Duration = Duration::from_secs(40);

/// Error code the service uses for an expired poll token.
const STALE_TOKEN_CODE: &str = "InvalidLogToken";

pub struct HttpBuildApi {
    client: reqwest::Client,
    poll_client: reqwest::Client,
    base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RevisionEnvelope {
    revision: Revision,
}

#[derive(Debug, Deserialize)]
struct DeviceEnvelope {
    device: DeviceDescriptor,
}

#[derive(Debug, Deserialize)]
struct ModelEnvelope {
    model: ModelDescriptor,
}

#[derive(Debug, Deserialize)]
struct LogsSubscription {
    poll_token: String,
}

#[derive(Debug, Deserialize)]
struct LogsBatch {
    #[serde(default)]
    logs: Vec<LogRecord>,
    poll_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message_short: String,
}

impl HttpBuildApi {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let poll_client = reqwest::Client::builder()
            .timeout(POLL_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let base = base.into();
        Ok(Self {
            client,
            poll_client,
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    /// Decode a non-success response into an [`ApiError`].
    async fn error_from_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        classify_error(status, &body)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    fn network(err: reqwest::Error) -> ApiError {
        ApiError::Network(err.to_string())
    }
}

/// Map a non-success status + body to an [`ApiError`], distinguishing the
/// stale-token code the log stream recovers from.
fn classify_error(status: u16, body: &str) -> ApiError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(error) = envelope.error
    {
        if error.code == STALE_TOKEN_CODE {
            return ApiError::StaleCursor;
        }
        let message = if error.message_short.is_empty() {
            error.code
        } else {
            error.message_short
        };
        return ApiError::Http { status, message };
    }
    ApiError::Http {
        status,
        message: body.to_string(),
    }
}

impl BuildApi for HttpBuildApi {
    async fn create_revision(
        &self,
        model_id: &ModelId,
        device_code: &str,
        agent_code: &str,
    ) -> Result<Revision, ApiError> {
        debug!(model = %model_id, "creating code revision");
        let response = self
            .client
            .post(self.url(&format!("models/{model_id}/revisions")))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "device_code": device_code,
                "agent_code": agent_code,
            }))
            .send()
            .await
            .map_err(Self::network)?;
        let envelope: RevisionEnvelope = Self::decode(response).await?;
        Ok(envelope.revision)
    }

    async fn restart_model(&self, model_id: &ModelId) -> Result<(), ApiError> {
        debug!(model = %model_id, "restarting model");
        let response = self
            .client
            .post(self.url(&format!("models/{model_id}/restart")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::network)?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    async fn get_device(&self, device_id: &DeviceId) -> Result<DeviceDescriptor, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("devices/{device_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::network)?;
        let envelope: DeviceEnvelope = Self::decode(response).await?;
        Ok(envelope.device)
    }

    async fn get_model(&self, model_id: &ModelId) -> Result<ModelDescriptor, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("models/{model_id}")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::network)?;
        let envelope: ModelEnvelope = Self::decode(response).await?;
        Ok(envelope.model)
    }

    async fn subscribe_logs(&self, device_id: &DeviceId) -> Result<LogCursor, ApiError> {
        debug!(device = %device_id, "opening device log stream");
        let response = self
            .client
            .post(self.url(&format!("devices/{device_id}/logs")))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::network)?;
        let subscription: LogsSubscription = Self::decode(response).await?;
        Ok(LogCursor(subscription.poll_token))
    }

    async fn poll_logs(
        &self,
        device_id: &DeviceId,
        cursor: &LogCursor,
    ) -> Result<LogPoll, ApiError> {
        let response = self
            .poll_client
            .get(self.url(&format!("devices/{device_id}/logs")))
            .query(&[("poll_token", cursor.as_str())])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::PollTimeout
                } else {
                    Self::network(e)
                }
            })?;

        // 204: connected, no data within the window yet.
        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(LogPoll {
                records: None,
                cursor: cursor.clone(),
            });
        }

        let batch: LogsBatch = Self::decode(response).await?;
        Ok(LogPoll {
            records: Some(batch.logs),
            cursor: LogCursor(batch.poll_token),
        })
    }
}
