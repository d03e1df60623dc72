//! Command API client

use async_trait::async_trait;
use ihc_config::ControllerConfig;
use ihc_core::{frames, DeviceKey};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{ControllerError, ControllerResult};
use crate::snapshot::Snapshot;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Requests the bridge sends to the controller
#[async_trait]
pub trait CommandApi: Send + Sync {
    /// Ask the controller to drive an output
    ///
    /// Success means the request was accepted, not that the output changed.
    async fn set_output(&self, key: DeviceKey, state: bool) -> ControllerResult<()>;

    /// Fetch the state of every active module
    async fn get_all(&self) -> ControllerResult<Snapshot>;
}

/// [`CommandApi`] over the controller's HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpCommandApi {
    client: Client,
    url: String,
    credentials: Option<(String, String)>,
    max_retries: u32,
    backoff: Duration,
}

impl HttpCommandApi {
    pub fn new(config: &ControllerConfig) -> ControllerResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.request_url(),
            credentials: config
                .credentials()
                .map(|(u, p)| (u.to_string(), p.to_string())),
            max_retries: config.max_retries,
            backoff: INITIAL_BACKOFF,
        })
    }

    /// Override the first retry delay
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }

    /// POST a request body, retrying gateway errors
    async fn post(&self, body: &Value) -> ControllerResult<Response> {
        let mut attempt = 0;
        loop {
            let mut request = self.client.post(&self.url).json(body);
            if let Some((username, password)) = &self.credentials {
                request = request.basic_auth(username, Some(password));
            }

            let response = request.send().await?;
            let status = response.status();
            if is_retryable(status) && attempt < self.max_retries {
                let delay = self.retry_delay(attempt);
                debug!(status = status.as_u16(), attempt, ?delay, "Retrying controller request");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Ok(response);
        }
    }
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn reject(response: Response) -> ControllerError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ControllerError::Status { status, body }
}

/// Request body for a single output write
pub fn set_output_body(key: DeviceKey, state: bool) -> Value {
    json!({
        "type": frames::SET_OUTPUT,
        "moduleNumber": key.module,
        "ioNumber": key.io,
        "state": state,
    })
}

#[async_trait]
impl CommandApi for HttpCommandApi {
    async fn set_output(&self, key: DeviceKey, state: bool) -> ControllerResult<()> {
        let response = self.post(&set_output_body(key, state)).await?;
        if response.status() == StatusCode::OK {
            debug!(device = %key, state, "Controller accepted setOutput");
            Ok(())
        } else {
            Err(reject(response).await)
        }
    }

    async fn get_all(&self) -> ControllerResult<Snapshot> {
        let response = self.post(&json!({ "type": frames::GET_ALL })).await?;
        if response.status() != StatusCode::OK {
            return Err(reject(response).await);
        }
        let body: Value = response.json().await?;
        Ok(Snapshot::from_value(body)?)
    }
}
