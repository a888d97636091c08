//! Client for the Lambda Extensions API.
//!
//! Talks to the real runtime API address (never the proxy): register once,
//! then block on `event/next` for each lifecycle event.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::errors::LifecycleError;

const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Invoke,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    #[serde(default)]
    pub deadline_ms: u64,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub invoked_function_arn: Option<String>,
    #[serde(default)]
    pub shutdown_reason: Option<String>,
}

/// The two calls the coordinator needs from the platform.
#[async_trait]
pub trait LifecycleApi: Send + Sync {
    /// Returns the registration identifier.
    async fn register(&mut self, name: &str) -> Result<String, LifecycleError>;
    /// Blocks until the platform has the next event for us.
    async fn next_event(&mut self) -> Result<Event, LifecycleError>;
}

#[derive(Debug, Clone)]
pub struct ExtensionClient {
    http: reqwest::Client,
    base_url: String,
    extension_id: Option<String>,
}

impl ExtensionClient {
    /// `runtime_api` is the bare `host:port` from `AWS_LAMBDA_RUNTIME_API`.
    pub fn new(runtime_api: &str) -> Result<Self, LifecycleError> {
        // No request timeout: `event/next` legitimately blocks until the
        // next invocation arrives.
        let http = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            http,
            base_url: format!("http://{}/2020-01-01/extension", runtime_api),
            extension_id: None,
        })
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, LifecycleError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LifecycleError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl LifecycleApi for ExtensionClient {
    async fn register(&mut self, name: &str) -> Result<String, LifecycleError> {
        let resp = self
            .http
            .post(format!("{}/register", self.base_url))
            .header(EXTENSION_NAME_HEADER, name)
            .json(&json!({ "events": ["INVOKE", "SHUTDOWN"] }))
            .send()
            .await?;
        let resp = check(resp).await?;

        let id = resp
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(LifecycleError::MissingIdentifier)?
            .to_string();

        tracing::info!(extension = name, "registered with extensions API");
        self.extension_id = Some(id.clone());
        Ok(id)
    }

    async fn next_event(&mut self) -> Result<Event, LifecycleError> {
        let id = self
            .extension_id
            .as_deref()
            .ok_or(LifecycleError::MissingIdentifier)?;

        let resp = self
            .http
            .get(format!("{}/event/next", self.base_url))
            .header(EXTENSION_ID_HEADER, id)
            .send()
            .await?;
        let event: Event = check(resp).await?.json().await?;

        tracing::debug!(event = ?event.event_type, request_id = ?event.request_id, "lifecycle event");
        Ok(event)
    }
}
