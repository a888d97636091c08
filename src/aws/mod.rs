//! Minimal clients for the two AWS backends the resolver talks to.
//!
//! Both services speak the AWS JSON 1.1 protocol: a signed `POST /` with an
//! `X-Amz-Target` header naming the operation.

pub mod secrets_manager;
pub mod sigv4;
pub mod ssm;

use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use secrets_manager::SecretsManagerClient;
pub use ssm::SsmClient;

#[derive(Clone, Default)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AwsError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{kind} ({status}): {message}")]
    Service {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("signing failed: {0}")]
    Signing(#[from] anyhow::Error),

    #[error("decoding response: {0}")]
    Decode(String),
}

/// Error document returned by JSON-protocol services.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Signed JSON 1.1 transport shared by the service clients.
#[derive(Debug, Clone)]
pub struct JsonClient {
    http: reqwest::Client,
    endpoint: String,
    region: String,
    service: &'static str,
    credentials: Credentials,
}

impl JsonClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        region: &str,
        service: &'static str,
        credentials: Credentials,
    ) -> Self {
        let endpoint =
            endpoint.unwrap_or_else(|| format!("https://{}.{}.amazonaws.com/", service, region));
        Self {
            http,
            endpoint,
            region: region.to_string(),
            service,
            credentials,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call<Req, Resp>(&self, target: &str, request: &Req) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(request).map_err(|e| AwsError::Decode(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-amz-json-1.1"),
        );
        headers.insert(
            "x-amz-target",
            HeaderValue::from_str(target).map_err(|e| AwsError::Signing(e.into()))?,
        );
        sigv4::sign_request(
            "POST",
            &self.endpoint,
            &mut headers,
            &body,
            &self.credentials,
            sigv4::Scope {
                region: &self.region,
                service: self.service,
            },
        )?;

        let resp = self
            .http
            .post(&self.endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let err: ErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
            // "com.amazonaws.ssm#ParameterNotFound" -> "ParameterNotFound"
            let kind = err.kind.rsplit('#').next().unwrap_or_default().to_string();
            return Err(AwsError::Service {
                status: status.as_u16(),
                kind: if kind.is_empty() { "UnknownError".into() } else { kind },
                message: err.message,
            });
        }

        serde_json::from_slice(&bytes).map_err(|e| AwsError::Decode(e.to_string()))
    }
}
