use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{Credentials, JsonClient};
use crate::errors::ResolveError;
use crate::secrets::{SecretStore, SecretValue};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueRequest<'a> {
    secret_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetSecretValueResponse {
    secret_string: Option<String>,
    /// Base64 on the wire.
    secret_binary: Option<String>,
}

/// Secrets Manager, one `GetSecretValue` per identifier.
#[derive(Debug, Clone)]
pub struct SecretsManagerClient {
    inner: JsonClient,
}

impl SecretsManagerClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        region: &str,
        credentials: Credentials,
    ) -> Self {
        Self {
            inner: JsonClient::new(http, endpoint, region, "secretsmanager", credentials),
        }
    }
}

#[async_trait]
impl SecretStore for SecretsManagerClient {
    async fn get_secret_value(&self, id: &str) -> Result<SecretValue, ResolveError> {
        let fail = |reason: String| ResolveError::SecretBackend {
            id: id.to_string(),
            reason,
        };

        let resp: GetSecretValueResponse = self
            .inner
            .call(
                "secretsmanager.GetSecretValue",
                &GetSecretValueRequest { secret_id: id },
            )
            .await
            .map_err(|e| fail(e.to_string()))?;

        let binary = resp
            .secret_binary
            .map(|b| base64::engine::general_purpose::STANDARD.decode(b))
            .transpose()
            .map_err(|e| fail(format!("SecretBinary is not base64: {}", e)))?;

        Ok(SecretValue {
            string: resp.secret_string,
            binary,
        })
    }
}
