use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Credentials, JsonClient};
use crate::errors::ResolveError;
use crate::secrets::{ParameterBatch, ParameterStore};

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetParametersRequest<'a> {
    names: &'a [String],
    with_decryption: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParametersResponse {
    #[serde(default)]
    parameters: Vec<Parameter>,
    #[serde(default)]
    invalid_parameters: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter {
    name: String,
    #[serde(rename = "ARN", default)]
    arn: Option<String>,
    /// `:version` or `:label` when the request named one.
    #[serde(default)]
    selector: Option<String>,
    value: String,
}

impl Parameter {
    /// Whether `requested` is how this parameter was asked for.
    fn answers(&self, requested: &str) -> bool {
        let selector = self.selector.as_deref().unwrap_or("");
        let matches = |base: &str| {
            requested == base
                || (!selector.is_empty()
                    && requested.strip_prefix(base) == Some(selector))
        };
        matches(&self.name) || self.arn.as_deref().is_some_and(matches)
    }
}

/// SSM Parameter Store, `GetParameters` with decryption.
#[derive(Debug, Clone)]
pub struct SsmClient {
    inner: JsonClient,
}

impl SsmClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: Option<String>,
        region: &str,
        credentials: Credentials,
    ) -> Self {
        Self {
            inner: JsonClient::new(http, endpoint, region, "ssm", credentials),
        }
    }
}

#[async_trait]
impl ParameterStore for SsmClient {
    async fn get_parameters(&self, names: &[String]) -> Result<ParameterBatch, ResolveError> {
        let resp: GetParametersResponse = self
            .inner
            .call(
                "AmazonSSM.GetParameters",
                &GetParametersRequest {
                    names,
                    with_decryption: true,
                },
            )
            .await
            .map_err(|e| ResolveError::ParameterBackend(e.to_string()))?;

        // Callers may declare a parameter by name or by ARN, optionally with
        // a `:version` or `:label` selector. The response carries the bare
        // name, the ARN and the selector separately, so key each value by
        // whichever form was asked for.
        let mut batch = ParameterBatch {
            invalid: resp.invalid_parameters,
            ..Default::default()
        };
        for param in resp.parameters {
            let requested = names.iter().find(|n| param.answers(n));
            let key = requested.cloned().unwrap_or(param.name);
            batch.values.insert(key, param.value);
        }

        tracing::debug!(
            requested = names.len(),
            returned = batch.values.len(),
            invalid = batch.invalid.len(),
            "GetParameters"
        );
        Ok(batch)
    }
}
