//! Secret and parameter declarations and their resolution.
//!
//! Declarations live in the environment as
//! `SECRETSCTX_<NAME>={aws-ssm}<parameter name>` or
//! `SECRETSCTX_<NAME>={aws-sm}<secret id or ARN>`.

pub mod context;
pub mod resolver;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::{ConfigError, ResolveError};

pub use context::{ContextHandle, ResolvedContext};
pub use resolver::Resolver;

pub const ENV_PREFIX: &str = "SECRETSCTX_";
pub const PARAMETER_MARKER: &str = "{aws-ssm}";
pub const SECRET_MARKER: &str = "{aws-sm}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    ParameterStore,
    SecretStore,
}

/// One declared value. `value` stays `None` until a resolution cycle
/// has succeeded as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub backend: BackendKind,
    pub identifier: String,
    pub value: Option<String>,
}

impl SecretReference {
    /// Parse one environment entry. Returns `Ok(None)` for variables that
    /// don't carry the reserved prefix.
    pub fn parse(var: &str, value: &str) -> Result<Option<Self>, ConfigError> {
        let Some(name) = var.strip_prefix(ENV_PREFIX) else {
            return Ok(None);
        };
        if name.is_empty() {
            return Err(ConfigError::EmptyName {
                name: var.to_string(),
            });
        }

        let (backend, identifier) = if let Some(id) = value.strip_prefix(SECRET_MARKER) {
            (BackendKind::SecretStore, id)
        } else if let Some(id) = value.strip_prefix(PARAMETER_MARKER) {
            (BackendKind::ParameterStore, id)
        } else {
            return Err(ConfigError::UnknownMarker {
                name: var.to_string(),
                value: value.to_string(),
            });
        };

        Ok(Some(Self {
            name: name.to_string(),
            backend,
            identifier: identifier.to_string(),
            value: None,
        }))
    }
}

/// Collect every declaration from `vars`, sorted by output name.
pub fn parse_declarations<I, K, V>(vars: I) -> Result<Vec<SecretReference>, ConfigError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut refs = Vec::new();
    for (k, v) in vars {
        if let Some(r) = SecretReference::parse(k.as_ref(), v.as_ref())? {
            refs.push(r);
        }
    }
    refs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(refs)
}

/// Declarations from this process's environment. Variables whose name or
/// value is not valid UTF-8 can't be declarations and are skipped.
pub fn declarations_from_env() -> Result<Vec<SecretReference>, ConfigError> {
    parse_declarations(std::env::vars_os().filter_map(|(k, v)| {
        Some((k.into_string().ok()?, v.into_string().ok()?))
    }))
}

/// Result of one parameter-store batch call.
#[derive(Debug, Clone, Default)]
pub struct ParameterBatch {
    /// Requested identifier -> decrypted value.
    pub values: HashMap<String, String>,
    /// Identifiers the backend rejected.
    pub invalid: Vec<String>,
}

/// Maximum identifiers per `get_parameters` call.
pub const PARAMETER_BATCH_SIZE: usize = 10;

#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Look up at most [`PARAMETER_BATCH_SIZE`] parameters in one call.
    async fn get_parameters(&self, names: &[String]) -> Result<ParameterBatch, ResolveError>;
}

/// Raw secret payload. At least one side is normally present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretValue {
    pub string: Option<String>,
    pub binary: Option<Vec<u8>>,
}

impl SecretValue {
    /// Prefer the string form; fall back to the binary form as text.
    pub fn into_text(self, id: &str) -> Result<String, ResolveError> {
        match (self.string, self.binary) {
            (Some(s), _) => Ok(s),
            (None, Some(b)) => Ok(String::from_utf8_lossy(&b).into_owned()),
            (None, None) => Err(ResolveError::EmptySecret(id.to_string())),
        }
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret_value(&self, id: &str) -> Result<SecretValue, ResolveError>;
}
