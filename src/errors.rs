use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Problems with the declared environment or startup options.
/// All of these are raised before any interception is established.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("only {{aws-sm}} and {{aws-ssm}} supported but you provided {name}={value}")]
    UnknownMarker { name: String, value: String },

    #[error("{name} declares an empty output name")]
    EmptyName { name: String },

    #[error("invalid refresh frequency '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("{var} is not set")]
    MissingVar { var: &'static str },

    #[error("invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("replacement '{replace}' must be exactly as long as '{search}'")]
    LengthMismatch { search: String, replace: String },

    #[error("search pattern must be non-empty and differ from its replacement")]
    InvalidPattern,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("opening maps for pid {pid}: {source}")]
    MapsUnreadable { pid: i32, source: std::io::Error },

    #[error("parsing maps line '{line}': {reason}")]
    MapsParse { line: String, reason: String },

    #[error("reading memory at {addr:#x}: {source}")]
    Read { addr: u64, source: std::io::Error },

    #[error("writing memory at {addr:#x}: {source}")]
    Write { addr: u64, source: std::io::Error },

    #[error("transferred {actual} bytes at {addr:#x}, expected {expected}")]
    TransferMismatch {
        addr: u64,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("getting parameters: {0}")]
    ParameterBackend(String),

    #[error("invalid parameters: {}", .0.join(", "))]
    InvalidParameters(Vec<String>),

    #[error("parameter {0} missing from backend response")]
    MissingParameter(String),

    #[error("getting secret {id}: {reason}")]
    SecretBackend { id: String, reason: String },

    #[error("secret {0} has neither a string nor a binary value")]
    EmptySecret(String),

    #[error("secret worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("extension API request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("extension API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("register response is missing the Lambda-Extension-Identifier header")]
    MissingIdentifier,

    #[error("proxy stopped signalling invocation completions")]
    CompletionClosed,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("binding proxy listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("proxy server stopped: {0}")]
    Serve(std::io::Error),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Every fatal condition the sidecar can hit. Components return these
/// and only `main` decides to terminate.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ProxyError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_failed"),
            _ => {
                tracing::error!("Proxy error: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_server_error")
            }
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
