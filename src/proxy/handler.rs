use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::Response;

use super::paths::{self, RuntimePath};
use super::signal::CompletionSender;
use crate::errors::ProxyError;
use crate::secrets::ContextHandle;

/// Header the runtime reads the client context from.
pub const CLIENT_CONTEXT_HEADER: &str = "lambda-runtime-client-context";

/// Shared state for the proxy handler.
pub struct ProxyState {
    pub upstream: UpstreamClient,
    pub context: ContextHandle,
    pub completions: CompletionSender,
}

/// Forwards requests to the real runtime API.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    /// `runtime_api` is the bare `host:port` the runtime originally used.
    pub fn new(runtime_api: &str) -> Result<Self, ProxyError> {
        // No timeout: `invocation/next` is a long poll.
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: format!("http://{}", runtime_api),
        })
    }

    pub async fn forward(
        &self,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        self.client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Upstream request failed: {}", e);
                ProxyError::Upstream(e.to_string())
            })
    }
}

/// Hop-by-hop headers plus the ones the HTTP stack recomputes.
fn is_passthrough(name: &HeaderName) -> bool {
    !matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "upgrade"
            | "host"
            | "content-length"
            | "transfer-encoding"
    )
}

fn passthrough_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| is_passthrough(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Catch-all handler: forward, then apply the two response-time behaviours.
#[tracing::instrument(skip(state, headers, body), fields(req_id = %uuid::Uuid::new_v4()))]
pub async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProxyError> {
    let start = Instant::now();

    let upstream_resp = state
        .upstream
        .forward(method, &uri, passthrough_headers(&headers), body)
        .await?;

    let status = upstream_resp.status();
    let mut resp_headers = passthrough_headers(upstream_resp.headers());
    let resp_body = upstream_resp
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(format!("reading upstream body: {}", e)))?;

    match paths::classify(uri.path()) {
        RuntimePath::Completion {
            request_id,
            outcome,
        } => {
            tracing::debug!(request_id, ?outcome, "invocation finished, signalling");
            if state.completions.notify().await.is_err() {
                tracing::warn!("no coordinator listening for completion of {}", request_id);
            }
        }
        RuntimePath::NextInvocation => {
            let context = state.context.current().await;
            // Secret values may hold any UTF-8; header values allow the raw bytes.
            let value = HeaderValue::from_bytes(context.to_client_context().as_bytes())
                .map_err(|e| ProxyError::Internal(format!("client context header: {}", e)))?;
            resp_headers.insert(HeaderName::from_static(CLIENT_CONTEXT_HEADER), value);
            tracing::debug!(entries = context.len(), "injected client context");
        }
        RuntimePath::Other => {}
    }

    tracing::debug!(
        status = status.as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "proxied"
    );

    let mut response = Response::new(Body::from(resp_body));
    *response.status_mut() = status;
    *response.headers_mut() = resp_headers;
    Ok(response)
}
