//! Reverse proxy in front of the Lambda runtime API.
//!
//! Every request is forwarded unchanged. Responses to
//! `invocation/next` gain the client-context header; responses to an
//! invocation's `response`/`error` post raise the completion signal.

pub mod handler;
pub mod paths;
pub mod signal;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::any;
use tokio::net::TcpListener;

use crate::errors::ProxyError;

pub use handler::{ProxyState, UpstreamClient, CLIENT_CONTEXT_HEADER};
pub use signal::{rendezvous, CompletionReceiver, CompletionSender};

pub fn router(state: Arc<ProxyState>) -> axum::Router {
    axum::Router::new()
        .fallback(any(handler::proxy_handler))
        .with_state(state)
        // Payloads pass through untouched, whatever their size.
        .layer(DefaultBodyLimit::disable())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind the local listener. Failure here is fatal to the sidecar.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ProxyError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ProxyError::Bind { addr, source })?;
    tracing::info!("secretsctx proxy listening on {}", addr);
    Ok(listener)
}

/// Serve until the process exits.
pub async fn serve(listener: TcpListener, state: Arc<ProxyState>) -> Result<(), ProxyError> {
    axum::serve(listener, router(state))
        .await
        .map_err(ProxyError::Serve)
}
