//! The resolved-context snapshot shared between the resolver and the proxy.
//!
//! Readers take an `Arc` to the current snapshot; the resolver swaps in a
//! whole new snapshot. Nobody ever sees a half-built mapping.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;

/// Declared name -> resolved value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedContext(BTreeMap<String, String>);

impl ResolvedContext {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// `{"env": {...}}`, the client-context document handed to the runtime.
    pub fn to_client_context(&self) -> String {
        json!({ "env": self }).to_string()
    }
}

impl FromIterator<(String, String)> for ResolvedContext {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Shared, cheaply-cloneable handle to the current snapshot.
#[derive(Debug, Clone, Default)]
pub struct ContextHandle(Arc<RwLock<Arc<ResolvedContext>>>);

impl ContextHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot current at the moment of the call.
    pub async fn current(&self) -> Arc<ResolvedContext> {
        self.0.read().await.clone()
    }

    /// Replace the whole snapshot. Previous snapshots stay valid for anyone
    /// still holding them but are never merged into the new one.
    pub async fn replace(&self, context: ResolvedContext) {
        *self.0.write().await = Arc::new(context);
    }
}
