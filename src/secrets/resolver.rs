use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use super::{
    BackendKind, ContextHandle, ParameterStore, ResolvedContext, SecretReference, SecretStore,
    PARAMETER_BATCH_SIZE,
};
use crate::errors::ResolveError;

/// Concurrent secret-store lookups per resolution cycle.
pub const SECRET_WORKERS: usize = 5;

/// Resolves every declared reference against both backends and publishes
/// the result into a [`ContextHandle`], all or nothing.
pub struct Resolver {
    references: Vec<SecretReference>,
    parameters: Arc<dyn ParameterStore>,
    secrets: Arc<dyn SecretStore>,
    context: ContextHandle,
    workers: usize,
    last_fetched: Option<Instant>,
}

impl Resolver {
    pub fn new(
        references: Vec<SecretReference>,
        parameters: Arc<dyn ParameterStore>,
        secrets: Arc<dyn SecretStore>,
        context: ContextHandle,
    ) -> Self {
        Self {
            references,
            parameters,
            secrets,
            context,
            workers: SECRET_WORKERS,
            last_fetched: None,
        }
    }

    pub fn references(&self) -> &[SecretReference] {
        &self.references
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    pub fn last_fetched(&self) -> Option<Instant> {
        self.last_fetched
    }

    /// A zero interval means "never refresh".
    pub fn refresh_due(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        self.last_fetched
            .map_or(true, |fetched| fetched.elapsed() > interval)
    }

    /// Run one full resolution cycle. On error nothing is published and the
    /// previous context stays in effect.
    #[tracing::instrument(skip(self), fields(declared = self.references.len()))]
    pub async fn resolve(&mut self) -> Result<(), ResolveError> {
        let params = resolve_parameters(
            self.parameters.as_ref(),
            self.identifiers(BackendKind::ParameterStore),
        )
        .await?;

        let secrets = resolve_secrets(
            self.secrets.clone(),
            self.identifiers(BackendKind::SecretStore),
            self.workers,
        )
        .await?;

        // Both backends succeeded; only now do references get their values.
        for reference in &mut self.references {
            let source = match reference.backend {
                BackendKind::ParameterStore => &params,
                BackendKind::SecretStore => &secrets,
            };
            reference.value = source.get(&reference.identifier).cloned();
        }

        let context: ResolvedContext = self
            .references
            .iter()
            .filter_map(|r| Some((r.name.clone(), r.value.clone()?)))
            .collect();

        tracing::info!(
            parameters = params.len(),
            secrets = secrets.len(),
            "resolved context with {} entries",
            context.len()
        );

        self.context.replace(context).await;
        self.last_fetched = Some(Instant::now());
        Ok(())
    }

    /// Unique identifiers for one backend, in a stable order.
    fn identifiers(&self, backend: BackendKind) -> Vec<String> {
        self.references
            .iter()
            .filter(|r| r.backend == backend)
            .map(|r| r.identifier.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

async fn resolve_parameters(
    store: &dyn ParameterStore,
    names: Vec<String>,
) -> Result<HashMap<String, String>, ResolveError> {
    let mut resolved = HashMap::with_capacity(names.len());

    for batch in names.chunks(PARAMETER_BATCH_SIZE) {
        let result = store.get_parameters(batch).await?;
        if !result.invalid.is_empty() {
            return Err(ResolveError::InvalidParameters(result.invalid));
        }

        for name in batch {
            let value = result
                .values
                .get(name)
                .ok_or_else(|| ResolveError::MissingParameter(name.clone()))?;
            resolved.insert(name.clone(), value.clone());
        }
    }

    Ok(resolved)
}

/// Fan out over a bounded worker pool pulling from a pre-filled queue, fan
/// in through one collector. The first worker error aborts the rest.
async fn resolve_secrets(
    store: Arc<dyn SecretStore>,
    ids: Vec<String>,
    workers: usize,
) -> Result<HashMap<String, String>, ResolveError> {
    let total = ids.len();
    if total == 0 {
        return Ok(HashMap::new());
    }

    // Sized to hold every id, so filling it never waits.
    let (queue_tx, queue_rx) = mpsc::channel::<String>(total);
    for id in ids {
        queue_tx
            .send(id)
            .await
            .map_err(|e| ResolveError::Worker(e.to_string()))?;
    }
    drop(queue_tx);
    let queue_rx = Arc::new(Mutex::new(queue_rx));

    let (result_tx, mut result_rx) = mpsc::channel::<(String, String)>(total);

    let mut pool = JoinSet::new();
    for _ in 0..workers.min(total) {
        let store = store.clone();
        let queue_rx = queue_rx.clone();
        let result_tx = result_tx.clone();
        pool.spawn(secret_worker(store, queue_rx, result_tx));
    }
    drop(result_tx);

    while let Some(joined) = pool.join_next().await {
        let outcome = joined.map_err(|e| ResolveError::Worker(e.to_string()));
        if let Err(e) = outcome.and_then(|r| r) {
            pool.abort_all();
            tracing::warn!("secret resolution aborted: {}", e);
            return Err(e);
        }
    }

    let mut resolved = HashMap::with_capacity(total);
    for _ in 0..total {
        let (id, value) = result_rx
            .recv()
            .await
            .ok_or_else(|| ResolveError::Worker("result channel closed early".into()))?;
        resolved.insert(id, value);
    }
    Ok(resolved)
}

async fn secret_worker(
    store: Arc<dyn SecretStore>,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    results: mpsc::Sender<(String, String)>,
) -> Result<(), ResolveError> {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(id) = next else {
            return Ok(());
        };
        let value = store.get_secret_value(&id).await?.into_text(&id)?;
        results
            .send((id, value))
            .await
            .map_err(|e| ResolveError::Worker(e.to_string()))?;
    }
}
