//! Lifecycle coordinator.
//!
//! Drives the extension through its states:
//!
//! 1. `Initializing`: resolve every declaration once, then register.
//! 2. `WaitingForEvent`: block on the next lifecycle event.
//! 3. `WaitingForInvocationDone`: consume exactly one completion signal
//!    from the proxy.
//! 4. `MaybeRefreshing`: re-resolve if the refresh interval has elapsed.
//!
//! Refreshes only ever happen between an invocation's completion and the
//! next event, so the proxy never reads a context that is being replaced
//! mid-invocation.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{LifecycleError, SidecarError};
use crate::extension::{EventType, LifecycleApi};
use crate::proxy::CompletionReceiver;
use crate::secrets::Resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initializing,
    WaitingForEvent,
    WaitingForInvocationDone,
    MaybeRefreshing,
    /// The platform sent SHUTDOWN.
    Stopped,
}

pub struct Coordinator<L> {
    resolver: Resolver,
    lifecycle: L,
    completions: CompletionReceiver,
    extension_name: String,
    refresh_interval: Duration,
    tolerate_refresh_errors: bool,
    state: State,
}

impl<L: LifecycleApi> Coordinator<L> {
    pub fn new(
        resolver: Resolver,
        lifecycle: L,
        completions: CompletionReceiver,
        extension_name: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            lifecycle,
            completions,
            extension_name: extension_name.into(),
            refresh_interval: Duration::ZERO,
            tolerate_refresh_errors: false,
            state: State::Initializing,
        }
    }

    /// Zero (the default) resolves once and never again.
    pub fn refresh_every(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Off by default: a failed refresh is fatal.
    pub fn tolerate_refresh_errors(mut self, tolerate: bool) -> Self {
        self.tolerate_refresh_errors = tolerate;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Run until SHUTDOWN or the first fatal error.
    pub async fn run(&mut self) -> Result<(), SidecarError> {
        while self.step().await? != State::Stopped {}
        Ok(())
    }

    /// Perform one transition and return the new state.
    pub async fn step(&mut self) -> Result<State, SidecarError> {
        let next = match self.state {
            State::Initializing => {
                self.resolver.resolve().await?;
                let id = self.lifecycle.register(&self.extension_name).await?;
                info!(
                    extension = %self.extension_name,
                    declared = self.resolver.references().len(),
                    "extension ready (registration {})",
                    id
                );
                State::WaitingForEvent
            }
            State::WaitingForEvent => {
                let event = self.lifecycle.next_event().await?;
                match event.event_type {
                    EventType::Invoke => {
                        debug!(request_id = ?event.request_id, "invocation started");
                        State::WaitingForInvocationDone
                    }
                    EventType::Shutdown => {
                        info!(reason = ?event.shutdown_reason, "shutdown requested");
                        State::Stopped
                    }
                }
            }
            State::WaitingForInvocationDone => {
                self.completions
                    .wait()
                    .await
                    .ok_or(LifecycleError::CompletionClosed)?;
                State::MaybeRefreshing
            }
            State::MaybeRefreshing => {
                self.maybe_refresh().await?;
                State::WaitingForEvent
            }
            State::Stopped => State::Stopped,
        };

        self.state = next;
        Ok(next)
    }

    async fn maybe_refresh(&mut self) -> Result<(), SidecarError> {
        if !self.resolver.refresh_due(self.refresh_interval) {
            return Ok(());
        }

        debug!("refresh interval elapsed, re-resolving");
        match self.resolver.resolve().await {
            Ok(()) => Ok(()),
            Err(e) if self.tolerate_refresh_errors => {
                warn!("refresh failed, keeping previous context: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResolveError;
    use crate::extension::Event;
    use crate::proxy::rendezvous;
    use crate::secrets::{
        parse_declarations, ContextHandle, ParameterBatch, ParameterStore, SecretStore, SecretValue,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Each call answers `<name>-<call number>`; calls from `fail_from`
    /// onwards fail.
    #[derive(Default)]
    struct CountingParameters {
        calls: AtomicUsize,
        fail_from: Option<usize>,
    }

    #[async_trait]
    impl ParameterStore for CountingParameters {
        async fn get_parameters(&self, names: &[String]) -> Result<ParameterBatch, ResolveError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_from.is_some_and(|from| call >= from) {
                return Err(ResolveError::ParameterBackend("ThrottlingException".into()));
            }
            Ok(ParameterBatch {
                values: names
                    .iter()
                    .map(|n| (n.clone(), format!("{}-{}", n, call)))
                    .collect(),
                invalid: Vec::new(),
            })
        }
    }

    struct NoSecrets;

    #[async_trait]
    impl SecretStore for NoSecrets {
        async fn get_secret_value(&self, id: &str) -> Result<SecretValue, ResolveError> {
            Err(ResolveError::SecretBackend {
                id: id.to_string(),
                reason: "unexpected call".into(),
            })
        }
    }

    #[derive(Default)]
    struct ScriptedLifecycle {
        events: VecDeque<Event>,
        fail_register: bool,
        registered: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LifecycleApi for ScriptedLifecycle {
        async fn register(&mut self, name: &str) -> Result<String, LifecycleError> {
            if self.fail_register {
                return Err(LifecycleError::Status {
                    status: 500,
                    body: "Extension.Crash".into(),
                });
            }
            self.registered.lock().unwrap().push(name.to_string());
            Ok("ext-1".to_string())
        }

        async fn next_event(&mut self) -> Result<Event, LifecycleError> {
            self.events.pop_front().ok_or(LifecycleError::Status {
                status: 500,
                body: "no more events".into(),
            })
        }
    }

    fn event(event_type: EventType) -> Event {
        Event {
            event_type,
            deadline_ms: 0,
            request_id: Some("abc123".into()),
            invoked_function_arn: None,
            shutdown_reason: None,
        }
    }

    fn lifecycle(events: &[EventType]) -> ScriptedLifecycle {
        ScriptedLifecycle {
            events: events.iter().copied().map(event).collect(),
            ..Default::default()
        }
    }

    fn resolver(params: Arc<CountingParameters>, context: ContextHandle) -> Resolver {
        let refs =
            parse_declarations([("SECRETSCTX_API_KEY", "{aws-ssm}/app/key")]).unwrap();
        Resolver::new(refs, params, Arc::new(NoSecrets), context)
    }

    #[tokio::test]
    async fn test_runs_invocations_until_shutdown() {
        let params = Arc::new(CountingParameters::default());
        let context = ContextHandle::new();
        let (tx, rx) = rendezvous();
        let lifecycle = lifecycle(&[EventType::Invoke, EventType::Invoke, EventType::Shutdown]);
        let registered = lifecycle.registered.clone();

        let proxy = tokio::spawn(async move {
            for _ in 0..2 {
                tx.notify().await.unwrap();
            }
        });

        let mut coordinator =
            Coordinator::new(resolver(params.clone(), context.clone()), lifecycle, rx, "secretsctx");
        coordinator.run().await.unwrap();
        proxy.await.unwrap();

        assert_eq!(coordinator.state(), State::Stopped);
        assert_eq!(*registered.lock().unwrap(), vec!["secretsctx".to_string()]);
        // No refresh interval: resolved exactly once.
        assert_eq!(params.calls.load(Ordering::SeqCst), 1);
        assert_eq!(context.current().await.get("API_KEY"), Some("/app/key-1"));
    }

    #[tokio::test]
    async fn test_states_follow_the_lifecycle() {
        let params = Arc::new(CountingParameters::default());
        let (tx, rx) = rendezvous();
        let mut coordinator = Coordinator::new(
            resolver(params, ContextHandle::new()),
            lifecycle(&[EventType::Invoke]),
            rx,
            "secretsctx",
        );

        assert_eq!(coordinator.state(), State::Initializing);
        assert_eq!(coordinator.step().await.unwrap(), State::WaitingForEvent);
        assert_eq!(
            coordinator.step().await.unwrap(),
            State::WaitingForInvocationDone
        );

        let proxy = tokio::spawn(async move { tx.notify().await });
        assert_eq!(coordinator.step().await.unwrap(), State::MaybeRefreshing);
        proxy.await.unwrap().unwrap();
        assert_eq!(coordinator.step().await.unwrap(), State::WaitingForEvent);
    }

    #[tokio::test]
    async fn test_refreshes_after_each_invocation_once_due() {
        let params = Arc::new(CountingParameters::default());
        let context = ContextHandle::new();
        let (tx, rx) = rendezvous();

        let proxy = tokio::spawn(async move {
            for _ in 0..2 {
                tx.notify().await.unwrap();
            }
        });

        let mut coordinator = Coordinator::new(
            resolver(params.clone(), context.clone()),
            lifecycle(&[EventType::Invoke, EventType::Invoke, EventType::Shutdown]),
            rx,
            "secretsctx",
        )
        .refresh_every(Duration::from_nanos(1));
        coordinator.run().await.unwrap();
        proxy.await.unwrap();

        assert_eq!(params.calls.load(Ordering::SeqCst), 3);
        assert_eq!(context.current().await.get("API_KEY"), Some("/app/key-3"));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_fatal_by_default() {
        let params = Arc::new(CountingParameters {
            fail_from: Some(2),
            ..Default::default()
        });
        let context = ContextHandle::new();
        let (tx, rx) = rendezvous();
        tokio::spawn(async move { tx.notify().await });

        let mut coordinator = Coordinator::new(
            resolver(params, context.clone()),
            lifecycle(&[EventType::Invoke, EventType::Shutdown]),
            rx,
            "secretsctx",
        )
        .refresh_every(Duration::from_nanos(1));

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SidecarError::Resolve(ResolveError::ParameterBackend(_))));
        assert_eq!(coordinator.state(), State::MaybeRefreshing);
        assert_eq!(context.current().await.get("API_KEY"), Some("/app/key-1"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_context_when_tolerated() {
        let params = Arc::new(CountingParameters {
            fail_from: Some(2),
            ..Default::default()
        });
        let context = ContextHandle::new();
        let (tx, rx) = rendezvous();
        tokio::spawn(async move { tx.notify().await });

        let mut coordinator = Coordinator::new(
            resolver(params.clone(), context.clone()),
            lifecycle(&[EventType::Invoke, EventType::Shutdown]),
            rx,
            "secretsctx",
        )
        .refresh_every(Duration::from_nanos(1))
        .tolerate_refresh_errors(true);

        coordinator.run().await.unwrap();
        assert_eq!(params.calls.load(Ordering::SeqCst), 2);
        assert_eq!(context.current().await.get("API_KEY"), Some("/app/key-1"));
    }

    #[tokio::test]
    async fn test_initial_resolution_failure_prevents_registration() {
        let params = Arc::new(CountingParameters {
            fail_from: Some(1),
            ..Default::default()
        });
        let (_tx, rx) = rendezvous();
        let lifecycle = lifecycle(&[EventType::Invoke]);
        let registered = lifecycle.registered.clone();

        let mut coordinator =
            Coordinator::new(resolver(params, ContextHandle::new()), lifecycle, rx, "secretsctx");

        assert!(coordinator.run().await.is_err());
        assert!(registered.lock().unwrap().is_empty());
        assert_eq!(coordinator.state(), State::Initializing);
    }

    #[tokio::test]
    async fn test_registration_failure_is_fatal() {
        let (_tx, rx) = rendezvous();
        let mut coordinator = Coordinator::new(
            resolver(Arc::new(CountingParameters::default()), ContextHandle::new()),
            ScriptedLifecycle {
                fail_register: true,
                ..Default::default()
            },
            rx,
            "secretsctx",
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SidecarError::Lifecycle(LifecycleError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_lost_event_stream_is_fatal() {
        let (_tx, rx) = rendezvous();
        let mut coordinator = Coordinator::new(
            resolver(Arc::new(CountingParameters::default()), ContextHandle::new()),
            lifecycle(&[]),
            rx,
            "secretsctx",
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(err, SidecarError::Lifecycle(_)));
        assert_eq!(coordinator.state(), State::WaitingForEvent);
    }

    #[tokio::test]
    async fn test_proxy_gone_is_fatal() {
        let (tx, rx) = rendezvous();
        drop(tx);
        let mut coordinator = Coordinator::new(
            resolver(Arc::new(CountingParameters::default()), ContextHandle::new()),
            lifecycle(&[EventType::Invoke]),
            rx,
            "secretsctx",
        );

        let err = coordinator.run().await.unwrap_err();
        assert!(matches!(
            err,
            SidecarError::Lifecycle(LifecycleError::CompletionClosed)
        ));
    }
}
