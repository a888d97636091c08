//! Single-slot rendezvous between the proxy and the lifecycle coordinator.
//!
//! `notify` does not return until the matching `wait` has taken the signal,
//! so the proxy holds the runtime's completion request until the coordinator
//! is ready to act on it. One signal is produced and consumed per invocation.

use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
#[error("completion signal receiver is gone")]
pub struct SignalClosed;

/// Producer side, held by the proxy.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

/// Consumer side, held by the coordinator.
#[derive(Debug)]
pub struct CompletionReceiver {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

pub fn rendezvous() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (CompletionSender { tx }, CompletionReceiver { rx })
}

impl CompletionSender {
    /// Signal completion and block until it has been consumed.
    pub async fn notify(&self) -> Result<(), SignalClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(ack_tx).await.map_err(|_| SignalClosed)?;
        ack_rx.await.map_err(|_| SignalClosed)
    }
}

impl CompletionReceiver {
    /// Consume exactly one completion signal. `None` once every sender is gone.
    pub async fn wait(&mut self) -> Option<()> {
        let ack = self.rx.recv().await?;
        // The sender may have given up; the signal still counts.
        let _ = ack.send(());
        Some(())
    }
}
