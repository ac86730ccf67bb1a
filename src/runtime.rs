//! Runtime - cancellation signal shared by the client's retry loop and the CLI.

use crate::error::{Result, WalletError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Shutdown signal broadcaster
#[derive(Clone)]
pub struct Shutdown {
    sender: broadcast::Sender<()>,
    triggered: Arc<RwLock<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self { Self::new() }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender, triggered: Arc::new(RwLock::new(false)) }
    }

    /// Subscribe to shutdown signal
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Trigger shutdown
    pub async fn trigger(&self) {
        let mut triggered = self.triggered.write().await;
        if !*triggered {
            *triggered = true;
            let _ = self.sender.send(());
        }
    }

    /// Check if shutdown was triggered
    pub async fn is_triggered(&self) -> bool {
        *self.triggered.read().await
    }

    /// Resolves once shutdown has been triggered (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if self.is_triggered().await {
            return;
        }
        let _ = receiver.recv().await;
    }
}

/// Run `fut` unless `shutdown` fires first.
pub async fn cancellable<T, F>(shutdown: Option<&Shutdown>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match shutdown {
        None => fut.await,
        Some(shutdown) => tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(WalletError::Cancelled),
            result = fut => result,
        },
    }
}

/// Install signal handlers and return shutdown handle
pub fn install_signal_handlers() -> Shutdown {
    let shutdown = Shutdown::new();
    let handle = shutdown.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(error = %e, "signal handlers unavailable");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, cancelling"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, cancelling"),
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Ctrl+C handler unavailable");
                return;
            }
            tracing::info!("Received Ctrl+C, cancelling");
        }

        handle.trigger().await;
    });

    shutdown
}
