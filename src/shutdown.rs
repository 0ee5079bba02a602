//! Process-wide shutdown orchestration.
//!
//! Termination is cooperative: a watch channel broadcasts the stop signal to
//! every worker and shutdown handler, and a drain barrier (clones of one mpsc
//! sender, never used to send) lets the coordinator block until each of them
//! has finished its in-flight work and dropped its guard.

use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

/// Held by every participant in the drain barrier; dropping it reports
/// completion to the coordinator.
#[derive(Clone)]
pub struct DrainGuard {
    _tx: mpsc::Sender<()>,
}

pub struct ShutdownCoordinator {
    stop_tx: watch::Sender<bool>,
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
    state: LifecycleState,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (drain_tx, drain_rx) = mpsc::channel(1);
        Self {
            stop_tx,
            drain_tx,
            drain_rx,
            state: LifecycleState::Running,
        }
    }

    /// Stop signal for a worker or shutdown handler to select on.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn drain_guard(&self) -> DrainGuard {
        DrainGuard {
            _tx: self.drain_tx.clone(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn transition(&mut self, new_state: LifecycleState) {
        info!(from = ?self.state, to = ?new_state, "lifecycle state transition");
        self.state = new_state;
    }

    /// Broadcast stop to every subscriber and block until all drain guards
    /// have been dropped. Workers are never force-killed; they finish their
    /// current line and drop out.
    pub async fn shutdown(mut self) {
        self.transition(LifecycleState::Draining);
        let _ = self.stop_tx.send(true);
        drop(self.drain_tx);
        while self.drain_rx.recv().await.is_some() {}
        // Inlined `self.transition(LifecycleState::Stopped)`: `self.drain_tx` is
        // partially moved above, so we cannot call a `&mut self` method here.
        info!(from = ?self.state, to = ?LifecycleState::Stopped, "lifecycle state transition");
        self.state = LifecycleState::Stopped;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
