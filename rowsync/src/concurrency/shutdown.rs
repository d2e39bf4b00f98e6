use tokio::sync::watch;

use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

/// Handle used to tell the controller to stop.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Notifies every subscriber. Fails when no subscriber is left.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub type ShutdownRx = SignalRx;

/// Resolves once a shutdown was requested or every [`ShutdownTx`] was dropped.
pub async fn wait_for_shutdown(mut shutdown_rx: ShutdownRx) {
    let _ = shutdown_rx.changed().await;
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), rx)
}
