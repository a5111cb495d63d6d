//! Shutdown handshake between the registry and its callers.
//!
//! A request carries a oneshot sender; the registry answers it once the
//! sweep is done. Closing the receiving side makes late requests fail fast
//! instead of waiting for an answer that will never come.

use tokio::sync::{mpsc, oneshot};

/// Acknowledgment half of one shutdown request.
pub type Ack = oneshot::Sender<()>;

/// Create a connected trigger/listener pair.
pub fn handshake() -> (ShutdownTrigger, ShutdownListener) {
    let (tx, rx) = mpsc::channel(1);
    (ShutdownTrigger { tx }, ShutdownListener { rx })
}

/// Requesting side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<Ack>,
}

impl ShutdownTrigger {
    /// Send a request and wait for the acknowledgment.
    ///
    /// Returns `false` if the listener was already closed, meaning the
    /// shutdown this request was aimed at has already completed.
    pub async fn request(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Receiving side, owned by the registry.
#[derive(Debug)]
pub struct ShutdownListener {
    rx: mpsc::Receiver<Ack>,
}

impl ShutdownListener {
    /// Wait for the next request. `None` once every trigger is gone.
    pub async fn recv(&mut self) -> Option<Ack> {
        self.rx.recv().await
    }

    /// Acknowledge `first` and every request still queued, then refuse new ones.
    pub async fn acknowledge_all(mut self, first: Option<Ack>) {
        self.rx.close();
        let mut acked = 0usize;
        if let Some(ack) = first {
            let _ = ack.send(());
            acked += 1;
        }
        while let Some(ack) = self.rx.recv().await {
            let _ = ack.send(());
            acked += 1;
        }
        tracing::debug!(requests = acked, "Shutdown acknowledged");
    }
}
