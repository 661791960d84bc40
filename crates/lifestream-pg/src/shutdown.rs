//! Cooperative shutdown signal.
//!
//! A single [`ShutdownTx`] can stop any number of tasks holding a
//! [`ShutdownRx`]. Dropping the sender also counts as shutdown.

use tokio::sync::watch;

#[derive(Debug)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Ask every receiver to stop.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once shutdown is requested. Cancel-safe.
    pub async fn cancelled(&mut self) {
        // Err means the sender is gone, which is treated as shutdown
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

pub fn create_shutdown() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
