//! Cooperative shutdown signalling for extraction runs.
//!
//! A [`ShutdownTx`] is handed out by the pipeline so that signal handlers (or tests) can ask a
//! running extraction to stop. The run observes the request through a [`ShutdownRx`] at chunk
//! boundaries and while a write is in flight.

use tokio::sync::watch;

/// Sending half of the shutdown channel. Cloning it yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Requests shutdown. Every current and future receiver observes the request.
    pub fn shutdown(&self) {
        self.0.send_replace(true);
    }

    /// Creates a new receiver for this channel.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving half of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes when shutdown is requested.
    ///
    /// If every sender is dropped without requesting shutdown, the future never completes.
    pub async fn wait(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }

            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Creates a new shutdown channel in the "running" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}
