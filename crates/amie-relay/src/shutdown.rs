//! Cooperative stop signals.

use std::sync::Arc;
use tokio::sync::watch;

/// Requests a graceful stop of a running [`crate::Supervisor`].
///
/// In-flight work finishes first: a delivery being persisted is acked, a
/// publish awaiting its confirm is relocated.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub(crate) fn new(tx: Arc<watch::Sender<bool>>) -> Self {
        Self { tx }
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Resolves once the flag is set or its sender is gone.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|set| *set).await;
}

/// Current value of a stop flag.
pub(crate) fn is_set(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}
