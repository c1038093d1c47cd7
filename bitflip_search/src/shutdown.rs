/*!
Cancellation signal shared by the search tasks.

A [`ShutdownTrigger`] is fired once (Ctrl+C, or the supervisor deciding to
stop); every [`ShutdownSignal`] clone observes it at its next suspension point.
*/

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected trigger/signal pair
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Firing side, cheap to clone into signal handlers
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }
}

/// Observing side
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires
    #[cfg(test)]
    pub fn never() -> Self {
        let (_, signal) = channel();
        signal
    }

    /// Check without waiting
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// If every trigger is dropped without firing this never completes.
    pub async fn triggered(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fire_wakes_all_clones() {
        let (trigger, signal) = channel();
        let mut a = signal.clone();
        let mut b = signal;
        assert!(!a.is_triggered());

        trigger.fire();
        a.triggered().await;
        b.triggered().await;
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut signal = ShutdownSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.triggered()).await;
        assert!(waited.is_err());
        assert!(!signal.is_triggered());
    }
}
